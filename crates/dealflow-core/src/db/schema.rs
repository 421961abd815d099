//! SQLite schema for the deal store.
//!
//! - `deals` holds the current stage and lane position of every deal, plus
//!   its opaque business payload as JSON
//! - `stage_moves` records every applied stage change; rows are written in
//!   the same transaction as the stage update
//! - `store_meta` tracks the schema version next to `PRAGMA user_version`

/// Migration v1: deals table and store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS deals (
    item_id TEXT PRIMARY KEY CHECK (length(trim(item_id)) > 0),
    stage TEXT NOT NULL CHECK (length(trim(stage)) > 0),
    position INTEGER NOT NULL DEFAULT 0,
    payload_json TEXT NOT NULL DEFAULT '{}',
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_deals_stage_position
    ON deals(stage, position, item_id);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 1);
";

/// Migration v2: stage move history.
pub const MIGRATION_V2_SQL: &str = r"
CREATE TABLE IF NOT EXISTS stage_moves (
    move_id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id TEXT NOT NULL REFERENCES deals(item_id) ON DELETE CASCADE,
    from_stage TEXT NOT NULL,
    to_stage TEXT NOT NULL,
    moved_at_us INTEGER NOT NULL,
    CHECK (from_stage <> to_stage)
);

CREATE INDEX IF NOT EXISTS idx_stage_moves_item
    ON stage_moves(item_id, move_id);
";

/// Indexes expected by board and history queries.
pub const REQUIRED_INDEXES: &[&str] = &["idx_deals_stage_position", "idx_stage_moves_item"];
