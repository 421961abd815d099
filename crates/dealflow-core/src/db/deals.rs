//! SQLite implementation of the persistence seams.
//!
//! A stage write moves the deal to the end of its target stage
//! (`position = max + 1`), stamps `updated_at_us`, and appends a
//! `stage_moves` row, all inside one transaction. Batch commits share a
//! single transaction across every move.

use super::{migrations, open_database};
use crate::batch::commit_batch;
use crate::board::{Board, Move};
use crate::error::{PersistError, PipelineError};
use crate::model::item::{Item, ItemId};
use crate::model::stage::{Stage, StageSet};
use crate::persist::{StagePersistence, StageStore, TransactionalStore, persist_stage_move};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// One row of a deal's stage history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageMoveRecord {
    pub item_id: ItemId,
    pub from: Stage,
    pub to: Stage,
    pub moved_at_us: i64,
}

/// Deal storage backed by a SQLite connection.
#[derive(Debug)]
pub struct SqliteDealStore {
    conn: Connection,
    stages: StageSet,
}

impl SqliteDealStore {
    /// Open the database at `path` (creating and migrating it as needed).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path, stages: StageSet) -> anyhow::Result<Self> {
        let conn = open_database(path)?;
        Ok(Self { conn, stages })
    }

    /// A migrated, private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns a storage error if SQLite setup fails.
    pub fn in_memory(stages: StageSet) -> Result<Self, PipelineError> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::migrate(&mut conn)?;
        Ok(Self { conn, stages })
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    #[must_use]
    pub const fn stage_set(&self) -> &StageSet {
        &self.stages
    }

    /// Insert a new deal at the end of its stage.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidStage`] for an unconfigured stage
    /// - [`PipelineError::DuplicateItem`] if the ID is taken
    pub fn create_item(&mut self, item: &Item) -> Result<Item, PipelineError> {
        if !self.stages.contains(&item.stage) {
            return Err(PipelineError::invalid_stage(item.stage.as_str()));
        }

        let tx = self.conn.transaction()?;
        if read_item(&tx, &item.id)?.is_some() {
            return Err(PipelineError::DuplicateItem(item.id.clone()));
        }
        let now = now_us();
        let position = next_position(&tx, &item.stage)?;
        tx.execute(
            "INSERT INTO deals (item_id, stage, position, payload_json, created_at_us, updated_at_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                item.id.as_str(),
                item.stage.as_str(),
                position,
                serde_json::to_string(&item.payload)?,
                now
            ],
        )?;
        let created = read_item(&tx, &item.id)?
            .ok_or_else(|| PipelineError::ItemNotFound(item.id.clone()))?;
        tx.commit()?;

        tracing::info!(item = %created.id, stage = %created.stage, "deal created");
        Ok(created)
    }

    /// # Errors
    ///
    /// Returns a storage or payload decoding error.
    pub fn get_item(&self, id: &ItemId) -> Result<Option<Item>, PipelineError> {
        read_item(&self.conn, id)
    }

    /// All deals, ordered by stage position then ID.
    ///
    /// # Errors
    ///
    /// Returns a storage or payload decoding error.
    pub fn list_items(&self) -> Result<Vec<Item>, PipelineError> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id, stage, payload_json, updated_at_us
             FROM deals
             ORDER BY position ASC, item_id ASC",
        )?;
        let rows = stmt.query_map([], raw_item)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(decode_item(row?)?);
        }
        Ok(items)
    }

    /// Build the board from stored deals.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidStage`] if a stored deal sits in a
    /// stage that is no longer configured.
    pub fn load_board(&self) -> Result<Board, PipelineError> {
        let items = self.list_items()?;
        Board::from_items(&self.stages, &items)
    }

    /// Stage history of one deal, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn move_history(&self, id: &ItemId) -> Result<Vec<StageMoveRecord>, PipelineError> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id, from_stage, to_stage, moved_at_us
             FROM stage_moves
             WHERE item_id = ?1
             ORDER BY move_id ASC",
        )?;
        let rows = stmt.query_map([id.as_str()], |row| {
            Ok(StageMoveRecord {
                item_id: ItemId::new(row.get::<_, String>(0)?),
                from: Stage::new(row.get::<_, String>(1)?),
                to: Stage::new(row.get::<_, String>(2)?),
                moved_at_us: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

type RawItem = (String, String, String, i64);

fn raw_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawItem> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_item((id, stage, payload_json, updated_at_us): RawItem) -> Result<Item, PipelineError> {
    let payload: BTreeMap<String, Value> = serde_json::from_str(&payload_json)?;
    Ok(Item {
        id: ItemId::new(id),
        stage: Stage::new(stage),
        payload,
        updated_at_us,
    })
}

fn now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

fn read_item(conn: &Connection, id: &ItemId) -> Result<Option<Item>, PipelineError> {
    let raw = conn
        .query_row(
            "SELECT item_id, stage, payload_json, updated_at_us FROM deals WHERE item_id = ?1",
            [id.as_str()],
            raw_item,
        )
        .optional()?;
    raw.map(decode_item).transpose()
}

fn next_position(conn: &Connection, stage: &Stage) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(position), -1) + 1 FROM deals WHERE stage = ?1",
        [stage.as_str()],
        |row| row.get(0),
    )
}

fn write_stage(conn: &Connection, id: &ItemId, stage: &Stage) -> Result<Item, PipelineError> {
    let current = read_item(conn, id)?.ok_or_else(|| PipelineError::ItemNotFound(id.clone()))?;
    let now = now_us();

    if &current.stage == stage {
        conn.execute(
            "UPDATE deals SET updated_at_us = ?1 WHERE item_id = ?2",
            params![now, id.as_str()],
        )?;
    } else {
        let position = next_position(conn, stage)?;
        conn.execute(
            "UPDATE deals SET stage = ?1, position = ?2, updated_at_us = ?3 WHERE item_id = ?4",
            params![stage.as_str(), position, now, id.as_str()],
        )?;
        conn.execute(
            "INSERT INTO stage_moves (item_id, from_stage, to_stage, moved_at_us)
             VALUES (?1, ?2, ?3, ?4)",
            params![id.as_str(), current.stage.as_str(), stage.as_str(), now],
        )?;
    }

    read_item(conn, id)?.ok_or_else(|| PipelineError::ItemNotFound(id.clone()))
}

/// Stage store view over an open transaction.
struct TxScope<'a> {
    conn: &'a Connection,
}

impl StageStore for TxScope<'_> {
    fn find_item(&self, id: &ItemId) -> Result<Option<Item>, PipelineError> {
        read_item(self.conn, id)
    }

    fn write_stage(&mut self, id: &ItemId, stage: &Stage) -> Result<Item, PipelineError> {
        write_stage(self.conn, id, stage)
    }
}

impl StageStore for SqliteDealStore {
    fn find_item(&self, id: &ItemId) -> Result<Option<Item>, PipelineError> {
        read_item(&self.conn, id)
    }

    fn write_stage(&mut self, id: &ItemId, stage: &Stage) -> Result<Item, PipelineError> {
        let tx = self.conn.transaction()?;
        let item = write_stage(&tx, id, stage)?;
        tx.commit()?;
        Ok(item)
    }
}

impl TransactionalStore for SqliteDealStore {
    fn stages(&self) -> &StageSet {
        &self.stages
    }

    fn in_transaction<T, F>(&mut self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&mut dyn StageStore) -> Result<T, PipelineError>,
    {
        let tx = self.conn.transaction()?;
        let out = {
            let mut scope = TxScope { conn: &tx };
            f(&mut scope)?
        };
        tx.commit()?;
        Ok(out)
    }
}

impl StagePersistence for SqliteDealStore {
    fn apply_stage_move(
        &mut self,
        item_id: &ItemId,
        target: &Stage,
    ) -> Result<Item, PersistError> {
        persist_stage_move(self, item_id, target).map_err(PipelineError::into_persist_error)
    }

    fn apply_stage_moves(&mut self, moves: &[Move]) -> Result<Vec<Item>, PersistError> {
        commit_batch(self, moves).map_err(PipelineError::into_persist_error)
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteDealStore;
    use crate::batch::commit_batch;
    use crate::board::Move;
    use crate::error::{PersistError, PipelineError};
    use crate::model::item::{Item, ItemId};
    use crate::model::stage::{Stage, StageSet};
    use crate::persist::StagePersistence;

    fn seeded() -> SqliteDealStore {
        let mut store = SqliteDealStore::in_memory(StageSet::default()).expect("store");
        for (id, stage) in [("d1", "Lead"), ("d2", "Lead"), ("d3", "Qualified")] {
            store
                .create_item(&Item::new(id, Stage::new(stage)).with_field("title", id))
                .expect("create");
        }
        store
    }

    fn stage_of(store: &SqliteDealStore, id: &str) -> Stage {
        store
            .get_item(&ItemId::new(id))
            .expect("query")
            .expect("exists")
            .stage
    }

    fn history_rows(store: &SqliteDealStore) -> i64 {
        store
            .connection()
            .query_row("SELECT COUNT(*) FROM stage_moves", [], |row| row.get(0))
            .expect("count")
    }

    #[test]
    fn create_then_load_board() {
        let store = seeded();
        let board = store.load_board().expect("board");
        assert_eq!(
            board.lane(&Stage::new("Lead")),
            Some([ItemId::new("d1"), ItemId::new("d2")].as_slice())
        );
        assert_eq!(board.len(), 3);
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let mut store = seeded();
        let err = store
            .create_item(&Item::new("d1", Stage::new("Lead")))
            .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateItem(_)));
    }

    #[test]
    fn single_move_appends_and_records_history() {
        let mut store = seeded();
        let item = store
            .apply_stage_move(&ItemId::new("d1"), &Stage::new("Qualified"))
            .expect("move");
        assert_eq!(item.stage, Stage::new("Qualified"));
        assert_eq!(item.title(), Some("d1"));

        let board = store.load_board().expect("board");
        assert_eq!(
            board.lane(&Stage::new("Qualified")),
            Some([ItemId::new("d3"), ItemId::new("d1")].as_slice())
        );

        let history = store.move_history(&ItemId::new("d1")).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from, Stage::new("Lead"));
        assert_eq!(history[0].to, Stage::new("Qualified"));
    }

    #[test]
    fn single_move_errors_map_to_persist_errors() {
        let mut store = seeded();
        assert_eq!(
            store.apply_stage_move(&ItemId::new("zz"), &Stage::new("Lead")),
            Err(PersistError::NotFound(ItemId::new("zz")))
        );
        assert!(matches!(
            store.apply_stage_move(&ItemId::new("d1"), &Stage::new("Churned")),
            Err(PersistError::Validation(_))
        ));
    }

    #[test]
    fn batch_with_missing_item_persists_nothing() {
        let mut store = seeded();
        let err = commit_batch(
            &mut store,
            &[
                Move::new("d1", "Lead", "Proposal"),
                Move::new("missing", "Lead", "Proposal"),
                Move::new("d3", "Qualified", "Proposal"),
            ],
        )
        .unwrap_err();

        assert!(matches!(err, PipelineError::ItemNotFound(_)));
        assert_eq!(stage_of(&store, "d1"), Stage::new("Lead"));
        assert_eq!(stage_of(&store, "d2"), Stage::new("Lead"));
        assert_eq!(stage_of(&store, "d3"), Stage::new("Qualified"));
        assert_eq!(history_rows(&store), 0);
    }

    #[test]
    fn batch_success_returns_items_in_input_order() {
        let mut store = seeded();
        let items = store
            .apply_stage_moves(&[
                Move::new("d2", "Lead", "Negotiation"),
                Move::new("d1", "Lead", "Closed Won"),
            ])
            .expect("batch");
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["d2", "d1"]);
        assert_eq!(stage_of(&store, "d1"), Stage::new("Closed Won"));
        assert_eq!(history_rows(&store), 2);
    }
}
