//! dealflow-core library.
//!
//! Pipeline board synchronization: a fixed ordered stage model, pure board
//! diff and move reducer functions, a per-item reconciliation controller for
//! optimistic moves, and an atomic batch stage commit over pluggable stores.
//!
//! # Conventions
//!
//! - **Errors**: library operations return [`PipelineError`]; config loading
//!   and database opening return `anyhow::Result`.
//! - **Logging**: `tracing` macros (`debug!` for submits and diffs, `info!`
//!   for commits, `warn!` for rollbacks and invariant violations).

pub mod batch;
pub mod board;
pub mod config;
pub mod db;
pub mod error;
pub mod memory;
pub mod model;
pub mod persist;
pub mod reconcile;

pub use batch::commit_batch;
pub use board::{
    Board, BoardDiff, Lane, Move, apply_move, apply_move_at, diff_boards, invert_move, undo_move,
};
pub use error::{ErrorCode, PersistError, PipelineError};
pub use memory::MemoryDealStore;
pub use model::{InvalidStage, Item, ItemId, Stage, StageSet};
pub use persist::{StagePersistence, StageStore, TransactionalStore, persist_stage_move};
pub use reconcile::{
    BoardStore, PendingRequest, ReconcileRecord, ReconcileStatus, ReconciliationController,
    Resolution,
};
