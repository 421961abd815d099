//! Persistence seams consumed by the board engine.
//!
//! [`StagePersistence`] is what the reconciliation controller calls: one
//! stage move, or one atomic batch. [`StageStore`] and
//! [`TransactionalStore`] are the storage-side primitives the batch commit
//! runs on; the store owns the actual transaction boundary.

use crate::board::Move;
use crate::error::{PersistError, PipelineError};
use crate::model::item::{Item, ItemId};
use crate::model::stage::{Stage, StageSet};

/// The persistence collaborator of the reconciliation controller.
pub trait StagePersistence {
    /// Persist a single stage change and return the authoritative item.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistError`] on missing item, rejected stage, or
    /// transport failure.
    fn apply_stage_move(&mut self, item_id: &ItemId, target: &Stage)
    -> Result<Item, PersistError>;

    /// Persist every move or none of them.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistError`] if any move fails; nothing is persisted.
    fn apply_stage_moves(&mut self, moves: &[Move]) -> Result<Vec<Item>, PersistError>;
}

/// Item lookup and stage write against one storage scope.
pub trait StageStore {
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    fn find_item(&self, id: &ItemId) -> Result<Option<Item>, PipelineError>;

    /// Put the item in `stage` (at the end of that stage) and return it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ItemNotFound`] for an unknown item, or a
    /// storage error.
    fn write_stage(&mut self, id: &ItemId, stage: &Stage) -> Result<Item, PipelineError>;
}

/// A store that can run a closure inside one all-or-nothing scope.
pub trait TransactionalStore {
    /// Stage set the store validates against.
    fn stages(&self) -> &StageSet;

    /// Run `f` in a transaction: committed when `f` returns `Ok`, rolled
    /// back when it returns `Err`.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or a storage error from begin/commit.
    fn in_transaction<T, F>(&mut self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&mut dyn StageStore) -> Result<T, PipelineError>;
}

/// Validate and persist one stage move outside any batch.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidStage`] for an unconfigured target, or
/// whatever [`StageStore::write_stage`] reports.
pub fn persist_stage_move<S>(
    store: &mut S,
    item_id: &ItemId,
    target: &Stage,
) -> Result<Item, PipelineError>
where
    S: StageStore + TransactionalStore,
{
    if !store.stages().contains(target) {
        return Err(PipelineError::invalid_stage(target.as_str()));
    }
    let item = store.write_stage(item_id, target)?;
    tracing::info!(item = %item_id, stage = %target, "stage move persisted");
    Ok(item)
}
