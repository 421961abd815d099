//! Batch stage commit.
//!
//! Applies an ordered list of moves as one unit. Each move is still a
//! discrete write, but all of them run inside the store's transaction scope:
//! the first failure aborts the scope and the caller observes no change.
//!
//! The batch path never touches a client board and creates no
//! reconciliation records; it either returns every updated item, in input
//! order, or an error.

use crate::board::Move;
use crate::error::PipelineError;
use crate::model::item::Item;
use crate::persist::TransactionalStore;
use tracing::{debug, info};

/// Apply `moves` atomically.
///
/// Every stage is validated before the transaction opens. Inside the
/// transaction each move's item must exist; a missing item aborts the batch
/// with [`PipelineError::ItemNotFound`].
///
/// A move's `from` stage is informational here: if the stored stage differs
/// (for example after another session moved the item) the write still
/// proceeds to `to`.
///
/// # Errors
///
/// - [`PipelineError::InvalidStage`] if any move names an unconfigured stage
/// - [`PipelineError::InvalidMove`] if any move has `from == to`
/// - [`PipelineError::ItemNotFound`] if any item does not exist
/// - storage errors from the underlying store
pub fn commit_batch<S>(store: &mut S, moves: &[Move]) -> Result<Vec<Item>, PipelineError>
where
    S: TransactionalStore,
{
    for mv in moves {
        for stage in [&mv.from, &mv.to] {
            if !store.stages().contains(stage) {
                return Err(PipelineError::invalid_stage(stage.as_str()));
            }
        }
        if mv.from == mv.to {
            return Err(PipelineError::InvalidMove {
                item: mv.item_id.clone(),
                stage: mv.to.to_string(),
            });
        }
    }

    if moves.is_empty() {
        return Ok(Vec::new());
    }

    let items = store.in_transaction(|tx| {
        let mut updated = Vec::with_capacity(moves.len());
        for mv in moves {
            let current = tx
                .find_item(&mv.item_id)?
                .ok_or_else(|| PipelineError::ItemNotFound(mv.item_id.clone()))?;
            if current.stage != mv.from {
                debug!(
                    item = %mv.item_id,
                    expected = %mv.from,
                    stored = %current.stage,
                    "batch move source differs from stored stage"
                );
            }
            updated.push(tx.write_stage(&mv.item_id, &mv.to)?);
        }
        Ok(updated)
    })?;

    info!(moves = items.len(), "batch stage commit applied");
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::commit_batch;
    use crate::board::Move;
    use crate::error::PipelineError;
    use crate::memory::MemoryDealStore;
    use crate::model::item::{Item, ItemId};
    use crate::model::stage::{Stage, StageSet};

    fn store() -> MemoryDealStore {
        let mut store = MemoryDealStore::new(StageSet::default());
        for (id, stage) in [("d1", "Lead"), ("d2", "Lead"), ("d3", "Qualified")] {
            store
                .insert(Item::new(id, Stage::new(stage)).with_field("title", id))
                .expect("insert");
        }
        store
    }

    fn stage_of(store: &MemoryDealStore, id: &str) -> Stage {
        store
            .get(&ItemId::new(id))
            .map(|item| item.stage.clone())
            .expect("item exists")
    }

    #[test]
    fn all_moves_apply_in_order() {
        let mut store = store();
        let items = commit_batch(
            &mut store,
            &[
                Move::new("d3", "Qualified", "Proposal"),
                Move::new("d1", "Lead", "Closed Won"),
            ],
        )
        .expect("batch");

        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["d3", "d1"]);
        assert_eq!(stage_of(&store, "d3"), Stage::new("Proposal"));
        assert_eq!(stage_of(&store, "d1"), Stage::new("Closed Won"));
        assert_eq!(items[1].title(), Some("d1"));
    }

    #[test]
    fn missing_item_rolls_back_the_whole_batch() {
        let mut store = store();
        let err = commit_batch(
            &mut store,
            &[
                Move::new("d1", "Lead", "Proposal"),
                Move::new("ghost", "Lead", "Proposal"),
                Move::new("d3", "Qualified", "Negotiation"),
            ],
        )
        .unwrap_err();

        assert!(matches!(err, PipelineError::ItemNotFound(id) if id == ItemId::new("ghost")));
        assert_eq!(stage_of(&store, "d1"), Stage::new("Lead"));
        assert_eq!(stage_of(&store, "d2"), Stage::new("Lead"));
        assert_eq!(stage_of(&store, "d3"), Stage::new("Qualified"));
    }

    #[test]
    fn unknown_stage_fails_before_any_write() {
        let mut store = store();
        let err = commit_batch(
            &mut store,
            &[
                Move::new("d1", "Lead", "Proposal"),
                Move::new("d2", "Lead", "Churned"),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidStage { .. }));
        assert_eq!(stage_of(&store, "d1"), Stage::new("Lead"));
    }

    #[test]
    fn empty_batch_is_a_noop() {
        let mut store = store();
        assert!(commit_batch(&mut store, &[]).expect("batch").is_empty());
    }

    #[test]
    fn stale_source_stage_still_moves() {
        let mut store = store();
        let items = commit_batch(&mut store, &[Move::new("d3", "Lead", "Proposal")])
            .expect("batch");
        assert_eq!(items[0].stage, Stage::new("Proposal"));
    }
}
