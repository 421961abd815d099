//! In-memory deal store.
//!
//! Same contract as the SQLite store, minus durability. Transactions run on
//! a scratch copy that replaces the live state only when the closure
//! succeeds. Timestamps come from a logical clock so runs are reproducible.

use crate::batch::commit_batch;
use crate::board::{Board, Move};
use crate::error::{PersistError, PipelineError};
use crate::model::item::{Item, ItemId};
use crate::model::stage::{Stage, StageSet};
use crate::persist::{StagePersistence, StageStore, TransactionalStore, persist_stage_move};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
struct StoredItem {
    item: Item,
    position: u64,
}

/// Deal storage held entirely in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryDealStore {
    stages: StageSet,
    items: BTreeMap<ItemId, StoredItem>,
    clock: u64,
}

impl MemoryDealStore {
    #[must_use]
    pub fn new(stages: StageSet) -> Self {
        Self {
            stages,
            items: BTreeMap::new(),
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Insert or replace an item; it lands at the end of its stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidStage`] if the item's stage is not
    /// configured.
    pub fn insert(&mut self, mut item: Item) -> Result<(), PipelineError> {
        if !self.stages.contains(&item.stage) {
            return Err(PipelineError::invalid_stage(item.stage.as_str()));
        }
        let position = self.tick();
        item.updated_at_us = i64::try_from(position).unwrap_or(i64::MAX);
        self.items
            .insert(item.id.clone(), StoredItem { item, position });
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id).map(|stored| &stored.item)
    }

    pub fn remove(&mut self, id: &ItemId) -> Option<Item> {
        self.items.remove(id).map(|stored| stored.item)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items ordered by stage position.
    #[must_use]
    pub fn items(&self) -> Vec<&Item> {
        let mut stored: Vec<&StoredItem> = self.items.values().collect();
        stored.sort_by_key(|s| s.position);
        stored.into_iter().map(|s| &s.item).collect()
    }

    /// Current board as stored.
    ///
    /// # Errors
    ///
    /// Returns an error only if stored items reference unconfigured stages.
    pub fn load_board(&self) -> Result<Board, PipelineError> {
        Board::from_items(&self.stages, self.items())
    }
}

impl StageStore for MemoryDealStore {
    fn find_item(&self, id: &ItemId) -> Result<Option<Item>, PipelineError> {
        Ok(self.get(id).cloned())
    }

    fn write_stage(&mut self, id: &ItemId, stage: &Stage) -> Result<Item, PipelineError> {
        if !self.items.contains_key(id) {
            return Err(PipelineError::ItemNotFound(id.clone()));
        }
        let now = self.tick();
        let stored = self
            .items
            .get_mut(id)
            .ok_or_else(|| PipelineError::ItemNotFound(id.clone()))?;
        if &stored.item.stage != stage {
            stored.item.stage = stage.clone();
            stored.position = now;
        }
        stored.item.updated_at_us = i64::try_from(now).unwrap_or(i64::MAX);
        Ok(stored.item.clone())
    }
}

impl TransactionalStore for MemoryDealStore {
    fn stages(&self) -> &StageSet {
        &self.stages
    }

    fn in_transaction<T, F>(&mut self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&mut dyn StageStore) -> Result<T, PipelineError>,
    {
        let mut scratch = self.clone();
        let out = f(&mut scratch)?;
        *self = scratch;
        Ok(out)
    }
}

impl StagePersistence for MemoryDealStore {
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
    use super::MemoryDealStore;
    use crate::board::Move;
    use crate::error::PersistError;
    use crate::model::item::{Item, ItemId};
    use crate::model::stage::{Stage, StageSet};
    use crate::persist::StagePersistence;

    fn seeded() -> MemoryDealStore {
        let mut store = MemoryDealStore::new(StageSet::default());
        store
            .insert(Item::new("d1", Stage::new("Lead")).with_field("amount", 100))
            .expect("insert");
        store
            .insert(Item::new("d2", Stage::new("Lead")))
            .expect("insert");
        store
    }

    #[test]
    fn moved_item_lands_at_end_of_target_stage() {
        let mut store = seeded();
        store
            .insert(Item::new("d3", Stage::new("Proposal")))
            .expect("insert");
        store
            .apply_stage_move(&ItemId::new("d1"), &Stage::new("Proposal"))
            .expect("move");

        let board = store.load_board().expect("board");
        assert_eq!(
            board.lane(&Stage::new("Proposal")),
            Some([ItemId::new("d3"), ItemId::new("d1")].as_slice())
        );
        assert_eq!(
            board.lane(&Stage::new("Lead")),
            Some([ItemId::new("d2")].as_slice())
        );
    }

    #[test]
    fn move_keeps_payload_and_bumps_updated_at() {
        let mut store = seeded();
        let before = store.get(&ItemId::new("d1")).cloned().expect("item");
        let after = store
            .apply_stage_move(&ItemId::new("d1"), &Stage::new("Qualified"))
            .expect("move");
        assert_eq!(after.payload, before.payload);
        assert!(after.updated_at_us > before.updated_at_us);
    }

    #[test]
    fn unknown_item_and_stage_are_rejected() {
        let mut store = seeded();
        assert_eq!(
            store.apply_stage_move(&ItemId::new("nope"), &Stage::new("Lead")),
            Err(PersistError::NotFound(ItemId::new("nope")))
        );
        assert!(matches!(
            store.apply_stage_move(&ItemId::new("d1"), &Stage::new("Churned")),
            Err(PersistError::Validation(_))
        ));
        assert!(store.insert(Item::new("d9", Stage::new("Churned"))).is_err());
    }

    #[test]
    fn failed_batch_leaves_store_identical() {
        let mut store = seeded();
        let snapshot = store.clone();
        let err = store
            .apply_stage_moves(&[
                Move::new("d1", "Lead", "Proposal"),
                Move::new("missing", "Lead", "Proposal"),
            ])
            .unwrap_err();
        assert_eq!(err, PersistError::NotFound(ItemId::new("missing")));
        assert_eq!(store, snapshot);
    }
}
