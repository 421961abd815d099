//! Host-owned board store.
//!
//! Holds the current board and the last known item payloads. The board is
//! only ever replaced wholesale; `revision` bumps on every replacement so
//! render subscribers can poll for change.

use crate::board::Board;
use crate::error::PipelineError;
use crate::model::item::{Item, ItemId};
use crate::model::stage::StageSet;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct BoardStore {
    stages: StageSet,
    board: Board,
    items: BTreeMap<ItemId, Item>,
    revision: u64,
}

impl BoardStore {
    /// Take ownership of an initial board and the payloads of its items.
    ///
    /// `items` may cover only part of the board.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidStage`] if the board's lanes do not match
    ///   `stages`
    /// - [`PipelineError::BoardInvariantViolation`] if the board lists an
    ///   item twice, or an item payload disagrees with the board
    pub fn init(
        stages: StageSet,
        board: Board,
        items: impl IntoIterator<Item = Item>,
    ) -> Result<Self, PipelineError> {
        if !board.stages().eq(stages.stages().iter()) {
            let stray = board
                .stages()
                .find(|stage| !stages.contains(stage))
                .map_or_else(|| "lane order".to_string(), ToString::to_string);
            return Err(PipelineError::invalid_stage(stray));
        }
        board.check_invariants()?;

        let mut by_id = BTreeMap::new();
        for item in items {
            match board.stage_of(&item.id) {
                Some(stage) if stage == &item.stage => {}
                Some(stage) => {
                    return Err(PipelineError::invariant(
                        &item.id,
                        format!("payload says {} but board says {stage}", item.stage),
                    ));
                }
                None => return Err(PipelineError::invariant(&item.id, "not on the board")),
            }
            by_id.insert(item.id.clone(), item);
        }

        Ok(Self {
            stages,
            board,
            items: by_id,
            revision: 0,
        })
    }

    /// Build the board from items, in their given order.
    ///
    /// # Errors
    ///
    /// See [`BoardStore::init`].
    pub fn from_items(stages: StageSet, items: Vec<Item>) -> Result<Self, PipelineError> {
        let board = Board::from_items(&stages, &items)?;
        Self::init(stages, board, items)
    }

    #[must_use]
    pub const fn board(&self) -> &Board {
        &self.board
    }

    #[must_use]
    pub const fn stages(&self) -> &StageSet {
        &self.stages
    }

    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Last known payload of an item, with its stage as the board shows it.
    #[must_use]
    pub fn item(&self, id: &ItemId) -> Option<Item> {
        let stage = self.board.stage_of(id)?;
        self.items.get(id).map(|item| item.with_stage(stage.clone()))
    }

    pub(crate) fn replace(&mut self, board: Board) {
        self.board = board;
        self.revision += 1;
    }

    /// Take server fields from `item`, keeping the local stage.
    pub(crate) fn merge_server_fields(&mut self, item: &Item) {
        if !self.board.contains(&item.id) {
            return;
        }
        let merged = self
            .items
            .entry(item.id.clone())
            .or_insert_with(|| item.clone());
        merged.payload.clone_from(&item.payload);
        merged.updated_at_us = item.updated_at_us;
        self.revision += 1;
    }

    pub(crate) fn remove(&mut self, id: &ItemId) -> Option<Item> {
        let stage = self.board.stage_of(id).cloned();
        let removed = self.items.remove(id);
        if stage.is_some() {
            self.replace(self.board.without(id));
        }
        removed.or_else(|| stage.map(|stage| Item::new(id.clone(), stage)))
    }

    /// End the store's life, handing back the final board.
    #[must_use]
    pub fn teardown(self) -> Board {
        tracing::debug!(revision = self.revision, "board store torn down");
        self.board
    }
}
