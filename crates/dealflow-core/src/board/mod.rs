//! Board snapshots: the assignment of items to stages at a point in time.
//!
//! # Invariants
//!
//! - Lanes follow the configured stage order, one lane per stage.
//! - Every item identifier appears in exactly one lane, exactly once.
//! - Order inside a lane is display-only; ownership is lane membership.
//!
//! Boards are values. The diff engine and reducer take a board by reference
//! and return a new one; nothing mutates a published snapshot in place.

pub mod diff;
pub mod reduce;

pub use diff::{BoardDiff, diff_boards};
pub use reduce::{Move, apply_move, apply_move_at, invert_move, undo_move};

use crate::error::PipelineError;
use crate::model::item::{Item, ItemId};
use crate::model::stage::{Stage, StageSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// The ordered items of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lane {
    pub stage: Stage,
    pub items: Vec<ItemId>,
}

/// A full board snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    lanes: Vec<Lane>,
}

impl Board {
    /// A board with one empty lane per configured stage.
    #[must_use]
    pub fn empty(stages: &StageSet) -> Self {
        Self {
            lanes: stages
                .stages()
                .iter()
                .map(|stage| Lane {
                    stage: stage.clone(),
                    items: Vec::new(),
                })
                .collect(),
        }
    }

    /// Build a board from `(stage, items)` pairs. Stages without a pair get
    /// an empty lane.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidStage`] for an unconfigured stage and
    /// [`PipelineError::BoardInvariantViolation`] if an item is listed twice.
    pub fn from_lanes<I>(stages: &StageSet, lanes: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = (Stage, Vec<ItemId>)>,
    {
        let mut board = Self::empty(stages);
        for (stage, items) in lanes {
            let lane = board
                .lane_mut(&stage)
                .ok_or_else(|| PipelineError::invalid_stage(stage.as_str()))?;
            lane.items.extend(items);
        }
        board.check_invariants()?;
        Ok(board)
    }

    /// Build a board from items, keeping their relative order per stage.
    ///
    /// # Errors
    ///
    /// Same as [`Board::from_lanes`].
    pub fn from_items<'a, I>(stages: &StageSet, items: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = &'a Item>,
    {
        Self::from_lanes(
            stages,
            items
                .into_iter()
                .map(|item| (item.stage.clone(), vec![item.id.clone()])),
        )
    }

    #[must_use]
    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    /// Items of one stage, or `None` if the board has no such lane.
    #[must_use]
    pub fn lane(&self, stage: &Stage) -> Option<&[ItemId]> {
        self.lanes
            .iter()
            .find(|lane| &lane.stage == stage)
            .map(|lane| lane.items.as_slice())
    }

    pub(crate) fn lane_mut(&mut self, stage: &Stage) -> Option<&mut Lane> {
        self.lanes.iter_mut().find(|lane| &lane.stage == stage)
    }

    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.lanes.iter().map(|lane| &lane.stage)
    }

    /// Stage and in-lane index of an item.
    #[must_use]
    pub fn locate(&self, id: &ItemId) -> Option<(&Stage, usize)> {
        self.lanes.iter().find_map(|lane| {
            lane.items
                .iter()
                .position(|candidate| candidate == id)
                .map(|index| (&lane.stage, index))
        })
    }

    #[must_use]
    pub fn stage_of(&self, id: &ItemId) -> Option<&Stage> {
        self.locate(id).map(|(stage, _)| stage)
    }

    #[must_use]
    pub fn contains(&self, id: &ItemId) -> bool {
        self.locate(id).is_some()
    }

    /// Number of items across all lanes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.iter().map(|lane| lane.items.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(|lane| lane.items.is_empty())
    }

    pub fn item_ids(&self) -> impl Iterator<Item = &ItemId> {
        self.lanes.iter().flat_map(|lane| lane.items.iter())
    }

    /// Verify no item appears twice anywhere on the board.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::BoardInvariantViolation`] naming the first
    /// duplicated item.
    pub fn check_invariants(&self) -> Result<(), PipelineError> {
        let mut seen: HashSet<&ItemId> = HashSet::with_capacity(self.len());
        for lane in &self.lanes {
            for id in &lane.items {
                if !seen.insert(id) {
                    return Err(PipelineError::invariant(
                        id,
                        format!("listed more than once (again in {})", lane.stage),
                    ));
                }
            }
        }
        Ok(())
    }

    /// True when both boards put the same items in the same stages,
    /// ignoring order inside lanes.
    #[must_use]
    pub fn same_membership(&self, other: &Self) -> bool {
        self.lanes.len() == other.lanes.len()
            && self.lanes.iter().all(|lane| {
                other.lane(&lane.stage).is_some_and(|items| {
                    lane.items.iter().collect::<BTreeSet<_>>()
                        == items.iter().collect::<BTreeSet<_>>()
                })
            })
    }

    /// Copy of this board without `id`.
    #[must_use]
    pub fn without(&self, id: &ItemId) -> Self {
        let mut next = self.clone();
        for lane in &mut next.lanes {
            lane.items.retain(|candidate| candidate != id);
        }
        next
    }
}
