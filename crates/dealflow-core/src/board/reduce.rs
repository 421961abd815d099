//! Optimistic move reducer.
//!
//! `apply_move` removes the item from `from` and appends it to `to`;
//! `apply_move_at` inserts at an explicit index instead. Both return a fresh
//! board and never touch their input.
//!
//! Exact undo: applying `invert_move(m)` at the item's original index
//! restores a board equal to the one `m` was applied to. With the default
//! append policy the inverse restores membership but not lane order.

use super::Board;
use crate::error::PipelineError;
use crate::model::item::ItemId;
use crate::model::stage::Stage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One item's transition from one stage to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    pub item_id: ItemId,
    pub from: Stage,
    pub to: Stage,
}

impl Move {
    #[must_use]
    pub fn new(item_id: impl Into<ItemId>, from: impl Into<Stage>, to: impl Into<Stage>) -> Self {
        Self {
            item_id: item_id.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// The move that undoes this one.
    #[must_use]
    pub fn inverted(&self) -> Self {
        Self {
            item_id: self.item_id.clone(),
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.item_id, self.from, self.to)
    }
}

/// Swap `from` and `to`.
///
/// Applying the inverse with [`apply_move`] only restores lane membership:
/// the item lands at the end of its old lane. To get back a board equal to
/// the one `mv` was applied to, use [`undo_move`] with the index the item
/// held before the move.
#[must_use]
pub fn invert_move(mv: &Move) -> Move {
    mv.inverted()
}

/// Undo `mv` exactly, reinserting the item at `origin_index` in its source
/// lane.
///
/// # Errors
///
/// See [`apply_move_at`].
pub fn undo_move(board: &Board, mv: &Move, origin_index: usize) -> Result<Board, PipelineError> {
    apply_move_at(board, &mv.inverted(), Some(origin_index))
}

/// Apply `mv`, appending the item at the end of the target lane.
///
/// # Errors
///
/// See [`apply_move_at`].
pub fn apply_move(board: &Board, mv: &Move) -> Result<Board, PipelineError> {
    apply_move_at(board, mv, None)
}

/// Apply `mv`, inserting the item at `index` in the target lane (clamped to
/// the lane length), or appending when `index` is `None`.
///
/// # Errors
///
/// - [`PipelineError::InvalidMove`] if `from == to`
/// - [`PipelineError::InvalidStage`] if either stage has no lane
/// - [`PipelineError::ItemNotFound`] if the item is not on the board
/// - [`PipelineError::BoardInvariantViolation`] if the item is on the board
///   but not in `from`
pub fn apply_move_at(
    board: &Board,
    mv: &Move,
    index: Option<usize>,
) -> Result<Board, PipelineError> {
    if mv.from == mv.to {
        return Err(PipelineError::InvalidMove {
            item: mv.item_id.clone(),
            stage: mv.to.to_string(),
        });
    }
    if board.lane(&mv.to).is_none() {
        return Err(PipelineError::invalid_stage(mv.to.as_str()));
    }
    let source = board
        .lane(&mv.from)
        .ok_or_else(|| PipelineError::invalid_stage(mv.from.as_str()))?;

    let Some(position) = source.iter().position(|id| id == &mv.item_id) else {
        return Err(match board.stage_of(&mv.item_id) {
            Some(actual) => PipelineError::invariant(
                &mv.item_id,
                format!("expected in {} but found in {actual}", mv.from),
            ),
            None => PipelineError::ItemNotFound(mv.item_id.clone()),
        });
    };

    let mut next = board.clone();
    if let Some(lane) = next.lane_mut(&mv.from) {
        lane.items.remove(position);
    }
    if let Some(lane) = next.lane_mut(&mv.to) {
        let at = index.map_or(lane.items.len(), |i| i.min(lane.items.len()));
        lane.items.insert(at, mv.item_id.clone());
    }
    Ok(next)
}
