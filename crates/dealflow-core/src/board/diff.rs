//! Board diff engine.
//!
//! Given the board before and after a single drag gesture, recover the one
//! move the gesture made. Per-stage set differences give the items that
//! left and entered each stage; exactly one item may appear on both sides.
//!
//! Outcomes:
//!
//! | Difference | Result |
//! |---|---|
//! | no membership change (pure reorder) | [`BoardDiff::NoOp`] |
//! | one item left stage A and entered stage B | [`BoardDiff::Move`] |
//! | more than one item changed stage | [`PipelineError::AmbiguousMove`] |
//! | an item left without entering, or entered without leaving | [`PipelineError::BoardInvariantViolation`] |
//!
//! Lanes that are identical in both snapshots are skipped without building
//! sets. Every lane is still visited before the result is decided, so an
//! orphaned or extra item anywhere on the board is caught.

use super::{Board, Move};
use crate::error::PipelineError;
use crate::model::item::ItemId;
use crate::model::stage::Stage;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Result of diffing two board snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardDiff {
    /// No item changed stage. Lane order may still differ.
    NoOp,
    /// Exactly one item changed stage.
    Move(Move),
}

/// Compute the single stage move between `previous` and `next`.
///
/// # Errors
///
/// - [`PipelineError::InvalidStage`] if the boards do not share the same lanes
/// - [`PipelineError::AmbiguousMove`] if more than one item changed stage
/// - [`PipelineError::BoardInvariantViolation`] if an item is duplicated,
///   disappeared, or appeared from nowhere
pub fn diff_boards(previous: &Board, next: &Board) -> Result<BoardDiff, PipelineError> {
    previous.check_invariants()?;
    next.check_invariants()?;

    if let Some(stage) = next.stages().find(|stage| previous.lane(stage).is_none()) {
        return Err(PipelineError::invalid_stage(stage.as_str()));
    }

    let mut left: BTreeMap<&ItemId, &Stage> = BTreeMap::new();
    let mut entered: BTreeMap<&ItemId, &Stage> = BTreeMap::new();

    for lane in previous.lanes() {
        let Some(next_items) = next.lane(&lane.stage) else {
            return Err(PipelineError::invalid_stage(lane.stage.as_str()));
        };
        if lane.items.as_slice() == next_items {
            continue;
        }

        let before: HashSet<&ItemId> = lane.items.iter().collect();
        let after: HashSet<&ItemId> = next_items.iter().collect();
        if before == after {
            continue;
        }

        for id in before.difference(&after) {
            left.insert(*id, &lane.stage);
        }
        for id in after.difference(&before) {
            entered.insert(*id, &lane.stage);
        }
    }

    if let Some((id, stage)) = left.iter().find(|(id, _)| !entered.contains_key(*id)) {
        warn!(item = %id, stage = %stage, "item left a stage without entering another");
        return Err(PipelineError::invariant(
            id,
            format!("left {stage} without entering another stage"),
        ));
    }
    if let Some((id, stage)) = entered.iter().find(|(id, _)| !left.contains_key(*id)) {
        warn!(item = %id, stage = %stage, "item entered a stage without leaving another");
        return Err(PipelineError::invariant(
            id,
            format!("entered {stage} without leaving another stage"),
        ));
    }

    let mut moved = left.into_iter().map(|(id, from)| (id, from, entered[id]));
    match (moved.next(), moved.next()) {
        (None, _) => {
            debug!("board diff: no stage change");
            Ok(BoardDiff::NoOp)
        }
        (Some((id, from, to)), None) => {
            let mv = Move::new(id.clone(), from.clone(), to.clone());
            debug!(%mv, "board diff: single move");
            Ok(BoardDiff::Move(mv))
        }
        (Some(first), Some(second)) => {
            let items: Vec<ItemId> = [first, second]
                .into_iter()
                .chain(moved)
                .map(|(id, _, _)| id.clone())
                .collect();
            Err(PipelineError::AmbiguousMove { items })
        }
    }
}
