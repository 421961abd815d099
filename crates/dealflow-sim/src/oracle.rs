//! Invariant checks run by the simulator after every step and once the
//! link has drained.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use dealflow_core::{Board, ItemId, MemoryDealStore, Move, Stage};
use serde::Serialize;

/// Outcome of an item's latest move as far as the board host knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveOutcome {
    Pending,
    Committed,
    Failed,
}

/// The latest move the host made for one item. `seq` is `None` for batch
/// moves, which carry no request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatestMove {
    pub stage_move: Move,
    pub seq: Option<u64>,
    pub outcome: MoveOutcome,
}

impl LatestMove {
    /// Where a committed move pins the item once everything has resolved.
    /// A failed move pins nothing: the item falls back to whatever the
    /// server holds, which may be older than the move's source.
    #[must_use]
    pub const fn committed_stage(&self) -> Option<&Stage> {
        match self.outcome {
            MoveOutcome::Committed => Some(&self.stage_move.to),
            MoveOutcome::Pending | MoveOutcome::Failed => None,
        }
    }
}

/// Aggregated result of one or more checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OracleResult {
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    #[must_use]
    pub const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    #[must_use]
    pub const fn fail(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: false,
            violations,
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        if violations.is_empty() {
            Self::pass()
        } else {
            Self::fail(violations)
        }
    }

    /// Fold `other` into this result; failures accumulate.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

/// A broken invariant, with enough context to replay it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvariantViolation {
    /// An item is missing, duplicated, or unexpected on the board.
    Membership {
        round: u64,
        item: ItemId,
        /// How many lanes list the item.
        occurrences: usize,
    },
    /// Resolving an outdated outcome changed the board.
    StaleOutcomeChangedBoard { round: u64, seq: u64, stage_move: Move },
    /// The controller's resolution disagrees with the host's view of which
    /// move is latest.
    UnexpectedResolution {
        round: u64,
        seq: u64,
        stage_move: Move,
        resolution: String,
    },
    /// After draining, an item is not where its latest move says it should be.
    Settlement {
        item: ItemId,
        expected: Option<Stage>,
        actual: Option<Stage>,
    },
    /// After draining, the board and the server disagree on an item whose
    /// replies all arrived intact.
    ServerDivergence {
        item: ItemId,
        board: Option<Stage>,
        server: Option<Stage>,
    },
    /// After draining, the controller still reports unresolved moves.
    Unresolved { item: ItemId },
    /// The controller returned an error for a well-formed call.
    ControllerError { round: u64, detail: String },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Membership {
                round,
                item,
                occurrences,
            } => write!(f, "Membership: round {round}: {item} appears {occurrences} times"),
            Self::StaleOutcomeChangedBoard {
                round,
                seq,
                stage_move,
            } => write!(
                f,
                "StaleOutcome: round {round}: superseded seq={seq} ({stage_move}) changed the board"
            ),
            Self::UnexpectedResolution {
                round,
                seq,
                stage_move,
                resolution,
            } => write!(
                f,
                "UnexpectedResolution: round {round}: latest seq={seq} ({stage_move}) resolved as {resolution}"
            ),
            Self::Settlement {
                item,
                expected,
                actual,
            } => write!(
                f,
                "Settlement: {item} expected in {} but found in {}",
                display_stage(expected.as_ref()),
                display_stage(actual.as_ref())
            ),
            Self::ServerDivergence {
                item,
                board,
                server,
            } => write!(
                f,
                "ServerDivergence: {item} on board in {} but server has {}",
                display_stage(board.as_ref()),
                display_stage(server.as_ref())
            ),
            Self::Unresolved { item } => write!(f, "Unresolved: {item} still pending after drain"),
            Self::ControllerError { round, detail } => {
                write!(f, "ControllerError: round {round}: {detail}")
            }
        }
    }
}

fn display_stage(stage: Option<&Stage>) -> &str {
    stage.map_or("<none>", Stage::as_str)
}

/// Stateless invariant checks.
pub struct BoardOracle;

impl BoardOracle {
    /// Every expected item sits in exactly one lane, and nothing else does.
    #[must_use]
    pub fn check_membership(board: &Board, expected: &BTreeSet<ItemId>, round: u64) -> OracleResult {
        let mut counts: BTreeMap<&ItemId, usize> = expected.iter().map(|id| (id, 0)).collect();
        for id in board.item_ids() {
            *counts.entry(id).or_insert(0) += 1;
        }

        let violations = counts
            .into_iter()
            .filter(|(id, count)| *count != 1 || !expected.contains(*id))
            .map(|(id, occurrences)| InvariantViolation::Membership {
                round,
                item: id.clone(),
                occurrences,
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    /// A superseded outcome leaves the board exactly as it was.
    #[must_use]
    pub fn check_stale_outcome(
        before: &Board,
        after: &Board,
        seq: u64,
        stage_move: &Move,
        round: u64,
    ) -> OracleResult {
        if before == after {
            return OracleResult::pass();
        }
        OracleResult::fail(vec![InvariantViolation::StaleOutcomeChangedBoard {
            round,
            seq,
            stage_move: stage_move.clone(),
        }])
    }

    /// Once nothing is in flight, no latest move is undecided and every
    /// item whose latest move committed sits at that move's target.
    #[must_use]
    pub fn check_settled<'a>(
        board: &Board,
        latest: &BTreeMap<ItemId, LatestMove>,
        still_pending: impl IntoIterator<Item = &'a ItemId>,
    ) -> OracleResult {
        let mut violations: Vec<InvariantViolation> = still_pending
            .into_iter()
            .map(|id| InvariantViolation::Unresolved { item: id.clone() })
            .collect();

        for (id, mv) in latest {
            let actual = board.stage_of(id);
            let mismatch = match mv.outcome {
                MoveOutcome::Pending => true,
                MoveOutcome::Committed => mv.committed_stage() != actual,
                MoveOutcome::Failed => false,
            };
            if mismatch {
                violations.push(InvariantViolation::Settlement {
                    item: id.clone(),
                    expected: mv.committed_stage().cloned(),
                    actual: actual.cloned(),
                });
            }
        }
        OracleResult::from_violations(violations)
    }

    /// Once nothing is in flight, the board shows every item in the stage
    /// the server holds. Items in `exempt` had a reply lost, so the board
    /// was told a write failed that the server kept.
    #[must_use]
    pub fn check_server_agreement(
        board: &Board,
        server: &MemoryDealStore,
        exempt: &BTreeSet<ItemId>,
    ) -> OracleResult {
        let violations = board
            .item_ids()
            .filter(|id| !exempt.contains(*id))
            .filter_map(|id| {
                let on_board = board.stage_of(id);
                let on_server = server.get(id).map(|item| &item.stage);
                (on_board != on_server).then(|| InvariantViolation::ServerDivergence {
                    item: id.clone(),
                    board: on_board.cloned(),
                    server: on_server.cloned(),
                })
            })
            .collect();
        OracleResult::from_violations(violations)
    }
}
