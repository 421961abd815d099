//! dealflow-sim library.
//!
//! Drives a [`ReconciliationController`] through random drags and batch
//! commits against a [`SimulatedNetwork`] that delays, reorders, duplicates
//! and fails persistence replies. The [`oracle`] checks board invariants
//! after every step, and once the link drains it checks the settled board
//! against the server model.
//!
//! # Conventions
//!
//! - **Errors**: setup problems are `anyhow::Result`; invariant breaks are
//!   reported as [`oracle::InvariantViolation`]s, never as errors.
//! - **Logging**: `tracing` macros (`debug!` per step, `info!` per run).

pub mod campaign;
pub mod network;
pub mod oracle;
pub mod rng;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result, bail};
use dealflow_core::{
    Board, BoardStore, Item, ItemId, MemoryDealStore, Move, PendingRequest, PersistError,
    PipelineError, ReconciliationController, Resolution, Stage, StageSet,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::network::{FaultConfig, SimulatedNetwork};
use crate::oracle::{BoardOracle, InvariantViolation, LatestMove, MoveOutcome, OracleResult};
use crate::rng::DeterministicRng;

/// Parameters for one simulated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    /// Deals on the board, spread across stages.
    pub items: usize,
    /// Rounds with user activity. The link is drained afterwards.
    pub rounds: u64,
    /// Upper bound on drags per round.
    pub max_drags_per_round: u8,
    /// Chance per round of a bulk move.
    pub batch_rate_percent: u8,
    pub fault: FaultConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            items: 8,
            rounds: 40,
            max_drags_per_round: 3,
            batch_rate_percent: 10,
            fault: FaultConfig::default(),
        }
    }
}

/// One observable step of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEvent {
    Submit {
        round: u64,
        seq: u64,
        stage_move: Move,
        delay_rounds: u8,
    },
    Resolve {
        round: u64,
        seq: u64,
        stage_move: Move,
        /// `ok` or the persistence error code.
        outcome: String,
        resolution: Resolution,
    },
    Batch {
        round: u64,
        moves: Vec<Move>,
        committed: bool,
    },
}

/// Counters over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimulationStats {
    pub submitted: usize,
    pub committed: usize,
    pub rolled_back: usize,
    pub superseded: usize,
    pub batches_committed: usize,
    pub batches_failed: usize,
    pub drain_rounds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationResult {
    pub seed: u64,
    pub trace: Vec<TraceEvent>,
    pub oracle: OracleResult,
    pub final_board: Board,
    pub stats: SimulationStats,
    /// A superseded outcome and a rollback both happened, so the stale-
    /// outcome path was actually exercised.
    pub interesting_state_reached: bool,
}

/// Deterministic driver for one seed.
#[derive(Debug)]
pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    stages: StageSet,
    item_ids: Vec<ItemId>,
    expected: BTreeSet<ItemId>,
    controller: ReconciliationController,
    server: MemoryDealStore,
    network: SimulatedNetwork,
    latest: BTreeMap<ItemId, LatestMove>,
    trace: Vec<TraceEvent>,
    oracle: OracleResult,
    stats: SimulationStats,
    round: u64,
}

impl Simulator {
    /// Seed the board and the server model with the same deals.
    ///
    /// # Errors
    ///
    /// Returns an error if `items` is zero or the seeded board is invalid.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        if config.items == 0 {
            bail!("items must be > 0");
        }
        let stages = StageSet::default();
        if stages.len() < 2 {
            bail!("simulation needs at least two stages");
        }

        let items: Vec<Item> = (0..config.items)
            .map(|i| {
                let stage = stages.stages()[i % stages.len()].clone();
                Item::new(ItemId::new(format!("deal-{i:04}")), stage).with_field("amount", i * 1_000)
            })
            .collect();

        let mut server = MemoryDealStore::new(stages.clone());
        for item in &items {
            server
                .insert(item.clone())
                .with_context(|| format!("failed to seed server with {}", item.id))?;
        }
        let item_ids: Vec<ItemId> = items.iter().map(|item| item.id.clone()).collect();
        let store = BoardStore::from_items(stages.clone(), items)
            .context("failed to seed board store")?;

        Ok(Self {
            rng: DeterministicRng::new(config.seed),
            expected: item_ids.iter().cloned().collect(),
            item_ids,
            stages,
            controller: ReconciliationController::new(store),
            server,
            network: SimulatedNetwork::new(config.fault),
            latest: BTreeMap::new(),
            trace: Vec::new(),
            oracle: OracleResult::pass(),
            stats: SimulationStats::default(),
            round: 0,
            config,
        })
    }

    /// Run every round, drain the link and check the settled board.
    ///
    /// # Errors
    ///
    /// Returns an error if the link fails to drain, which means replies
    /// are being generated without bound.
    pub fn run(&mut self) -> Result<SimulationResult> {
        for round in 0..self.config.rounds {
            self.round = round;
            self.step_round();
        }

        let drain_limit = u64::from(self.config.fault.max_delay_rounds) + 1;
        while !self.network.is_idle() {
            self.round += 1;
            self.stats.drain_rounds += 1;
            if self.stats.drain_rounds > drain_limit {
                bail!(
                    "link still busy after {drain_limit} drain rounds (seed {})",
                    self.config.seed
                );
            }
            self.deliver();
        }

        let settled = BoardOracle::check_settled(
            self.controller.board(),
            &self.latest,
            self.controller.pending_items(),
        );
        self.record(settled);
        let agreement = BoardOracle::check_server_agreement(
            self.controller.board(),
            &self.server,
            self.network.lost_reply_items(),
        );
        self.record(agreement);

        let interesting = self.stats.superseded > 0 && self.stats.rolled_back > 0;
        info!(
            seed = self.config.seed,
            submitted = self.stats.submitted,
            rolled_back = self.stats.rolled_back,
            superseded = self.stats.superseded,
            passed = self.oracle.passed,
            "simulation finished"
        );

        Ok(SimulationResult {
            seed: self.config.seed,
            trace: self.trace.clone(),
            oracle: self.oracle.clone(),
            final_board: self.controller.board().clone(),
            stats: self.stats,
            interesting_state_reached: interesting,
        })
    }

    fn step_round(&mut self) {
        let drags = self
            .rng
            .next_bounded(u64::from(self.config.max_drags_per_round) + 1);
        for _ in 0..drags {
            self.drag();
        }
        if self.rng.hit_rate_percent(self.config.batch_rate_percent) {
            self.bulk_move();
        }
        self.deliver();
    }

    /// Pick a random deal and a stage other than the one the board shows.
    fn random_move(&mut self, id: ItemId) -> Option<Move> {
        let from = self.controller.board().stage_of(&id)?.clone();
        let from_index = self.stages.index(&from).ok()?;
        let to_index = self.rng.pick_index_except(self.stages.len(), from_index);
        let to: Stage = self.stages.stages()[to_index].clone();
        Some(Move::new(id, from, to))
    }

    fn drag(&mut self) {
        let id = self.item_ids[self.rng.pick_index(self.item_ids.len())].clone();
        let Some(mv) = self.random_move(id) else {
            self.controller_error("drag source missing for a seeded deal".to_string());
            return;
        };

        match self.controller.submit(mv.clone()) {
            Ok(request) => {
                self.stats.submitted += 1;
                let delay = self.network.send(
                    request.clone(),
                    self.round,
                    &mut self.server,
                    &mut self.rng,
                );
                debug!(round = self.round, seq = request.seq(), stage_move = %mv, delay, "drag submitted");
                self.latest.insert(
                    mv.item_id.clone(),
                    LatestMove {
                        stage_move: mv.clone(),
                        seq: Some(request.seq()),
                        outcome: MoveOutcome::Pending,
                    },
                );
                self.trace.push(TraceEvent::Submit {
                    round: self.round,
                    seq: request.seq(),
                    stage_move: mv,
                    delay_rounds: delay,
                });
            }
            Err(err) => self.controller_error(format!("submit {mv}: {err}")),
        }
        self.check_membership();
    }

    fn bulk_move(&mut self) {
        let count = 1 + self.rng.pick_index(3.min(self.item_ids.len()));
        let mut picked = BTreeSet::new();
        let mut moves = Vec::with_capacity(count);
        while picked.len() < count {
            let id = self.item_ids[self.rng.pick_index(self.item_ids.len())].clone();
            if !picked.insert(id.clone()) {
                continue;
            }
            if let Some(mv) = self.random_move(id) {
                moves.push(mv);
            }
        }

        let mut link = self.network.batch_link(&mut self.server, &mut self.rng);
        let committed = match self.controller.commit_batch(&moves, &mut link) {
            Ok(_) => {
                self.stats.batches_committed += 1;
                for mv in &moves {
                    self.latest.insert(
                        mv.item_id.clone(),
                        LatestMove {
                            stage_move: mv.clone(),
                            seq: None,
                            outcome: MoveOutcome::Committed,
                        },
                    );
                }
                true
            }
            Err(PipelineError::Persistence(_)) => {
                self.stats.batches_failed += 1;
                false
            }
            Err(err) => {
                self.controller_error(format!("batch of {}: {err}", moves.len()));
                false
            }
        };
        debug!(round = self.round, moves = moves.len(), committed, "bulk move");
        self.trace.push(TraceEvent::Batch {
            round: self.round,
            moves,
            committed,
        });
        self.check_membership();
    }

    fn deliver(&mut self) {
        let delivered = self.network.deliver_ready(self.round, &mut self.rng);
        for reply in delivered.replies {
            self.resolve(&reply.request, reply.outcome);
        }
    }

    fn resolve(&mut self, request: &PendingRequest, outcome: Result<Item, PersistError>) {
        let outcome_label = match &outcome {
            Ok(_) => "ok".to_string(),
            Err(err) => err.code().code().to_string(),
        };
        let before = self.controller.board().clone();
        let mv = request.stage_move().clone();

        let resolution = match self.controller.resolve(request, outcome) {
            Ok(resolution) => resolution,
            Err(err) => {
                self.controller_error(format!("resolve {mv}: {err}"));
                return;
            }
        };

        match resolution {
            Resolution::Committed => self.stats.committed += 1,
            Resolution::RolledBack => self.stats.rolled_back += 1,
            Resolution::Superseded => {
                self.stats.superseded += 1;
                let check = BoardOracle::check_stale_outcome(
                    &before,
                    self.controller.board(),
                    request.seq(),
                    &mv,
                    self.round,
                );
                self.record(check);
            }
            Resolution::Discarded => {}
        }
        self.track_latest(request, &mv, resolution);

        self.trace.push(TraceEvent::Resolve {
            round: self.round,
            seq: request.seq(),
            stage_move: mv,
            outcome: outcome_label,
            resolution,
        });
        self.check_membership();
    }

    /// Update the host's view of the latest move. Only the first reply for
    /// the latest request decides it; duplicates and older replies do not.
    fn track_latest(&mut self, request: &PendingRequest, mv: &Move, resolution: Resolution) {
        let undecided = self.latest.get(request.item_id()).is_some_and(|latest| {
            latest.seq == Some(request.seq()) && latest.outcome == MoveOutcome::Pending
        });
        if !undecided {
            return;
        }
        let outcome = match resolution {
            Resolution::Committed => MoveOutcome::Committed,
            Resolution::RolledBack => MoveOutcome::Failed,
            Resolution::Superseded | Resolution::Discarded => {
                let violation = InvariantViolation::UnexpectedResolution {
                    round: self.round,
                    seq: request.seq(),
                    stage_move: mv.clone(),
                    resolution: format!("{resolution:?}"),
                };
                self.record(OracleResult::fail(vec![violation]));
                return;
            }
        };
        if let Some(latest) = self.latest.get_mut(request.item_id()) {
            latest.outcome = outcome;
        }
    }

    fn check_membership(&mut self) {
        let check =
            BoardOracle::check_membership(self.controller.board(), &self.expected, self.round);
        self.record(check);
    }

    fn controller_error(&mut self, detail: String) {
        let violation = InvariantViolation::ControllerError {
            round: self.round,
            detail,
        };
        self.record(OracleResult::fail(vec![violation]));
    }

    fn record(&mut self, result: OracleResult) {
        if !result.passed {
            for violation in &result.violations {
                debug!(seed = self.config.seed, %violation, "invariant violated");
            }
        }
        let current = std::mem::replace(&mut self.oracle, OracleResult::pass());
        self.oracle = current.merge(result);
    }
}

#[cfg(test)]
mod tests {
    use super::{SimulationConfig, Simulator, TraceEvent};
    use crate::network::FaultConfig;
    use dealflow_core::Resolution;

    #[test]
    fn reliable_run_commits_every_drag() {
        let mut sim = Simulator::new(SimulationConfig {
            seed: 11,
            batch_rate_percent: 0,
            fault: FaultConfig::reliable(),
            ..SimulationConfig::default()
        })
        .expect("sim");
        let result = sim.run().expect("run");

        assert!(result.oracle.passed, "{:?}", result.oracle.violations);
        assert_eq!(result.stats.rolled_back, 0);
        // Two drags of one deal in a round leave the first reply superseded.
        assert_eq!(
            result.stats.committed + result.stats.superseded,
            result.stats.submitted
        );
        assert_eq!(result.final_board.len(), 8);
    }

    #[test]
    fn faulty_run_keeps_invariants() {
        let mut sim = Simulator::new(SimulationConfig {
            seed: 7,
            rounds: 80,
            ..SimulationConfig::default()
        })
        .expect("sim");
        let result = sim.run().expect("run");
        assert!(result.oracle.passed, "{:?}", result.oracle.violations);
        assert!(result.stats.submitted > 0);
    }

    #[test]
    fn always_failing_link_settles_every_item_at_its_source() {
        let mut sim = Simulator::new(SimulationConfig {
            seed: 3,
            batch_rate_percent: 50,
            fault: FaultConfig {
                fail_rate_percent: 100,
                max_delay_rounds: 2,
                ..FaultConfig::reliable()
            },
            ..SimulationConfig::default()
        })
        .expect("sim");
        let result = sim.run().expect("run");

        assert!(result.oracle.passed, "{:?}", result.oracle.violations);
        assert_eq!(result.stats.committed, 0);
        assert_eq!(result.stats.batches_committed, 0);
        assert!(result.trace.iter().all(|event| !matches!(
            event,
            TraceEvent::Resolve {
                resolution: Resolution::Committed,
                ..
            }
        )));
    }

    #[test]
    fn failing_chains_settle_where_the_server_is() {
        let mut sim = Simulator::new(SimulationConfig {
            seed: 41,
            items: 2,
            rounds: 60,
            max_drags_per_round: 4,
            batch_rate_percent: 0,
            fault: FaultConfig {
                max_delay_rounds: 4,
                fail_rate_percent: 60,
                reorder_rate_percent: 50,
                ..FaultConfig::reliable()
            },
        })
        .expect("sim");
        let result = sim.run().expect("run");

        assert!(result.oracle.passed, "{:?}", result.oracle.violations);
        assert!(result.stats.rolled_back > 0);
        assert!(result.stats.superseded > 0);
        for id in result.final_board.item_ids() {
            assert_eq!(
                result.final_board.stage_of(id),
                sim.server.get(id).map(|item| &item.stage)
            );
        }
    }

    #[test]
    fn same_seed_reproduces_trace() {
        let config = SimulationConfig {
            seed: 99,
            ..SimulationConfig::default()
        };
        let a = Simulator::new(config).expect("sim").run().expect("run");
        let b = Simulator::new(config).expect("sim").run().expect("run");
        assert_eq!(a, b);
    }

    #[test]
    fn zero_items_is_rejected() {
        assert!(
            Simulator::new(SimulationConfig {
                items: 0,
                ..SimulationConfig::default()
            })
            .is_err()
        );
    }
}
