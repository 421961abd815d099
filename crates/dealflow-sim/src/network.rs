//! Simulated persistence link between the board and the deal server.
//!
//! The server model (a [`MemoryDealStore`]) handles requests in the order
//! they are sent, unless the link drops the request on the way in. Only the
//! replies ride the link: each waits a random delay, ready replies can come
//! back reversed, and a reply can be delivered twice. A lost reply reports
//! a transport failure for a write the server did apply; the link remembers
//! those items.

use std::collections::BTreeSet;

use dealflow_core::{
    Item, ItemId, MemoryDealStore, Move, PendingRequest, PersistError, Stage, StagePersistence,
};
use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

/// Fault injection knobs, all in percent except the delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Maximum delivery delay in rounds.
    pub max_delay_rounds: u8,
    /// Requests that fail in transit and never reach the server.
    pub fail_rate_percent: u8,
    /// Requests the server applies whose reply is lost and reported as a
    /// transport failure.
    pub lost_reply_rate_percent: u8,
    /// Replies delivered twice.
    pub duplicate_rate_percent: u8,
    /// Chance per round that the ready replies arrive in reverse order.
    pub reorder_rate_percent: u8,
}

impl FaultConfig {
    /// A link that never fails, delays or reorders.
    #[must_use]
    pub const fn reliable() -> Self {
        Self {
            max_delay_rounds: 0,
            fail_rate_percent: 0,
            lost_reply_rate_percent: 0,
            duplicate_rate_percent: 0,
            reorder_rate_percent: 0,
        }
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_delay_rounds: 3,
            fail_rate_percent: 20,
            lost_reply_rate_percent: 5,
            duplicate_rate_percent: 3,
            reorder_rate_percent: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct InFlight {
    deliver_at_round: u64,
    request: PendingRequest,
    outcome: Result<Item, PersistError>,
    duplicated: bool,
}

/// A reply ready to be fed into `resolve`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub request: PendingRequest,
    pub outcome: Result<Item, PersistError>,
}

/// Replies delivered in one round.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliverOutcome {
    pub replies: Vec<Reply>,
    /// Whether the ready replies were reversed.
    pub reordered: bool,
}

/// Deterministic fault-injecting persistence link.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedNetwork {
    in_flight: Vec<InFlight>,
    lost_replies: BTreeSet<ItemId>,
    fault: FaultConfig,
}

impl SimulatedNetwork {
    #[must_use]
    pub const fn new(fault: FaultConfig) -> Self {
        Self {
            in_flight: Vec::new(),
            lost_replies: BTreeSet::new(),
            fault,
        }
    }

    #[must_use]
    pub const fn fault_config(&self) -> FaultConfig {
        self.fault
    }

    /// Items whose server write was reported back as a failure.
    #[must_use]
    pub const fn lost_reply_items(&self) -> &BTreeSet<ItemId> {
        &self.lost_replies
    }

    /// Replies still waiting for delivery.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Hand a request to `server` and queue its reply. Returns the delay
    /// the reply was given.
    pub fn send(
        &mut self,
        request: PendingRequest,
        round: u64,
        server: &mut MemoryDealStore,
        rng: &mut DeterministicRng,
    ) -> u8 {
        let outcome = self.exchange(&request, server, rng);
        let bound = u64::from(self.fault.max_delay_rounds).saturating_add(1);
        let delay = u8::try_from(rng.next_bounded(bound)).unwrap_or(self.fault.max_delay_rounds);
        let duplicated = rng.hit_rate_percent(self.fault.duplicate_rate_percent);
        self.in_flight.push(InFlight {
            deliver_at_round: round.saturating_add(u64::from(delay)),
            request,
            outcome,
            duplicated,
        });
        delay
    }

    /// Collect every reply due by `round`.
    pub fn deliver_ready(&mut self, round: u64, rng: &mut DeterministicRng) -> DeliverOutcome {
        let (ready, future): (Vec<InFlight>, Vec<InFlight>) = self
            .in_flight
            .drain(..)
            .partition(|call| call.deliver_at_round <= round);
        self.in_flight = future;

        let mut replies = Vec::with_capacity(ready.len());
        for call in ready {
            if call.duplicated {
                replies.push(Reply {
                    request: call.request.clone(),
                    outcome: call.outcome.clone(),
                });
            }
            replies.push(Reply {
                request: call.request,
                outcome: call.outcome,
            });
        }

        let reordered = replies.len() > 1 && rng.hit_rate_percent(self.fault.reorder_rate_percent);
        if reordered {
            replies.reverse();
        }
        DeliverOutcome { replies, reordered }
    }

    fn exchange(
        &mut self,
        request: &PendingRequest,
        server: &mut MemoryDealStore,
        rng: &mut DeterministicRng,
    ) -> Result<Item, PersistError> {
        if rng.hit_rate_percent(self.fault.fail_rate_percent) {
            return Err(PersistError::Transport("injected failure".into()));
        }
        let outcome = server.apply_stage_move(request.item_id(), &request.stage_move().to);
        if outcome.is_ok() && rng.hit_rate_percent(self.fault.lost_reply_rate_percent) {
            self.lost_replies.insert(request.item_id().clone());
            return Err(PersistError::Transport("reply lost".into()));
        }
        outcome
    }

    /// Borrow the server through this link for one synchronous batch call.
    /// The batch fails in transit with the configured failure rate.
    pub fn batch_link<'a>(
        &self,
        server: &'a mut MemoryDealStore,
        rng: &mut DeterministicRng,
    ) -> BatchLink<'a> {
        BatchLink {
            server,
            fail: rng.hit_rate_percent(self.fault.fail_rate_percent),
        }
    }
}

/// Synchronous persistence handle used for batch commits.
#[derive(Debug)]
pub struct BatchLink<'a> {
    server: &'a mut MemoryDealStore,
    fail: bool,
}

impl StagePersistence for BatchLink<'_> {
    fn apply_stage_move(
        &mut self,
        item_id: &ItemId,
        target: &Stage,
    ) -> Result<Item, PersistError> {
        if self.fail {
            return Err(PersistError::Transport("injected failure".into()));
        }
        self.server.apply_stage_move(item_id, target)
    }

    fn apply_stage_moves(&mut self, moves: &[Move]) -> Result<Vec<Item>, PersistError> {
        if self.fail {
            return Err(PersistError::Transport("injected batch failure".into()));
        }
        self.server.apply_stage_moves(moves)
    }
}
