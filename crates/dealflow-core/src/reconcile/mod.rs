//! Reconciliation controller.
//!
//! Coordinates optimistic moves with their persistence outcome, one record
//! per item:
//!
//! ```text
//! Idle --submit(m)--> Pending(m) --success--> Idle
//!                         |
//!                         +--failure--> RollingBack(m) --invert(m)--> Idle
//! ```
//!
//! The controller is sans-IO. [`ReconciliationController::submit`] applies
//! the move to the board and hands back a [`PendingRequest`]; the host
//! performs the persistence call however it likes (a thread, a runtime,
//! a simulated network) and reports the outcome with
//! [`ReconciliationController::resolve`].
//!
//! # Staleness
//!
//! Every submit draws a fresh sequence number. A record remembers the
//! requests still in flight and the newest move the server confirmed. The
//! board always shows the target of whichever is newer: the newest
//! in-flight move or the confirmed stage.
//!
//! A failure only acts on the board when its move is the one the board
//! currently reflects (no newer move in flight, none confirmed) and the item
//! still sits in the move's target stage. The item then goes back to the
//! next-newest expectation, which is the move's source stage in the simple
//! case. Anything else is superseded: a stale failure never rolls back a
//! newer optimistic move. Outcomes delivered twice are superseded as well.

pub mod store;

pub use store::BoardStore;

use crate::board::{Board, BoardDiff, Move, apply_move, apply_move_at, diff_boards, undo_move};
use crate::error::{PersistError, PipelineError};
use crate::model::item::{Item, ItemId};
use crate::model::stage::Stage;
use crate::persist::StagePersistence;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Reconciliation state of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    Idle,
    Pending,
    RollingBack,
}

impl fmt::Display for ReconcileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::RollingBack => "rolling_back",
        })
    }
}

/// Per-item record, created on the item's first move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileRecord {
    status: ReconcileStatus,
    pending_move: Option<Move>,
    latest_seq: u64,
    confirmed_seq: u64,
    confirmed_stage: Stage,
    in_flight: BTreeMap<u64, Move>,
}

impl ReconcileRecord {
    const fn new(confirmed_stage: Stage) -> Self {
        Self {
            status: ReconcileStatus::Idle,
            pending_move: None,
            latest_seq: 0,
            confirmed_seq: 0,
            confirmed_stage,
            in_flight: BTreeMap::new(),
        }
    }

    /// `Pending` while any request for the item is in flight.
    #[must_use]
    pub const fn status(&self) -> ReconcileStatus {
        self.status
    }

    /// The latest submitted move while it is unresolved.
    #[must_use]
    pub const fn pending_move(&self) -> Option<&Move> {
        self.pending_move.as_ref()
    }

    #[must_use]
    pub const fn latest_seq(&self) -> u64 {
        self.latest_seq
    }

    /// Stage of the newest move the server confirmed.
    #[must_use]
    pub const fn confirmed_stage(&self) -> &Stage {
        &self.confirmed_stage
    }

    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// The stage the board should show for the item.
    #[must_use]
    pub fn expected_stage(&self) -> &Stage {
        match self.in_flight.last_key_value() {
            Some((seq, mv)) if *seq > self.confirmed_seq => &mv.to,
            _ => &self.confirmed_stage,
        }
    }

    /// Whether the board currently reflects the move sent as `seq`.
    fn reflects(&self, seq: u64) -> bool {
        seq > self.confirmed_seq && self.in_flight.range(seq..).next().is_none()
    }

    fn confirm(&mut self, seq: u64, stage: Stage) {
        self.confirmed_seq = seq;
        self.confirmed_stage = stage;
    }

    fn settle(&mut self) {
        self.pending_move = self.in_flight.get(&self.latest_seq).cloned();
        self.status = if self.in_flight.is_empty() {
            ReconcileStatus::Idle
        } else {
            ReconcileStatus::Pending
        };
    }
}

/// A persistence call the host owes the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRequest {
    stage_move: Move,
    seq: u64,
    origin_index: usize,
}

impl PendingRequest {
    #[must_use]
    pub const fn item_id(&self) -> &ItemId {
        &self.stage_move.item_id
    }

    #[must_use]
    pub const fn stage_move(&self) -> &Move {
        &self.stage_move
    }

    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Index the item held in its source lane before the move.
    #[must_use]
    pub const fn origin_index(&self) -> usize {
        self.origin_index
    }
}

/// What [`ReconciliationController::resolve`] did with an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The latest move was confirmed; the board already shows it.
    Committed,
    /// A newer move exists; the board was left alone.
    Superseded,
    /// The move the board reflected failed; the item went back to the
    /// previous expectation.
    RolledBack,
    /// The item is no longer tracked.
    Discarded,
}

type RollbackListener = Box<dyn FnMut(&ItemId, &Move, &PersistError)>;
type BatchFailureListener = Box<dyn FnMut(&[Move], &PersistError)>;

pub struct ReconciliationController {
    store: BoardStore,
    records: BTreeMap<ItemId, ReconcileRecord>,
    next_seq: u64,
    rollback_listeners: Vec<RollbackListener>,
    batch_failure_listeners: Vec<BatchFailureListener>,
}

impl fmt::Debug for ReconciliationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationController")
            .field("store", &self.store)
            .field("records", &self.records)
            .field("next_seq", &self.next_seq)
            .field("rollback_listeners", &self.rollback_listeners.len())
            .field("batch_failure_listeners", &self.batch_failure_listeners.len())
            .finish()
    }
}

impl ReconciliationController {
    #[must_use]
    pub const fn new(store: BoardStore) -> Self {
        Self {
            store,
            records: BTreeMap::new(),
            next_seq: 0,
            rollback_listeners: Vec::new(),
            batch_failure_listeners: Vec::new(),
        }
    }

    #[must_use]
    pub const fn board(&self) -> &Board {
        self.store.board()
    }

    #[must_use]
    pub const fn store(&self) -> &BoardStore {
        &self.store
    }

    #[must_use]
    pub fn record(&self, id: &ItemId) -> Option<&ReconcileRecord> {
        self.records.get(id)
    }

    /// Status of an item; untracked items are idle.
    #[must_use]
    pub fn status(&self, id: &ItemId) -> ReconcileStatus {
        self.records
            .get(id)
            .map_or(ReconcileStatus::Idle, ReconcileRecord::status)
    }

    /// Items with requests in flight.
    pub fn pending_items(&self) -> impl Iterator<Item = &ItemId> {
        self.records
            .iter()
            .filter(|(_, record)| record.status == ReconcileStatus::Pending)
            .map(|(id, _)| id)
    }

    /// Called after an item snaps back to its source stage.
    pub fn on_rollback(&mut self, listener: impl FnMut(&ItemId, &Move, &PersistError) + 'static) {
        self.rollback_listeners.push(Box::new(listener));
    }

    /// Called once per failed batch.
    pub fn on_batch_failure(&mut self, listener: impl FnMut(&[Move], &PersistError) + 'static) {
        self.batch_failure_listeners.push(Box::new(listener));
    }

    /// Apply `mv` optimistically (appending to the target stage) and open a
    /// request for it.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidStage`] if either stage is not configured
    /// - reducer errors when the move does not fit the current board
    pub fn submit(&mut self, mv: Move) -> Result<PendingRequest, PipelineError> {
        self.submit_at(mv, None)
    }

    /// Like [`submit`](Self::submit), inserting at `index` in the target
    /// stage.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub fn submit_at(
        &mut self,
        mv: Move,
        index: Option<usize>,
    ) -> Result<PendingRequest, PipelineError> {
        let stages = self.store.stages();
        for stage in [&mv.from, &mv.to] {
            if !stages.contains(stage) {
                return Err(PipelineError::invalid_stage(stage.as_str()));
            }
        }

        let next = apply_move_at(self.store.board(), &mv, index)?;
        let origin_index = self
            .store
            .board()
            .locate(&mv.item_id)
            .map_or(0, |(_, at)| at);
        self.store.replace(next);

        self.next_seq += 1;
        let seq = self.next_seq;
        let record = self
            .records
            .entry(mv.item_id.clone())
            .or_insert_with(|| ReconcileRecord::new(mv.from.clone()));
        if let Some(previous) = &record.pending_move {
            debug!(item = %mv.item_id, superseded = %previous, "move superseded before resolution");
        }
        record.in_flight.insert(seq, mv.clone());
        record.latest_seq = seq;
        record.settle();

        debug!(stage_move = %mv, seq, "optimistic move applied");
        Ok(PendingRequest {
            stage_move: mv,
            seq,
            origin_index,
        })
    }

    /// Diff a proposed board (from a drag gesture) against the current one.
    ///
    /// A pure reorder replaces the board and returns `None`. A single stage
    /// change is submitted at the index the proposed board shows.
    ///
    /// # Errors
    ///
    /// Diff errors ([`PipelineError::AmbiguousMove`],
    /// [`PipelineError::BoardInvariantViolation`]) and submit errors. The
    /// current board is untouched on error.
    pub fn submit_proposed(
        &mut self,
        proposed: Board,
    ) -> Result<Option<PendingRequest>, PipelineError> {
        match diff_boards(self.store.board(), &proposed)? {
            BoardDiff::NoOp => {
                if &proposed != self.store.board() {
                    self.store.replace(proposed);
                }
                Ok(None)
            }
            BoardDiff::Move(mv) => {
                let index = proposed.locate(&mv.item_id).map(|(_, at)| at);
                self.submit_at(mv, index).map(Some)
            }
        }
    }

    /// Report the outcome of a request's persistence call.
    ///
    /// # Errors
    ///
    /// Only a broken board (the rollback cannot be applied) is an error;
    /// persistence failures are absorbed into [`Resolution::RolledBack`].
    pub fn resolve(
        &mut self,
        request: &PendingRequest,
        outcome: Result<Item, PersistError>,
    ) -> Result<Resolution, PipelineError> {
        let mv = &request.stage_move;
        let Some(record) = self.records.get_mut(&mv.item_id) else {
            debug!(stage_move = %mv, seq = request.seq, "resolution for untracked item discarded");
            return Ok(Resolution::Discarded);
        };
        if record.in_flight.remove(&request.seq).is_none() {
            debug!(stage_move = %mv, seq = request.seq, "outcome already resolved; ignored");
            return Ok(Resolution::Superseded);
        }
        let reflected = record.reflects(request.seq);
        let is_latest = request.seq == record.latest_seq;

        match outcome {
            Ok(item) => {
                if request.seq > record.confirmed_seq {
                    record.confirm(request.seq, mv.to.clone());
                    self.store.merge_server_fields(&item);
                }
                record.settle();
                if !is_latest {
                    debug!(stage_move = %mv, seq = request.seq, "stale success ignored");
                    return Ok(Resolution::Superseded);
                }
                if item.stage != mv.to {
                    warn!(
                        stage_move = %mv,
                        server_stage = %item.stage,
                        "server confirmed a different stage; keeping local stage"
                    );
                }
                info!(stage_move = %mv, seq = request.seq, "stage move committed");
                Ok(Resolution::Committed)
            }
            Err(err) => {
                let current = self.store.board().stage_of(&mv.item_id).cloned();
                if !reflected || current.as_ref() != Some(&mv.to) {
                    record.settle();
                    warn!(
                        stage_move = %mv,
                        seq = request.seq,
                        error = %err,
                        "stale failure discarded; item has moved since"
                    );
                    return Ok(Resolution::Superseded);
                }

                record.status = ReconcileStatus::RollingBack;
                let target = record.expected_stage().clone();
                if target != mv.to {
                    let restored = if target == mv.from {
                        undo_move(self.store.board(), mv, request.origin_index)
                    } else {
                        let back = Move::new(mv.item_id.clone(), mv.to.clone(), target.clone());
                        apply_move(self.store.board(), &back)
                    };
                    match restored {
                        Ok(restored) => self.store.replace(restored),
                        Err(board_err) => {
                            record.settle();
                            return Err(board_err);
                        }
                    }
                }
                record.settle();

                warn!(
                    stage_move = %mv,
                    restored = %target,
                    error = %err,
                    code = %err.code(),
                    "stage move rolled back"
                );
                for listener in &mut self.rollback_listeners {
                    listener(&mv.item_id, mv, &err);
                }
                Ok(Resolution::RolledBack)
            }
        }
    }

    /// Submit and persist in one call, for hosts whose persistence is
    /// synchronous.
    ///
    /// # Errors
    ///
    /// Submit errors, or a broken board during rollback.
    pub fn submit_and_persist<P>(
        &mut self,
        mv: Move,
        persistence: &mut P,
    ) -> Result<Resolution, PipelineError>
    where
        P: StagePersistence + ?Sized,
    {
        let request = self.submit(mv)?;
        let outcome = persistence.apply_stage_move(request.item_id(), &request.stage_move.to);
        self.resolve(&request, outcome)
    }

    /// Run a batch through `persistence` without optimistic application.
    ///
    /// On success each confirmed item is placed in its confirmed stage and
    /// any in-flight single move for it becomes superseded. A confirmed
    /// stage with no lane on this board is logged and skipped. On failure
    /// the board is untouched and batch-failure listeners fire once.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Persistence`] when the batch failed.
    pub fn commit_batch<P>(
        &mut self,
        moves: &[Move],
        persistence: &mut P,
    ) -> Result<Vec<Item>, PipelineError>
    where
        P: StagePersistence + ?Sized,
    {
        let items = match persistence.apply_stage_moves(moves) {
            Ok(items) => items,
            Err(err) => {
                warn!(moves = moves.len(), error = %err, "batch stage commit failed");
                for listener in &mut self.batch_failure_listeners {
                    listener(moves, &err);
                }
                return Err(err.into());
            }
        };

        let mut board = self.store.board().clone();
        let mut placed = Vec::with_capacity(items.len());
        for item in &items {
            let Some(current) = board.stage_of(&item.id).cloned() else {
                debug!(item = %item.id, "batch item not on board; skipped");
                continue;
            };
            if current != item.stage {
                let mv = Move::new(item.id.clone(), current, item.stage.clone());
                match apply_move(&board, &mv) {
                    Ok(next) => board = next,
                    Err(err) => {
                        warn!(stage_move = %mv, error = %err, "batch item has no lane; skipped");
                        continue;
                    }
                }
            }
            placed.push(item);
        }

        if &board != self.store.board() {
            self.store.replace(board);
        }
        for item in placed {
            self.next_seq += 1;
            if let Some(record) = self.records.get_mut(&item.id) {
                record.latest_seq = self.next_seq;
                record.confirm(self.next_seq, item.stage.clone());
                record.settle();
            }
            self.store.merge_server_fields(item);
        }

        info!(moves = items.len(), "batch reflected on board");
        Ok(items)
    }

    /// The item left the board; drop its record. Late outcomes for it are
    /// discarded.
    pub fn forget(&mut self, id: &ItemId) -> Option<Item> {
        self.records.remove(id);
        self.store.remove(id)
    }

    /// Release the store, handing back the final board.
    #[must_use]
    pub fn teardown(self) -> Board {
        if self.records.values().any(|r| !r.in_flight.is_empty()) {
            debug!("teardown with unresolved moves");
        }
        self.store.teardown()
    }
}

#[cfg(test)]
mod tests {
    use super::{BoardStore, ReconcileStatus, ReconciliationController, Resolution};
    use crate::board::Move;
    use crate::board::test_support::{board, stages};
    use crate::error::{PersistError, PipelineError};
    use crate::memory::MemoryDealStore;
    use crate::model::item::{Item, ItemId};
    use crate::model::stage::{Stage, StageSet};
    use crate::persist::StagePersistence;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn controller(lanes: &[(&str, &[&str])]) -> ReconciliationController {
        ReconciliationController::new(
            BoardStore::init(stages(), board(lanes), []).expect("store"),
        )
    }

    fn failed() -> Result<Item, PersistError> {
        Err(PersistError::Transport("connection reset".into()))
    }

    fn confirmed(id: &str, stage: &str) -> Result<Item, PersistError> {
        Ok(Item::new(id, Stage::new(stage)).with_field("updated_by", "server"))
    }

    struct Rejecting;

    impl StagePersistence for Rejecting {
        fn apply_stage_move(&mut self, _: &ItemId, _: &Stage) -> Result<Item, PersistError> {
            Err(PersistError::Validation("stage locked".into()))
        }

        fn apply_stage_moves(&mut self, _: &[Move]) -> Result<Vec<Item>, PersistError> {
            Err(PersistError::Transport("timeout".into()))
        }
    }

    #[test]
    fn drag_then_rejection_restores_board() {
        let mut ctl = controller(&[("Lead", &["d1", "d2"])]);
        let before = ctl.board().clone();

        let proposed = board(&[("Lead", &["d2"]), ("Proposal", &["d1"])]);
        let request = ctl
            .submit_proposed(proposed.clone())
            .expect("submit")
            .expect("a move");
        assert_eq!(request.stage_move(), &Move::new("d1", "Lead", "Proposal"));
        assert_eq!(ctl.board(), &proposed);
        assert_eq!(ctl.status(&ItemId::new("d1")), ReconcileStatus::Pending);

        let resolution = ctl.resolve(&request, failed()).expect("resolve");
        assert_eq!(resolution, Resolution::RolledBack);
        assert_eq!(ctl.board(), &before);
        assert_eq!(ctl.status(&ItemId::new("d1")), ReconcileStatus::Idle);
    }

    #[test]
    fn stale_failure_does_not_clobber_newer_move() {
        let mut ctl = controller(&[("Lead", &["x"])]);
        let first = ctl.submit(Move::new("x", "Lead", "Qualified")).expect("submit");
        let second = ctl
            .submit(Move::new("x", "Qualified", "Proposal"))
            .expect("submit");

        assert_eq!(ctl.resolve(&first, failed()).expect("resolve"), Resolution::Superseded);
        assert_eq!(ctl.board(), &board(&[("Proposal", &["x"])]));
        assert_eq!(ctl.status(&ItemId::new("x")), ReconcileStatus::Pending);

        assert_eq!(
            ctl.resolve(&second, confirmed("x", "Proposal")).expect("resolve"),
            Resolution::Committed
        );
        assert_eq!(ctl.board(), &board(&[("Proposal", &["x"])]));
        assert_eq!(ctl.status(&ItemId::new("x")), ReconcileStatus::Idle);
    }

    #[test]
    fn stale_success_merges_fields_but_not_stage() {
        let mut ctl = controller(&[("Lead", &["x"])]);
        let first = ctl.submit(Move::new("x", "Lead", "Qualified")).expect("submit");
        let second = ctl
            .submit(Move::new("x", "Qualified", "Proposal"))
            .expect("submit");

        assert_eq!(
            ctl.resolve(&first, confirmed("x", "Qualified")).expect("resolve"),
            Resolution::Superseded
        );
        let item = ctl.store().item(&ItemId::new("x")).expect("item");
        assert_eq!(item.stage, Stage::new("Proposal"));
        assert_eq!(item.payload.get("updated_by"), Some(&serde_json::json!("server")));

        assert_eq!(ctl.resolve(&second, failed()).expect("resolve"), Resolution::RolledBack);
        assert_eq!(ctl.board(), &board(&[("Qualified", &["x"])]));
    }

    fn rollback_count(ctl: &mut ReconciliationController) -> Rc<RefCell<Vec<Move>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        ctl.on_rollback(move |_, mv, _| sink.borrow_mut().push(mv.clone()));
        seen
    }

    #[test]
    fn failing_latest_then_older_returns_to_origin() {
        let mut ctl = controller(&[("Lead", &["w", "x"])]);
        let before = ctl.board().clone();
        let seen = rollback_count(&mut ctl);
        let first = ctl.submit(Move::new("x", "Lead", "Qualified")).expect("submit");
        let second = ctl
            .submit(Move::new("x", "Qualified", "Proposal"))
            .expect("submit");

        assert_eq!(ctl.resolve(&second, failed()).expect("resolve"), Resolution::RolledBack);
        assert_eq!(ctl.board(), &board(&[("Lead", &["w"]), ("Qualified", &["x"])]));
        assert_eq!(ctl.status(&ItemId::new("x")), ReconcileStatus::Pending);

        assert_eq!(ctl.resolve(&first, failed()).expect("resolve"), Resolution::RolledBack);
        assert_eq!(ctl.board(), &before);
        assert_eq!(ctl.status(&ItemId::new("x")), ReconcileStatus::Idle);
        assert_eq!(
            *seen.borrow(),
            vec![second.stage_move().clone(), first.stage_move().clone()]
        );
    }

    #[test]
    fn failing_older_then_latest_returns_to_confirmed_stage() {
        let mut ctl = controller(&[("Lead", &["x"])]);
        let seen = rollback_count(&mut ctl);
        let first = ctl.submit(Move::new("x", "Lead", "Qualified")).expect("submit");
        let second = ctl
            .submit(Move::new("x", "Qualified", "Proposal"))
            .expect("submit");

        assert_eq!(ctl.resolve(&first, failed()).expect("resolve"), Resolution::Superseded);
        assert_eq!(ctl.resolve(&second, failed()).expect("resolve"), Resolution::RolledBack);
        assert_eq!(ctl.board(), &board(&[("Lead", &["x"])]));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn middle_failure_is_undone_once_older_move_lands() {
        let mut ctl = controller(&[("Lead", &["x"])]);
        let first = ctl.submit(Move::new("x", "Lead", "Qualified")).expect("submit");
        let second = ctl
            .submit(Move::new("x", "Qualified", "Proposal"))
            .expect("submit");
        let third = ctl.submit(Move::new("x", "Proposal", "Lead")).expect("submit");

        assert_eq!(ctl.resolve(&second, failed()).expect("resolve"), Resolution::Superseded);
        assert_eq!(ctl.resolve(&third, failed()).expect("resolve"), Resolution::RolledBack);
        assert_eq!(ctl.board(), &board(&[("Qualified", &["x"])]));

        assert_eq!(
            ctl.resolve(&first, confirmed("x", "Qualified")).expect("resolve"),
            Resolution::Superseded
        );
        assert_eq!(ctl.board(), &board(&[("Qualified", &["x"])]));
        let record = ctl.record(&ItemId::new("x")).expect("record");
        assert_eq!(record.confirmed_stage(), &Stage::new("Qualified"));
        assert_eq!(record.in_flight_len(), 0);
    }

    #[test]
    fn older_failure_never_undoes_newer_confirmed_move() {
        let mut ctl = controller(&[("Lead", &["x"])]);
        let first = ctl.submit(Move::new("x", "Lead", "Qualified")).expect("submit");
        let second = ctl
            .submit(Move::new("x", "Qualified", "Proposal"))
            .expect("submit");
        let third = ctl
            .submit(Move::new("x", "Proposal", "Qualified"))
            .expect("submit");

        assert_eq!(
            ctl.resolve(&third, confirmed("x", "Qualified")).expect("resolve"),
            Resolution::Committed
        );
        assert_eq!(ctl.resolve(&second, failed()).expect("resolve"), Resolution::Superseded);
        assert_eq!(ctl.resolve(&first, failed()).expect("resolve"), Resolution::Superseded);
        assert_eq!(ctl.board(), &board(&[("Qualified", &["x"])]));
    }

    #[test]
    fn duplicated_failure_rolls_back_once() {
        let mut ctl = controller(&[("Lead", &["d1"])]);
        let seen = rollback_count(&mut ctl);
        let request = ctl.submit(Move::new("d1", "Lead", "Proposal")).expect("submit");

        assert_eq!(ctl.resolve(&request, failed()).expect("resolve"), Resolution::RolledBack);
        assert_eq!(ctl.resolve(&request, failed()).expect("resolve"), Resolution::Superseded);
        assert_eq!(ctl.board(), &board(&[("Lead", &["d1"])]));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn rollback_listener_fires_once_per_rollback() {
        let mut ctl = controller(&[("Lead", &["d1"])]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        ctl.on_rollback(move |id, mv, err| {
            sink.borrow_mut().push((id.clone(), mv.clone(), err.clone()));
        });

        let resolution = ctl
            .submit_and_persist(Move::new("d1", "Lead", "Qualified"), &mut Rejecting)
            .expect("resolve");
        assert_eq!(resolution, Resolution::RolledBack);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, ItemId::new("d1"));
        assert_eq!(seen[0].2, PersistError::Validation("stage locked".into()));
    }

    #[test]
    fn moves_on_different_items_are_independent() {
        let mut ctl = controller(&[("Lead", &["a", "b"])]);
        let ra = ctl.submit(Move::new("a", "Lead", "Proposal")).expect("submit");
        let rb = ctl.submit(Move::new("b", "Lead", "Qualified")).expect("submit");

        assert_eq!(ctl.resolve(&ra, failed()).expect("resolve"), Resolution::RolledBack);
        assert_eq!(ctl.resolve(&rb, confirmed("b", "Qualified")).expect("resolve"), Resolution::Committed);
        assert_eq!(ctl.board(), &board(&[("Lead", &["a"]), ("Qualified", &["b"])]));
    }

    #[test]
    fn reorder_is_not_reconciled() {
        let mut ctl = controller(&[("Lead", &["d1", "d2"])]);
        let reordered = board(&[("Lead", &["d2", "d1"])]);
        assert!(ctl.submit_proposed(reordered.clone()).expect("diff").is_none());
        assert_eq!(ctl.board(), &reordered);
        assert!(ctl.record(&ItemId::new("d1")).is_none());
    }

    #[test]
    fn ambiguous_proposal_leaves_board_alone() {
        let mut ctl = controller(&[("Lead", &["d1", "d2"])]);
        let before = ctl.board().clone();
        let err = ctl
            .submit_proposed(board(&[("Proposal", &["d1", "d2"])]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::AmbiguousMove { .. }));
        assert_eq!(ctl.board(), &before);
    }

    #[test]
    fn unknown_stage_is_rejected_before_apply() {
        let mut ctl = controller(&[("Lead", &["d1"])]);
        let err = ctl.submit(Move::new("d1", "Lead", "Won")).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidStage { .. }));
        assert_eq!(ctl.store().revision(), 0);
    }

    #[test]
    fn forgotten_item_discards_late_outcome() {
        let mut ctl = controller(&[("Lead", &["d1", "d2"])]);
        let request = ctl.submit(Move::new("d1", "Lead", "Proposal")).expect("submit");
        assert!(ctl.forget(&ItemId::new("d1")).is_some());
        assert_eq!(ctl.resolve(&request, failed()).expect("resolve"), Resolution::Discarded);
        assert_eq!(ctl.board(), &board(&[("Lead", &["d2"])]));
    }

    #[test]
    fn batch_success_reflects_confirmed_stages() {
        let stages = StageSet::default();
        let mut server = MemoryDealStore::new(stages.clone());
        let items = vec![
            Item::new("d1", Stage::new("Lead")),
            Item::new("d2", Stage::new("Lead")),
        ];
        for item in &items {
            server.insert(item.clone()).expect("insert");
        }
        let mut ctl =
            ReconciliationController::new(BoardStore::from_items(stages, items).expect("store"));
        let in_flight = ctl.submit(Move::new("d1", "Lead", "Qualified")).expect("submit");

        let confirmed = ctl
            .commit_batch(
                &[
                    Move::new("d1", "Lead", "Proposal"),
                    Move::new("d2", "Lead", "Negotiation"),
                ],
                &mut server,
            )
            .expect("batch");
        assert_eq!(confirmed.len(), 2);
        assert_eq!(
            ctl.board().stage_of(&ItemId::new("d1")),
            Some(&Stage::new("Proposal"))
        );
        assert_eq!(ctl.status(&ItemId::new("d1")), ReconcileStatus::Pending);
        assert!(ctl.record(&ItemId::new("d2")).is_none());

        assert_eq!(ctl.resolve(&in_flight, failed()).expect("resolve"), Resolution::Superseded);
        assert_eq!(
            ctl.board().stage_of(&ItemId::new("d1")),
            Some(&Stage::new("Proposal"))
        );
        assert_eq!(ctl.status(&ItemId::new("d1")), ReconcileStatus::Idle);
    }

    struct ConfirmsElsewhere;

    impl StagePersistence for ConfirmsElsewhere {
        fn apply_stage_move(&mut self, id: &ItemId, stage: &Stage) -> Result<Item, PersistError> {
            Ok(Item::new(id.clone(), stage.clone()))
        }

        fn apply_stage_moves(&mut self, _: &[Move]) -> Result<Vec<Item>, PersistError> {
            Ok(vec![
                Item::new("d1", Stage::new("Won")),
                Item::new("d2", Stage::new("Proposal")),
            ])
        }
    }

    #[test]
    fn batch_stage_without_lane_is_skipped() {
        let mut ctl = controller(&[("Lead", &["d1", "d2"])]);
        let in_flight = ctl.submit(Move::new("d1", "Lead", "Qualified")).expect("submit");

        let confirmed = ctl
            .commit_batch(
                &[
                    Move::new("d1", "Qualified", "Won"),
                    Move::new("d2", "Lead", "Proposal"),
                ],
                &mut ConfirmsElsewhere,
            )
            .expect("batch");
        assert_eq!(confirmed.len(), 2);
        assert_eq!(ctl.board(), &board(&[("Qualified", &["d1"]), ("Proposal", &["d2"])]));

        let record = ctl.record(&ItemId::new("d1")).expect("record");
        assert_eq!(record.latest_seq(), in_flight.seq());
        assert_eq!(record.status(), ReconcileStatus::Pending);

        assert_eq!(ctl.resolve(&in_flight, failed()).expect("resolve"), Resolution::RolledBack);
        assert_eq!(ctl.board(), &board(&[("Lead", &["d1"]), ("Proposal", &["d2"])]));
    }

    #[test]
    fn batch_failure_notifies_once_and_keeps_board() {
        let mut ctl = controller(&[("Lead", &["d1", "d2"])]);
        let before = ctl.board().clone();
        let failures = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&failures);
        ctl.on_batch_failure(move |moves, _| {
            assert_eq!(moves.len(), 2);
            *counter.borrow_mut() += 1;
        });

        let err = ctl
            .commit_batch(
                &[
                    Move::new("d1", "Lead", "Proposal"),
                    Move::new("d2", "Lead", "Proposal"),
                ],
                &mut Rejecting,
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Persistence(PersistError::Transport(_))));
        assert_eq!(*failures.borrow(), 1);
        assert_eq!(ctl.board(), &before);
    }

    #[test]
    fn teardown_returns_final_board() {
        let mut ctl = controller(&[("Lead", &["d1"])]);
        let _request = ctl.submit(Move::new("d1", "Lead", "Qualified")).expect("submit");
        assert_eq!(ctl.teardown(), board(&[("Qualified", &["d1"])]));
    }
}
