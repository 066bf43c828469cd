//! Explicit cross-display moves of the floating window.
//!
//! A move starts with [`DisplayTransferHandler::schedule_move_to_display`],
//! which puts the state machine into `ScheduledBoundsChange`. The handler sees
//! that change, asks the [`BoundsScheduler`] to perform the move, and later,
//! when the scheduler pushes `ChangingPipBounds` with a precomputed
//! transaction, applies it and requests the finishing resize.

use std::cell::Cell;
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};

use crate::state::{ListenerId, PipState, StatePayload, TransitionState, TransitionStateListener};
use crate::{DisplayId, Rect};

/// Performs the actual bounds work on behalf of the coordinator.
///
/// Both calls are fire-and-forget: results come back later as new state
/// changes on the same event loop. Implementations must not call
/// [`TransitionState::set_state`] synchronously from these methods.
pub trait BoundsScheduler {
    /// Move the floating window from `origin` to `target`. The eventual
    /// effect is a `ChangingPipBounds` push carrying a transaction and the
    /// destination bounds.
    fn schedule_move_to_display(&self, origin: DisplayId, target: DisplayId);

    /// Finish the resize of an already applied transaction.
    fn schedule_finish_resize_pip(&self, destination: Rect);
}

/// A transfer that has been handed to the scheduler and not yet superseded
/// or cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub id: u64,
    pub origin: DisplayId,
    pub target: DisplayId,
}

/// Drives explicit "move to display" requests end to end.
pub struct DisplayTransferHandler {
    state: Weak<TransitionState>,
    scheduler: Rc<dyn BoundsScheduler>,
    /// Present while waiting for the transfer's transaction.
    pending: Cell<Option<TransferRequest>>,
    next_request_id: Cell<u64>,
    listener_id: Cell<Option<ListenerId>>,
}

impl DisplayTransferHandler {
    /// Create the handler and register it as a listener on `state`.
    pub fn new(state: &Rc<TransitionState>, scheduler: Rc<dyn BoundsScheduler>) -> Rc<Self> {
        let handler = Rc::new(Self {
            state: Rc::downgrade(state),
            scheduler,
            pending: Cell::new(None),
            next_request_id: Cell::new(1),
            listener_id: Cell::new(None),
        });
        let listener: Rc<dyn TransitionStateListener> = handler.clone();
        handler.listener_id.set(Some(state.add_listener(listener)));
        handler
    }

    /// Request a move of the floating window from `origin` to `target`.
    ///
    /// Completion is observed through later state changes, not awaited.
    pub fn schedule_move_to_display(&self, origin: DisplayId, target: DisplayId) {
        let Some(state) = self.state.upgrade() else {
            warn!(origin, target, "Transition state is gone, dropping display transfer");
            return;
        };
        state.set_state(
            PipState::ScheduledBoundsChange,
            Some(StatePayload::MoveToDisplay { origin, target }),
        );
    }

    pub fn is_waiting_for_transfer(&self) -> bool {
        self.pending.get().is_some()
    }

    pub fn pending_transfer(&self) -> Option<TransferRequest> {
        self.pending.get()
    }

    /// Forget the in-flight transfer, if any.
    pub fn cancel_pending_transfer(&self) -> Option<TransferRequest> {
        let cancelled = self.pending.take();
        if let Some(request) = cancelled {
            info!(request.id, request.origin, request.target, "Cancelled pending display transfer");
        }
        cancelled
    }

    /// Cancel the in-flight transfer only if it is still request `id`.
    pub fn expire_transfer(&self, id: u64) -> bool {
        match self.pending.get() {
            Some(request) if request.id == id => {
                warn!(id, request.origin, request.target, "Display transfer expired");
                self.pending.set(None);
                true
            }
            _ => false,
        }
    }

    /// Unregister from the state machine.
    pub fn teardown(&self) {
        let (Some(id), Some(state)) = (self.listener_id.take(), self.state.upgrade()) else {
            return;
        };
        state.remove_listener(id);
    }

    fn on_bounds_change_scheduled(&self, payload: Option<&StatePayload>) {
        let Some(&StatePayload::MoveToDisplay { origin, target }) = payload else {
            // Some other bounds-change sequence owns the machine now.
            if let Some(stale) = self.pending.take() {
                debug!(stale.id, "Unrelated bounds change supersedes pending display transfer");
            }
            return;
        };

        let id = self.next_request_id.get();
        self.next_request_id.set(id + 1);
        if let Some(previous) = self.pending.replace(Some(TransferRequest { id, origin, target }))
        {
            debug!(previous.id, id, "New display transfer supersedes pending one");
        }

        info!(id, origin, target, "Scheduling floating window move to display");
        self.scheduler.schedule_move_to_display(origin, target);
    }

    fn on_changing_bounds(&self, payload: Option<&StatePayload>) {
        if self.pending.get().is_none() {
            debug!("Bounds changing without a pending display transfer, ignoring");
            return;
        }
        let Some(StatePayload::BoundsChange {
            transaction,
            destination,
        }) = payload
        else {
            debug!("Bounds changing without a transaction payload, ignoring");
            return;
        };
        let Some(transaction) = transaction.take() else {
            debug!("No transaction to apply for display transfer");
            return;
        };

        debug!(?transaction, ?destination, "Applying display transfer transaction");
        transaction.apply();
        self.scheduler.schedule_finish_resize_pip(*destination);
    }
}

impl TransitionStateListener for DisplayTransferHandler {
    fn on_transition_state_changed(
        &self,
        _old_state: PipState,
        new_state: PipState,
        payload: Option<&StatePayload>,
    ) {
        match new_state {
            PipState::ScheduledBoundsChange => self.on_bounds_change_scheduled(payload),
            PipState::ChangingPipBounds => self.on_changing_bounds(payload),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::state::{Transaction, TransactionSlot};
    use crate::transition::TransitionToken;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Move(DisplayId, DisplayId),
        Apply(u32),
        FinishResize(Rect),
    }

    type CallLog = Rc<RefCell<Vec<Call>>>;

    struct RecordingScheduler(CallLog);

    impl BoundsScheduler for RecordingScheduler {
        fn schedule_move_to_display(&self, origin: DisplayId, target: DisplayId) {
            self.0.borrow_mut().push(Call::Move(origin, target));
        }

        fn schedule_finish_resize_pip(&self, destination: Rect) {
            self.0.borrow_mut().push(Call::FinishResize(destination));
        }
    }

    #[derive(Debug)]
    struct RecordingTransaction {
        tag: u32,
        log: CallLog,
    }

    impl Transaction for RecordingTransaction {
        fn apply(self: Box<Self>) {
            self.log.borrow_mut().push(Call::Apply(self.tag));
        }
    }

    fn setup() -> (Rc<TransitionState>, Rc<DisplayTransferHandler>, CallLog) {
        let log = CallLog::default();
        let state = Rc::new(TransitionState::new());
        state.set_state(PipState::Idle, None);
        let handler =
            DisplayTransferHandler::new(&state, Rc::new(RecordingScheduler(Rc::clone(&log))));
        (state, handler, log)
    }

    fn bounds_change(tag: u32, log: &CallLog, destination: Rect) -> StatePayload {
        StatePayload::bounds_change(
            Box::new(RecordingTransaction {
                tag,
                log: Rc::clone(log),
            }),
            destination,
        )
    }

    #[test]
    fn test_schedule_move_sets_state_and_calls_scheduler() {
        let (state, handler, log) = setup();

        handler.schedule_move_to_display(1, 2);

        assert_eq!(state.state(), PipState::ScheduledBoundsChange);
        assert!(handler.is_waiting_for_transfer());
        assert_eq!(*log.borrow(), vec![Call::Move(1, 2)]);
        let request = handler.pending_transfer().unwrap();
        assert_eq!((request.origin, request.target), (1, 2));
    }

    #[test]
    fn test_changing_bounds_applies_then_finishes() {
        let (state, handler, log) = setup();
        let destination = Rect::new(1920, 800, 320, 180);

        handler.schedule_move_to_display(0, 1);
        state.set_state(
            PipState::ChangingPipBounds,
            Some(bounds_change(7, &log, destination)),
        );

        assert_eq!(
            *log.borrow(),
            vec![
                Call::Move(0, 1),
                Call::Apply(7),
                Call::FinishResize(destination)
            ]
        );
        // The request stays in flight until a new transfer or a cancel.
        assert!(handler.is_waiting_for_transfer());
    }

    #[test]
    fn test_changing_bounds_without_transfer_is_ignored() {
        let (state, handler, log) = setup();

        state.set_state(
            PipState::ChangingPipBounds,
            Some(bounds_change(1, &log, Rect::new(0, 0, 10, 10))),
        );

        assert!(!handler.is_waiting_for_transfer());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_changing_bounds_with_empty_transaction_is_noop() {
        let (state, handler, log) = setup();

        handler.schedule_move_to_display(0, 1);
        state.set_state(
            PipState::ChangingPipBounds,
            Some(StatePayload::BoundsChange {
                transaction: TransactionSlot::empty(),
                destination: Rect::new(0, 0, 10, 10),
            }),
        );

        assert_eq!(*log.borrow(), vec![Call::Move(0, 1)]);
    }

    #[test]
    fn test_changing_bounds_without_payload_is_noop() {
        let (state, handler, log) = setup();

        handler.schedule_move_to_display(0, 1);
        state.set_state(PipState::ChangingPipBounds, None);
        state.set_state(
            PipState::ChangingPipBounds,
            Some(StatePayload::DisplayChange {
                token: TransitionToken::new(3),
            }),
        );

        assert_eq!(*log.borrow(), vec![Call::Move(0, 1)]);
    }

    #[test]
    fn test_new_transfer_supersedes_pending() {
        let (_state, handler, log) = setup();

        handler.schedule_move_to_display(0, 1);
        let first = handler.pending_transfer().unwrap();
        handler.schedule_move_to_display(1, 2);
        let second = handler.pending_transfer().unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!((second.origin, second.target), (1, 2));
        assert_eq!(*log.borrow(), vec![Call::Move(0, 1), Call::Move(1, 2)]);
    }

    #[test]
    fn test_unrelated_bounds_change_cancels_pending() {
        let (state, handler, log) = setup();

        handler.schedule_move_to_display(0, 1);
        state.set_state(
            PipState::ScheduledBoundsChange,
            Some(StatePayload::DisplayChange {
                token: TransitionToken::new(9),
            }),
        );

        assert!(!handler.is_waiting_for_transfer());
        assert_eq!(*log.borrow(), vec![Call::Move(0, 1)]);
    }

    #[test]
    fn test_expire_only_matching_request() {
        let (_state, handler, _log) = setup();

        handler.schedule_move_to_display(0, 1);
        let stale = handler.pending_transfer().unwrap().id;
        handler.schedule_move_to_display(0, 2);

        assert!(!handler.expire_transfer(stale));
        assert!(handler.is_waiting_for_transfer());

        let current = handler.pending_transfer().unwrap().id;
        assert!(handler.expire_transfer(current));
        assert!(!handler.is_waiting_for_transfer());
        assert!(handler.cancel_pending_transfer().is_none());
    }

    #[test]
    fn test_teardown_unregisters_listener() {
        let (state, handler, log) = setup();
        assert_eq!(state.listener_count(), 1);

        handler.teardown();
        assert_eq!(state.listener_count(), 0);

        state.set_state(
            PipState::ScheduledBoundsChange,
            Some(StatePayload::MoveToDisplay {
                origin: 0,
                target: 1,
            }),
        );
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_schedule_after_state_dropped_is_noop() {
        let log = CallLog::default();
        let state = Rc::new(TransitionState::new());
        let handler =
            DisplayTransferHandler::new(&state, Rc::new(RecordingScheduler(Rc::clone(&log))));
        drop(state);

        handler.schedule_move_to_display(0, 1);
        assert!(log.borrow().is_empty());
        assert!(!handler.is_waiting_for_transfer());
    }
}
