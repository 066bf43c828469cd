//! Per-window transition state machine.
//!
//! One [`TransitionState`] exists per floating window. State changes go
//! through [`TransitionState::set_state`], which stores the new state and its
//! payload and then notifies every registered listener synchronously, in
//! registration order, before returning.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::transition::TransitionToken;
use crate::{DisplayId, Rect};

/// Lifecycle state of a floating window.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PipState {
    /// The window is not managed as a floating window.
    #[default]
    Undefined,
    /// The window is being turned into a floating window.
    EnteringPip,
    /// Entered and stable; no bounds activity is registered.
    Idle,
    /// A bounds change was requested but no compositor transaction exists yet.
    ScheduledBoundsChange,
    /// The transaction and destination bounds are available.
    ChangingPipBounds,
    /// The change has been applied and is settled.
    ChangedPipBounds,
    /// The floating window is being dismissed.
    ExitingPip,
    /// The floating window is gone.
    ExitedPip,
}

impl PipState {
    /// Stable lowercase name, used in logs and the IPC protocol.
    pub fn as_str(self) -> &'static str {
        match self {
            PipState::Undefined => "undefined",
            PipState::EnteringPip => "entering_pip",
            PipState::Idle => "idle",
            PipState::ScheduledBoundsChange => "scheduled_bounds_change",
            PipState::ChangingPipBounds => "changing_pip_bounds",
            PipState::ChangedPipBounds => "changed_pip_bounds",
            PipState::ExitingPip => "exiting_pip",
            PipState::ExitedPip => "exited_pip",
        }
    }
}

impl fmt::Display for PipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A batch of compositor commands committed atomically.
///
/// Applying consumes the handle, so a transaction can never be applied twice.
pub trait Transaction: fmt::Debug {
    /// Commit the transaction to the compositor.
    fn apply(self: Box<Self>);
}

/// Holder for a single-use transaction carried inside a payload.
///
/// Listeners only see the payload by reference; the first one to
/// [`take`](TransactionSlot::take) the transaction owns it.
pub struct TransactionSlot {
    inner: RefCell<Option<Box<dyn Transaction>>>,
}

impl TransactionSlot {
    /// Create a slot holding `transaction`.
    pub fn new(transaction: Box<dyn Transaction>) -> Self {
        Self {
            inner: RefCell::new(Some(transaction)),
        }
    }

    /// Create a slot with no transaction in it.
    pub fn empty() -> Self {
        Self {
            inner: RefCell::new(None),
        }
    }

    /// Take the transaction out, leaving the slot empty.
    pub fn take(&self) -> Option<Box<dyn Transaction>> {
        self.inner.borrow_mut().take()
    }

    /// True if there is no transaction left to take.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_none()
    }
}

impl fmt::Debug for TransactionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner.borrow() {
            Some(tx) => f.debug_tuple("TransactionSlot").field(tx).finish(),
            None => f.write_str("TransactionSlot(<empty>)"),
        }
    }
}

/// Data attached to a state change. Each variant carries exactly the fields
/// that kind of change needs.
#[derive(Debug)]
pub enum StatePayload {
    /// Explicit request to move the window from one display to another.
    MoveToDisplay {
        origin: DisplayId,
        target: DisplayId,
    },
    /// A display configuration change will move the window; the real bounds
    /// are not known yet.
    DisplayChange { token: TransitionToken },
    /// Precomputed transaction and the bounds the window ends up at.
    BoundsChange {
        transaction: TransactionSlot,
        destination: Rect,
    },
}

impl StatePayload {
    /// Build a [`StatePayload::BoundsChange`] around `transaction`.
    pub fn bounds_change(transaction: Box<dyn Transaction>, destination: Rect) -> Self {
        StatePayload::BoundsChange {
            transaction: TransactionSlot::new(transaction),
            destination,
        }
    }

    /// Short name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            StatePayload::MoveToDisplay { .. } => "move_to_display",
            StatePayload::DisplayChange { .. } => "display_change",
            StatePayload::BoundsChange { .. } => "bounds_change",
        }
    }
}

/// Receives every state change of a [`TransitionState`].
pub trait TransitionStateListener {
    fn on_transition_state_changed(
        &self,
        old_state: PipState,
        new_state: PipState,
        payload: Option<&StatePayload>,
    );
}

impl<F> TransitionStateListener for F
where
    F: Fn(PipState, PipState, Option<&StatePayload>),
{
    fn on_transition_state_changed(
        &self,
        old_state: PipState,
        new_state: PipState,
        payload: Option<&StatePayload>,
    ) {
        self(old_state, new_state, payload)
    }
}

/// Handle returned by [`TransitionState::add_listener`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The floating window's lifecycle state plus its listeners.
///
/// All methods take `&self`; the host shares the machine through an `Rc` and
/// serializes every call on one event loop.
pub struct TransitionState {
    state: Cell<PipState>,
    payload: RefCell<Option<StatePayload>>,
    listeners: RefCell<Vec<(ListenerId, Rc<dyn TransitionStateListener>)>>,
    next_listener_id: Cell<u64>,
    /// Transition currently being dispatched, if any.
    dispatching: Cell<Option<(PipState, PipState)>>,
    display_change_scheduled: Cell<bool>,
}

impl Default for TransitionState {
    fn default() -> Self {
        Self {
            state: Cell::new(PipState::Undefined),
            payload: RefCell::new(None),
            listeners: RefCell::new(Vec::new()),
            next_listener_id: Cell::new(0),
            dispatching: Cell::new(None),
            display_change_scheduled: Cell::new(false),
        }
    }
}

impl TransitionState {
    /// Create a machine in [`PipState::Undefined`] with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> PipState {
        self.state.get()
    }

    /// Store `new_state` and `payload`, then notify every listener in
    /// registration order.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a listener callback. Listener panics are
    /// not caught either.
    pub fn set_state(&self, new_state: PipState, payload: Option<StatePayload>) {
        if let Some((from, to)) = self.dispatching.get() {
            panic!(
                "re-entrant set_state({new_state}) while dispatching {from} -> {to}; \
                 listeners must not change the transition state"
            );
        }

        let old_state = self.state.replace(new_state);
        *self.payload.borrow_mut() = payload;

        let listeners: Vec<Rc<dyn TransitionStateListener>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();

        let payload = self.payload.borrow();
        debug!(
            %old_state,
            %new_state,
            payload = payload.as_ref().map(StatePayload::kind),
            listeners = listeners.len(),
            "Transition state changed"
        );

        let _guard = DispatchGuard::enter(&self.dispatching, old_state, new_state);
        for listener in &listeners {
            listener.on_transition_state_changed(old_state, new_state, payload.as_ref());
        }
    }

    /// Register a listener. Registering the same listener twice notifies it
    /// twice.
    pub fn add_listener(&self, listener: Rc<dyn TransitionStateListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.get());
        self.next_listener_id.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    /// Unregister a listener. Returns false if `id` was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Run `f` against the payload stored with the current state.
    pub fn with_payload<R>(&self, f: impl FnOnce(Option<&StatePayload>) -> R) -> R {
        f(self.payload.borrow().as_ref())
    }

    /// True while the window is entered and not mid bounds change.
    pub fn is_pip_state_idle(&self) -> bool {
        matches!(
            self.state.get(),
            PipState::Idle | PipState::ChangedPipBounds
        )
    }

    /// True while the window is actively managed as a floating window.
    pub fn is_in_pip(&self) -> bool {
        let state = self.state.get();
        state >= PipState::EnteringPip && state <= PipState::ChangedPipBounds
    }

    pub fn is_display_change_scheduled(&self) -> bool {
        self.display_change_scheduled.get()
    }

    pub fn set_display_change_scheduled(&self, scheduled: bool) {
        self.display_change_scheduled.set(scheduled);
    }
}

impl fmt::Debug for TransitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionState")
            .field("state", &self.state.get())
            .field("payload", &*self.payload.borrow())
            .field("listeners", &self.listeners.borrow().len())
            .field("display_change_scheduled", &self.display_change_scheduled.get())
            .finish()
    }
}

/// Marks a dispatch in progress; cleared on drop so a panicking listener
/// does not leave the machine locked.
struct DispatchGuard<'a> {
    slot: &'a Cell<Option<(PipState, PipState)>>,
}

impl<'a> DispatchGuard<'a> {
    fn enter(slot: &'a Cell<Option<(PipState, PipState)>>, from: PipState, to: PipState) -> Self {
        slot.set(Some((from, to)));
        Self { slot }
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.slot.set(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Seen = Rc<RefCell<Vec<(&'static str, PipState, PipState, Option<&'static str>)>>>;

    fn recorder(name: &'static str, seen: &Seen) -> Rc<dyn TransitionStateListener> {
        let seen = Rc::clone(seen);
        Rc::new(
            move |old: PipState, new: PipState, payload: Option<&StatePayload>| {
                seen.borrow_mut()
                    .push((name, old, new, payload.map(StatePayload::kind)));
            },
        )
    }

    #[derive(Debug)]
    struct CountingTransaction(Rc<Cell<u32>>);

    impl Transaction for CountingTransaction {
        fn apply(self: Box<Self>) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_new_state_is_undefined() {
        let state = TransitionState::new();
        assert_eq!(state.state(), PipState::Undefined);
        assert!(!state.is_in_pip());
        assert!(!state.is_pip_state_idle());
        assert!(!state.is_display_change_scheduled());
        assert_eq!(state.listener_count(), 0);
    }

    #[test]
    fn test_listeners_called_in_registration_order() {
        let state = TransitionState::new();
        let seen: Seen = Rc::default();
        state.add_listener(recorder("first", &seen));
        state.add_listener(recorder("second", &seen));

        state.set_state(PipState::Idle, None);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], ("first", PipState::Undefined, PipState::Idle, None));
        assert_eq!(seen[1], ("second", PipState::Undefined, PipState::Idle, None));
    }

    #[test]
    fn test_payload_visible_during_dispatch_and_after() {
        let state = TransitionState::new();
        let seen: Seen = Rc::default();
        state.add_listener(recorder("l", &seen));

        state.set_state(
            PipState::ScheduledBoundsChange,
            Some(StatePayload::MoveToDisplay {
                origin: 1,
                target: 2,
            }),
        );

        assert_eq!(
            seen.borrow()[0],
            (
                "l",
                PipState::Undefined,
                PipState::ScheduledBoundsChange,
                Some("move_to_display")
            )
        );
        let stored = state.with_payload(|p| match p {
            Some(StatePayload::MoveToDisplay { origin, target }) => Some((*origin, *target)),
            _ => None,
        });
        assert_eq!(stored, Some((1, 2)));

        // A state change without payload clears the stored one.
        state.set_state(PipState::Idle, None);
        assert!(state.with_payload(|p| p.is_none()));
    }

    #[test]
    fn test_double_registration_double_notification() {
        let state = TransitionState::new();
        let seen: Seen = Rc::default();
        let listener = recorder("dup", &seen);
        state.add_listener(Rc::clone(&listener));
        state.add_listener(listener);

        state.set_state(PipState::EnteringPip, None);
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn test_remove_listener() {
        let state = TransitionState::new();
        let seen: Seen = Rc::default();
        let id = state.add_listener(recorder("gone", &seen));
        state.add_listener(recorder("kept", &seen));

        assert!(state.remove_listener(id));
        assert!(!state.remove_listener(id));
        state.set_state(PipState::Idle, None);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "kept");
    }

    #[test]
    #[should_panic(expected = "re-entrant set_state")]
    fn test_reentrant_set_state_panics() {
        let state = Rc::new(TransitionState::new());
        let inner = Rc::downgrade(&state);
        state.add_listener(Rc::new(
            move |_old: PipState, new: PipState, _payload: Option<&StatePayload>| {
                if new == PipState::ChangedPipBounds {
                    if let Some(state) = inner.upgrade() {
                        state.set_state(PipState::Idle, None);
                    }
                }
            },
        ));

        state.set_state(PipState::ChangedPipBounds, None);
    }

    #[test]
    fn test_predicates() {
        let state = TransitionState::new();
        let cases = [
            (PipState::Undefined, false, false),
            (PipState::EnteringPip, false, true),
            (PipState::Idle, true, true),
            (PipState::ScheduledBoundsChange, false, true),
            (PipState::ChangingPipBounds, false, true),
            (PipState::ChangedPipBounds, true, true),
            (PipState::ExitingPip, false, false),
            (PipState::ExitedPip, false, false),
        ];
        for (s, idle, in_pip) in cases {
            state.set_state(s, None);
            assert_eq!(state.is_pip_state_idle(), idle, "idle check for {s}");
            assert_eq!(state.is_in_pip(), in_pip, "in-pip check for {s}");
        }
    }

    #[test]
    fn test_transaction_slot_takes_once() {
        let applied = Rc::new(Cell::new(0));
        let payload = StatePayload::bounds_change(
            Box::new(CountingTransaction(Rc::clone(&applied))),
            Rect::new(0, 0, 10, 10),
        );
        let StatePayload::BoundsChange { transaction, .. } = &payload else {
            panic!("expected bounds change payload");
        };

        assert!(!transaction.is_empty());
        transaction.take().expect("first take").apply();
        assert!(transaction.take().is_none());
        assert!(transaction.is_empty());
        assert_eq!(applied.get(), 1);
    }

    #[test]
    fn test_display_change_flag() {
        let state = TransitionState::new();
        state.set_display_change_scheduled(true);
        assert!(state.is_display_change_scheduled());
        state.set_display_change_scheduled(false);
        assert!(!state.is_display_change_scheduled());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(PipState::ScheduledBoundsChange.to_string(), "scheduled_bounds_change");
        assert_eq!(PipState::ChangedPipBounds.as_str(), "changed_pip_bounds");
        assert!(PipState::EnteringPip < PipState::Idle);
    }
}
