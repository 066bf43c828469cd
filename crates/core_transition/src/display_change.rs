//! Keeps the transition state in sync with display configuration changes.
//!
//! Hot-plug and similar events reach the floating window as ordinary
//! transitions of the engine rather than as explicit transfer requests. The
//! observer tracks the ones that change the display configuration and, when
//! they also move the floating window, mirrors them into the state machine.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::{debug, info, trace};

use crate::bounds::PipBoundsState;
use crate::state::{PipState, StatePayload, Transaction, TransactionSlot, TransitionState};
use crate::transition::{
    ObserverId, TransitionEngine, TransitionInfo, TransitionObserver, TransitionToken,
};

pub struct DisplayChangeObserver {
    state: Weak<TransitionState>,
    bounds_state: Rc<PipBoundsState>,
    /// Display change transitions between ready and merged/finished.
    display_change_transitions: RefCell<HashMap<TransitionToken, TransitionInfo>>,
    observer_id: Cell<Option<ObserverId>>,
}

impl DisplayChangeObserver {
    pub fn new(state: &Rc<TransitionState>, bounds_state: Rc<PipBoundsState>) -> Rc<Self> {
        Rc::new(Self {
            state: Rc::downgrade(state),
            bounds_state,
            display_change_transitions: RefCell::new(HashMap::new()),
            observer_id: Cell::new(None),
        })
    }

    /// Start observing `engine`.
    pub fn register(self: &Rc<Self>, engine: &dyn TransitionEngine) {
        let observer: Rc<dyn TransitionObserver> = self.clone();
        if let Some(previous) = self.observer_id.replace(Some(engine.register_observer(observer)))
        {
            engine.unregister_observer(previous);
        }
    }

    /// Stop observing `engine`.
    pub fn teardown(&self, engine: &dyn TransitionEngine) {
        if let Some(id) = self.observer_id.take() {
            engine.unregister_observer(id);
        }
    }

    pub fn is_tracking(&self, token: TransitionToken) -> bool {
        self.display_change_transitions.borrow().contains_key(&token)
    }

    pub fn tracked_transition_count(&self) -> usize {
        self.display_change_transitions.borrow().len()
    }

    /// Settle the floating window at the end bounds of a tracked transition.
    fn on_display_change_done(&self, token: TransitionToken, info: &TransitionInfo) {
        let Some(pip_change) = info.pip_change() else {
            trace!(%token, "Display change did not touch the floating window");
            return;
        };
        let Some(state) = self.state.upgrade() else {
            return;
        };
        if !state.is_in_pip() {
            debug!(%token, state = %state.state(), "Not in PiP, skipping display change bounds");
            return;
        }

        info!(%token, bounds = ?pip_change.end_abs_bounds, "Display change moved floating window");
        self.bounds_state.set_bounds(pip_change.end_abs_bounds);
        state.set_state(PipState::ChangedPipBounds, None);
    }
}

impl TransitionObserver for DisplayChangeObserver {
    fn on_transition_ready(
        &self,
        token: TransitionToken,
        info: &TransitionInfo,
        _start_transaction: &dyn Transaction,
        _finish_transaction: &dyn Transaction,
    ) {
        if !info.has_display_change() {
            return;
        }
        debug!(%token, changes = info.changes.len(), "Tracking display change transition");
        self.display_change_transitions
            .borrow_mut()
            .insert(token, info.clone());
    }

    fn on_transition_starting(&self, token: TransitionToken) {
        // Release the map before touching the state machine.
        let end_bounds = match self.display_change_transitions.borrow().get(&token) {
            Some(info) => info.pip_change().map(|change| change.end_abs_bounds),
            None => return,
        };
        let Some(state) = self.state.upgrade() else {
            return;
        };

        state.set_display_change_scheduled(false);
        let Some(end_bounds) = end_bounds else {
            return;
        };
        if !state.is_pip_state_idle() {
            debug!(%token, state = %state.state(), "PiP busy, not mirroring display change");
            return;
        }

        state.set_state(
            PipState::ScheduledBoundsChange,
            Some(StatePayload::DisplayChange { token }),
        );
        // The engine applies its own transactions; the slot stays empty.
        state.set_state(
            PipState::ChangingPipBounds,
            Some(StatePayload::BoundsChange {
                transaction: TransactionSlot::empty(),
                destination: end_bounds,
            }),
        );
    }

    fn on_transition_merged(&self, merged: TransitionToken, playing: TransitionToken) {
        let Some(info) = self.display_change_transitions.borrow_mut().remove(&merged) else {
            return;
        };
        debug!(%merged, %playing, "Display change transition merged");
        self.on_display_change_done(merged, &info);
    }

    fn on_transition_finished(&self, token: TransitionToken, aborted: bool) {
        let Some(info) = self.display_change_transitions.borrow_mut().remove(&token) else {
            return;
        };
        debug!(%token, aborted, "Display change transition finished");
        self.on_display_change_done(token, &info);
    }
}
