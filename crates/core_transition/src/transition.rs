//! Types and traits shared with the host's transition engine.
//!
//! The engine batches window changes into transitions, identifies each one
//! with an opaque [`TransitionToken`], and reports its lifecycle to registered
//! [`TransitionObserver`]s: ready, starting, then exactly one of merged or
//! finished.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::state::Transaction;
use crate::{DisplayId, Rect, WindowId};

/// Opaque, comparable identifier of one transition instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransitionToken(u64);

impl TransitionToken {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransitionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What happened to a container, or what kind of transition this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeMode {
    Open,
    Close,
    ToFront,
    ToBack,
    Change,
}

/// Windowing mode of a task container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowingMode {
    #[default]
    Undefined,
    Fullscreen,
    Freeform,
    /// The floating (picture-in-picture) window.
    Pinned,
}

/// One container's part in a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Identity of the window or display container.
    pub container: WindowId,
    pub mode: ChangeMode,
    /// The container is a display rather than a window.
    pub is_display: bool,
    pub windowing_mode: WindowingMode,
    pub start_abs_bounds: Rect,
    pub end_abs_bounds: Rect,
    pub start_display_id: DisplayId,
    pub end_display_id: DisplayId,
}

impl Change {
    /// A window change with empty bounds on display 0.
    pub fn new(container: WindowId, mode: ChangeMode) -> Self {
        Self {
            container,
            mode,
            is_display: false,
            windowing_mode: WindowingMode::Undefined,
            start_abs_bounds: Rect::default(),
            end_abs_bounds: Rect::default(),
            start_display_id: 0,
            end_display_id: 0,
        }
    }

    /// A `Change`-mode record for the display container of `display_id`.
    pub fn display(container: WindowId, display_id: DisplayId, bounds: Rect) -> Self {
        Self {
            is_display: true,
            start_abs_bounds: bounds,
            end_abs_bounds: bounds,
            start_display_id: display_id,
            end_display_id: display_id,
            ..Self::new(container, ChangeMode::Change)
        }
    }

    pub fn with_windowing_mode(mut self, mode: WindowingMode) -> Self {
        self.windowing_mode = mode;
        self
    }

    pub fn with_bounds(mut self, start: Rect, end: Rect) -> Self {
        self.start_abs_bounds = start;
        self.end_abs_bounds = end;
        self
    }

    pub fn with_displays(mut self, start: DisplayId, end: DisplayId) -> Self {
        self.start_display_id = start;
        self.end_display_id = end;
        self
    }

    /// True if this is the floating window's record.
    pub fn is_pip(&self) -> bool {
        !self.is_display && self.windowing_mode == WindowingMode::Pinned
    }
}

/// Everything the engine reports about a ready transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionInfo {
    pub kind: ChangeMode,
    /// Change records, top-most containers first.
    pub changes: Vec<Change>,
}

impl TransitionInfo {
    pub fn new(kind: ChangeMode) -> Self {
        Self {
            kind,
            changes: Vec::new(),
        }
    }

    pub fn with_change(mut self, change: Change) -> Self {
        self.changes.push(change);
        self
    }

    pub fn add_change(&mut self, change: Change) {
        self.changes.push(change);
    }

    /// True if any display container changed, i.e. the display
    /// configuration itself changed.
    pub fn has_display_change(&self) -> bool {
        self.changes
            .iter()
            .any(|c| c.is_display && c.mode == ChangeMode::Change)
    }

    /// The floating window's change record, if the transition touches it.
    pub fn pip_change(&self) -> Option<&Change> {
        self.changes.iter().find(|c| c.is_pip())
    }
}

/// Receives the lifecycle of every transition the engine plays.
pub trait TransitionObserver {
    fn on_transition_ready(
        &self,
        token: TransitionToken,
        info: &TransitionInfo,
        start_transaction: &dyn Transaction,
        finish_transaction: &dyn Transaction,
    );

    fn on_transition_starting(&self, token: TransitionToken);

    /// `merged` was absorbed into `playing` and will not finish on its own.
    fn on_transition_merged(&self, merged: TransitionToken, playing: TransitionToken);

    fn on_transition_finished(&self, token: TransitionToken, aborted: bool);
}

/// Handle returned by [`TransitionEngine::register_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Observer registration surface of the transition engine.
pub trait TransitionEngine {
    fn register_observer(&self, observer: Rc<dyn TransitionObserver>) -> ObserverId;

    /// Returns false if `id` was not registered.
    fn unregister_observer(&self, id: ObserverId) -> bool;
}
