//! OpenPip Core Transition
//!
//! Platform-agnostic coordinator for moving a floating (picture-in-picture)
//! window between displays.
//!
//! This crate implements three cooperating pieces:
//! - [`TransitionState`]: the per-window state machine with synchronous,
//!   ordered listener dispatch
//! - [`DisplayTransferHandler`]: drives explicit "move to display" requests
//!   through the bounds scheduler and applies the resulting transaction
//! - [`DisplayChangeObserver`]: watches the transition engine for display
//!   configuration changes that also reposition the floating window
//!
//! The transition engine, the bounds scheduler and the compositor are
//! collaborators supplied by the host through the traits in [`transition`]
//! and [`transfer`].

pub mod bounds;
pub mod display_change;
pub mod state;
pub mod transfer;
pub mod transition;

use serde::{Deserialize, Serialize};

pub use bounds::PipBoundsState;
pub use display_change::DisplayChangeObserver;
pub use state::{
    ListenerId, PipState, StatePayload, Transaction, TransactionSlot, TransitionState,
    TransitionStateListener,
};
pub use transfer::{BoundsScheduler, DisplayTransferHandler, TransferRequest};
pub use transition::{
    Change, ChangeMode, ObserverId, TransitionEngine, TransitionInfo, TransitionObserver,
    TransitionToken, WindowingMode,
};

/// Opaque identifier of a physical or virtual display.
pub type DisplayId = u32;

/// Unique identifier for a window container.
pub type WindowId = u64;

/// A rectangle in absolute screen coordinates (pixels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    /// Create a new rectangle.
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Get the right edge x-coordinate, saturating at `i32::MAX`.
    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    /// Get the bottom edge y-coordinate, saturating at `i32::MAX`.
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    /// True if both far edges fit in `i32`.
    pub fn edges_in_range(&self) -> bool {
        self.x.checked_add(self.width).is_some() && self.y.checked_add(self.height).is_some()
    }

    /// True if the rectangle has no area.
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}
