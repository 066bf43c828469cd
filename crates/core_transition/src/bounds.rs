//! Bounds store for the floating window.

use std::cell::Cell;

use tracing::debug;

use crate::{DisplayId, Rect};

/// Where the floating window currently is.
///
/// Owned by the host and handed to collaborators as an `Rc` handle; updates
/// go through the explicit setters.
#[derive(Debug, Default)]
pub struct PipBoundsState {
    bounds: Cell<Rect>,
    display_id: Cell<DisplayId>,
}

impl PipBoundsState {
    pub fn new(bounds: Rect, display_id: DisplayId) -> Self {
        Self {
            bounds: Cell::new(bounds),
            display_id: Cell::new(display_id),
        }
    }

    pub fn bounds(&self) -> Rect {
        self.bounds.get()
    }

    pub fn set_bounds(&self, bounds: Rect) {
        debug!(?bounds, "PiP bounds updated");
        self.bounds.set(bounds);
    }

    /// Display currently hosting the floating window.
    pub fn display_id(&self) -> DisplayId {
        self.display_id.get()
    }

    pub fn set_display_id(&self, display_id: DisplayId) {
        self.display_id.set(display_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_state_setters() {
        let store = PipBoundsState::new(Rect::new(0, 0, 100, 100), 0);
        store.set_bounds(Rect::new(10, 10, 200, 150));
        store.set_display_id(3);
        assert_eq!(store.bounds(), Rect::new(10, 10, 200, 150));
        assert_eq!(store.display_id(), 3);
    }
}
