//! The compositor-side floating window surface.

use std::cell::Cell;
use std::rc::Rc;

use openpip_core_transition::{DisplayId, Rect, Transaction};
use tracing::trace;

/// What the compositor currently shows for the floating window.
#[derive(Debug, Default)]
pub struct PipSurface {
    bounds: Cell<Rect>,
    display_id: Cell<DisplayId>,
    visible: Cell<bool>,
    commits: Cell<u64>,
}

impl PipSurface {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn bounds(&self) -> Rect {
        self.bounds.get()
    }

    pub fn display_id(&self) -> DisplayId {
        self.display_id.get()
    }

    pub fn is_visible(&self) -> bool {
        self.visible.get()
    }

    /// Number of transactions committed so far.
    pub fn commits(&self) -> u64 {
        self.commits.get()
    }

    fn commit(&self, op: SurfaceOp) {
        match op {
            SurfaceOp::Show { bounds, display_id } => {
                self.bounds.set(bounds);
                self.display_id.set(display_id);
                self.visible.set(true);
            }
            SurfaceOp::Place { bounds, display_id } => {
                self.bounds.set(bounds);
                self.display_id.set(display_id);
            }
            SurfaceOp::Hide => self.visible.set(false),
            SurfaceOp::Keep => {}
        }
        self.commits.set(self.commits.get() + 1);
        trace!(
            ?op,
            bounds = ?self.bounds.get(),
            display_id = self.display_id.get(),
            visible = self.visible.get(),
            "Surface committed"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SurfaceOp {
    Show { bounds: Rect, display_id: DisplayId },
    /// Move without changing visibility.
    Place { bounds: Rect, display_id: DisplayId },
    Hide,
    Keep,
}

/// A single commit to a [`PipSurface`]. Evaluated against the surface when
/// applied, not when built.
#[derive(Debug)]
pub struct SurfaceTransaction {
    surface: Rc<PipSurface>,
    op: SurfaceOp,
}

impl SurfaceTransaction {
    pub fn show(surface: &Rc<PipSurface>, bounds: Rect, display_id: DisplayId) -> Self {
        Self::with_op(surface, SurfaceOp::Show { bounds, display_id })
    }

    pub fn place(surface: &Rc<PipSurface>, bounds: Rect, display_id: DisplayId) -> Self {
        Self::with_op(surface, SurfaceOp::Place { bounds, display_id })
    }

    pub fn hide(surface: &Rc<PipSurface>) -> Self {
        Self::with_op(surface, SurfaceOp::Hide)
    }

    /// Recommit whatever the surface shows at apply time.
    pub fn keep(surface: &Rc<PipSurface>) -> Self {
        Self::with_op(surface, SurfaceOp::Keep)
    }

    fn with_op(surface: &Rc<PipSurface>, op: SurfaceOp) -> Self {
        Self {
            surface: Rc::clone(surface),
            op,
        }
    }
}

impl Transaction for SurfaceTransaction {
    fn apply(self: Box<Self>) {
        self.surface.commit(self.op);
    }
}
