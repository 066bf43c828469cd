//! Display layout tracking and floating window placement.

use std::collections::BTreeMap;

use openpip_core_transition::{DisplayId, Rect};
use thiserror::Error;

use crate::config::DisplayConfig;

/// Errors from editing or querying the display layout.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DisplayError {
    #[error("Unknown display {0}")]
    Unknown(DisplayId),

    #[error("Display {0} is already attached")]
    AlreadyAttached(DisplayId),

    #[error("Display {0} has empty bounds")]
    EmptyBounds(DisplayId),

    #[error("Display {0} extends past the coordinate range")]
    OutOfRange(DisplayId),

    #[error("Cannot detach display {0}: it is the last display")]
    LastDisplay(DisplayId),
}

/// A physical or virtual display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Display {
    pub id: DisplayId,
    pub name: String,
    pub rect: Rect,
    pub primary: bool,
}

impl From<&DisplayConfig> for Display {
    fn from(config: &DisplayConfig) -> Self {
        Self {
            id: config.id,
            name: config.name.clone(),
            rect: config.rect(),
            primary: config.primary,
        }
    }
}

/// The set of attached displays. Exactly one display is primary while the
/// layout is non-empty.
#[derive(Debug, Clone, Default)]
pub struct DisplayLayout {
    displays: BTreeMap<DisplayId, Display>,
}

impl DisplayLayout {
    pub fn from_config(displays: &[DisplayConfig]) -> Self {
        let mut layout = Self::default();
        for config in displays {
            layout.displays.insert(config.id, Display::from(config));
        }
        layout.ensure_primary();
        layout
    }

    pub fn get(&self, id: DisplayId) -> Option<&Display> {
        self.displays.get(&id)
    }

    pub fn contains(&self, id: DisplayId) -> bool {
        self.displays.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.displays.len()
    }

    /// Displays ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &Display> {
        self.displays.values()
    }

    pub fn primary(&self) -> Option<&Display> {
        self.displays.values().find(|d| d.primary)
    }

    /// Add a display. It never becomes primary unless it is the only one.
    pub fn attach(&mut self, id: DisplayId, name: String, rect: Rect) -> Result<&Display, DisplayError> {
        if self.displays.contains_key(&id) {
            return Err(DisplayError::AlreadyAttached(id));
        }
        if rect.is_empty() {
            return Err(DisplayError::EmptyBounds(id));
        }
        if !rect.edges_in_range() {
            return Err(DisplayError::OutOfRange(id));
        }
        self.displays.insert(
            id,
            Display {
                id,
                name,
                rect,
                primary: false,
            },
        );
        self.ensure_primary();
        self.get(id).ok_or(DisplayError::Unknown(id))
    }

    /// Remove a display. If it was primary, the lowest remaining id takes over.
    pub fn detach(&mut self, id: DisplayId) -> Result<Display, DisplayError> {
        if !self.displays.contains_key(&id) {
            return Err(DisplayError::Unknown(id));
        }
        if self.displays.len() == 1 {
            return Err(DisplayError::LastDisplay(id));
        }
        let removed = self.displays.remove(&id).ok_or(DisplayError::Unknown(id))?;
        self.ensure_primary();
        Ok(removed)
    }

    /// The display sharing the largest area with `rect`.
    pub fn display_for(&self, rect: Rect) -> Option<&Display> {
        self.displays
            .values()
            .map(|d| (overlap_area(&d.rect, &rect), d))
            .filter(|(area, _)| *area > 0)
            .max_by_key(|(area, _)| *area)
            .map(|(_, d)| d)
    }

    fn ensure_primary(&mut self) {
        if self.displays.values().filter(|d| d.primary).count() == 1 {
            return;
        }
        let first = self.displays.keys().next().copied();
        for display in self.displays.values_mut() {
            display.primary = Some(display.id) == first;
        }
    }
}

fn overlap_area(a: &Rect, b: &Rect) -> i64 {
    let width = i64::from(a.right().min(b.right())) - i64::from(a.x.max(b.x));
    let height = i64::from(a.bottom().min(b.bottom())) - i64::from(a.y.max(b.y));
    if width <= 0 || height <= 0 {
        return 0;
    }
    width * height
}

/// Initial floating window bounds: `width` x `height`, `margin` pixels from
/// the bottom-right corner of `display`.
pub fn initial_bounds(display: &Rect, width: i32, height: i32, margin: i32) -> Rect {
    let width = width.min(display.width);
    let height = height.min(display.height);
    clamp_into(
        Rect::new(
            display.right().saturating_sub(margin).saturating_sub(width),
            display.bottom().saturating_sub(margin).saturating_sub(height),
            width,
            height,
        ),
        display,
    )
}

/// Bounds for a window at `bounds` on `from` after moving it to `to`.
///
/// The size and the offset from the bottom-right corner are kept; the result
/// is shrunk and clamped to fit inside `to`.
pub fn relocate(bounds: Rect, from: &Rect, to: &Rect) -> Rect {
    let right_gap = from.right().saturating_sub(bounds.right());
    let bottom_gap = from.bottom().saturating_sub(bounds.bottom());
    let width = bounds.width.min(to.width);
    let height = bounds.height.min(to.height);
    clamp_into(
        Rect::new(
            to.right().saturating_sub(right_gap).saturating_sub(width),
            to.bottom().saturating_sub(bottom_gap).saturating_sub(height),
            width,
            height,
        ),
        to,
    )
}

/// `bounds` shrunk to fit inside `area` and moved the shortest distance
/// needed to lie within it.
pub fn fit_into(bounds: Rect, area: &Rect) -> Rect {
    clamp_into(
        Rect::new(
            bounds.x,
            bounds.y,
            bounds.width.min(area.width),
            bounds.height.min(area.height),
        ),
        area,
    )
}

fn clamp_into(rect: Rect, area: &Rect) -> Rect {
    let x = rect
        .x
        .clamp(area.x, area.right().saturating_sub(rect.width).max(area.x));
    let y = rect
        .y
        .clamp(area.y, area.bottom().saturating_sub(rect.height).max(area.y));
    Rect::new(x, y, rect.width, rect.height)
}
