//! Pure coordinate and layout math: zoom projection, grid snapping, page
//! clamping, resize-handle geometry, and keyboard nudges.
//!
//! Everything here is stateless; positions and extents are integer logical
//! units, pointer input arrives in screen pixels.

use crate::doc::{Dimension, Position};

/// Grid applied to keyboard-nudge movement. Free-hand drag is not snapped.
pub const GRID_SIZE: i64 = 5;

/// Minimum block extent on every axis, and the fallback extent substituted
/// for missing or non-positive sizes when clamping.
pub const MIN_BLOCK_EXTENT: i64 = 10;

/// Keyboard nudge distances in screen pixels.
pub const NUDGE_STEP: i64 = 1;
pub const NUDGE_STEP_LARGE: i64 = 10;

pub const MIN_ZOOM: f64 = 0.25;
pub const MAX_ZOOM: f64 = 2.0;
pub const ZOOM_STEP: f64 = 0.1;

/// Page extent in logical units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSize {
    pub width: i64,
    pub height: i64,
}

impl PageSize {
    pub fn new(width: i64, height: i64) -> Self {
        Self { width, height }
    }
}

/// Converts a pointer delta in screen pixels to logical units, rounded to
/// the nearest integer. A non-positive zoom is treated as 1.
pub fn to_logical(pointer_delta: f64, zoom: f64) -> i64 {
    let zoom = if zoom > 0.0 { zoom } else { 1.0 };
    (pointer_delta / zoom).round() as i64
}

/// Snaps a value to the nearest grid line.
pub fn snap(value: i64, grid: i64) -> i64 {
    if grid <= 0 {
        return value;
    }
    ((value as f64 / grid as f64).round() as i64) * grid
}

/// Projects a screen point onto the page: origin-relative, zoom-divided,
/// clamped at the page's top-left corner.
pub fn project_point(screen_x: f64, screen_y: f64, origin_x: f64, origin_y: f64, zoom: f64) -> Position {
    Position::new(
        to_logical(screen_x - origin_x, zoom).max(0),
        to_logical(screen_y - origin_y, zoom).max(0),
    )
}

fn extent_or_fallback(dim: Option<Dimension>, total: i64) -> i64 {
    match dim {
        Some(dim) => {
            let extent = dim.resolve(total);
            if extent > 0 { extent } else { MIN_BLOCK_EXTENT }
        }
        None => MIN_BLOCK_EXTENT,
    }
}

/// Clamps a position so the block stays inside the page. Missing or
/// non-positive extents fall back to [`MIN_BLOCK_EXTENT`].
pub fn clamp_to_page(
    position: Position,
    width: Option<Dimension>,
    height: Option<Dimension>,
    page: PageSize,
) -> Position {
    let w = extent_or_fallback(width, page.width);
    let h = extent_or_fallback(height, page.height);
    let max_x = (page.width - w).max(0);
    let max_y = (page.height - h).max(0);
    Position::new(position.x.clamp(0, max_x), position.y.clamp(0, max_y))
}

/// The eight compass resize handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handle {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Handle {
    fn moves_left_edge(self) -> bool {
        matches!(self, Handle::West | Handle::NorthWest | Handle::SouthWest)
    }

    fn moves_right_edge(self) -> bool {
        matches!(self, Handle::East | Handle::NorthEast | Handle::SouthEast)
    }

    fn moves_top_edge(self) -> bool {
        matches!(self, Handle::North | Handle::NorthWest | Handle::NorthEast)
    }

    fn moves_bottom_edge(self) -> bool {
        matches!(self, Handle::South | Handle::SouthWest | Handle::SouthEast)
    }
}

/// A resolved block box in logical units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxGeometry {
    pub position: Position,
    pub width: i64,
    pub height: i64,
}

impl BoxGeometry {
    pub fn new(position: Position, width: i64, height: i64) -> Self {
        Self {
            position,
            width,
            height,
        }
    }
}

/// Computes the new box for a handle drag, holding the opposite edge(s)
/// fixed. Width and height never go below [`MIN_BLOCK_EXTENT`]; the
/// position never goes negative.
pub fn resize(handle: Handle, origin: BoxGeometry, dx: i64, dy: i64) -> BoxGeometry {
    let mut out = origin;

    if handle.moves_right_edge() {
        out.width = (origin.width + dx).max(MIN_BLOCK_EXTENT);
    } else if handle.moves_left_edge() {
        out.width = (origin.width - dx).max(MIN_BLOCK_EXTENT);
        out.position.x = (origin.position.x + dx).max(0);
    }

    if handle.moves_bottom_edge() {
        out.height = (origin.height + dy).max(MIN_BLOCK_EXTENT);
    } else if handle.moves_top_edge() {
        out.height = (origin.height - dy).max(MIN_BLOCK_EXTENT);
        out.position.y = (origin.position.y + dy).max(0);
    }

    out
}

/// Arrow-key directions for keyboard movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudgeKey {
    Left,
    Right,
    Up,
    Down,
}

/// Moves a position by one keyboard step (screen pixels converted through
/// zoom with a one-unit floor), snaps to the grid, then clamps to the page.
pub fn nudge(
    position: Position,
    key: NudgeKey,
    large: bool,
    zoom: f64,
    width: Option<Dimension>,
    height: Option<Dimension>,
    page: Option<PageSize>,
) -> Position {
    let step_px = if large { NUDGE_STEP_LARGE } else { NUDGE_STEP };
    let step = to_logical(step_px as f64, zoom).max(1);

    let mut next = position;
    match key {
        NudgeKey::Left => next.x = (next.x - step).max(0),
        NudgeKey::Right => next.x += step,
        NudgeKey::Up => next.y = (next.y - step).max(0),
        NudgeKey::Down => next.y += step,
    }
    next.x = snap(next.x, GRID_SIZE);
    next.y = snap(next.y, GRID_SIZE);

    match page {
        Some(page) => clamp_to_page(next, width, height, page),
        None => Position::new(next.x.max(0), next.y.max(0)),
    }
}

/// One zoom step in, clamped and rounded to two decimals.
pub fn zoom_in(zoom: f64) -> f64 {
    round2((zoom + ZOOM_STEP).min(MAX_ZOOM))
}

/// One zoom step out, clamped and rounded to two decimals.
pub fn zoom_out(zoom: f64) -> f64 {
    round2((zoom - ZOOM_STEP).max(MIN_ZOOM))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
