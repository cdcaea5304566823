//! User-owned view state: viewport, selection and gesture tracking.
//!
//! Network events never touch anything in here. Every method corresponds to
//! one input gesture and reports whether the view changed, so the caller
//! knows whether to re-present.

use crate::viewport::{Cell, GridGeometry, Viewport};

/// Zoom step for the zoom-in control.
pub const ZOOM_IN_FACTOR: f64 = 1.2;
/// Zoom step for the zoom-out control.
pub const ZOOM_OUT_FACTOR: f64 = 0.8;
/// Wheel zoom step towards the user.
pub const WHEEL_IN_FACTOR: f64 = 1.1;
/// Wheel zoom step away from the user.
pub const WHEEL_OUT_FACTOR: f64 = 0.9;
/// A pointer that moved less than this (device px) between press and
/// release was a tap, not a drag.
pub const TAP_THRESHOLD_PX: f64 = 5.0;

#[derive(Debug, Clone, Copy)]
struct Drag {
    start: (f64, f64),
    last: (f64, f64),
}

/// Viewport, selection and in-progress gesture.
#[derive(Debug, Clone)]
pub struct ViewState {
    geometry: GridGeometry,
    viewport: Viewport,
    selection: Option<Cell>,
    surface: (f64, f64),
    drag: Option<Drag>,
}

impl ViewState {
    /// A view at the identity transform with nothing selected.
    #[must_use]
    pub fn new(geometry: GridGeometry, surface_width: u32, surface_height: u32) -> Self {
        Self {
            geometry,
            viewport: Viewport::default(),
            selection: None,
            surface: (f64::from(surface_width), f64::from(surface_height)),
            drag: None,
        }
    }

    /// Current transform.
    #[must_use]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Currently selected cell.
    #[must_use]
    pub fn selection(&self) -> Option<Cell> {
        self.selection
    }

    /// Grid the view maps onto.
    #[must_use]
    pub fn geometry(&self) -> GridGeometry {
        self.geometry
    }

    /// The presentation surface was resized.
    pub fn set_surface(&mut self, width: u32, height: u32) {
        self.surface = (f64::from(width), f64::from(height));
    }

    /// Replace the viewport wholesale (scale is clamped).
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Viewport::new(viewport.offset_x, viewport.offset_y, viewport.scale);
    }

    /// Translate by a device-pixel delta.
    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        self.viewport = self.viewport.panned(dx, dy);
    }

    /// Zoom about a surface point. Returns `false` at a scale bound.
    pub fn zoom_at(&mut self, factor: f64, center_x: f64, center_y: f64) -> bool {
        let next = self.viewport.zoom_at(factor, center_x, center_y);
        let changed = next != self.viewport;
        self.viewport = next;
        changed
    }

    /// Zoom-in control: one step about the surface centre.
    pub fn zoom_in(&mut self) -> bool {
        let (cx, cy) = self.surface_center();
        self.zoom_at(ZOOM_IN_FACTOR, cx, cy)
    }

    /// Zoom-out control: one step about the surface centre.
    pub fn zoom_out(&mut self) -> bool {
        let (cx, cy) = self.surface_center();
        self.zoom_at(ZOOM_OUT_FACTOR, cx, cy)
    }

    /// Mouse wheel: positive `delta_y` zooms out, anything else zooms in.
    pub fn wheel(&mut self, delta_y: f64, cursor_x: f64, cursor_y: f64) -> bool {
        let factor = if delta_y > 0.0 {
            WHEEL_OUT_FACTOR
        } else {
            WHEEL_IN_FACTOR
        };
        self.zoom_at(factor, cursor_x, cursor_y)
    }

    /// Two-finger pinch moved from `previous_distance` to `distance`
    /// around the midpoint `(center_x, center_y)`.
    pub fn pinch(
        &mut self,
        previous_distance: f64,
        distance: f64,
        center_x: f64,
        center_y: f64,
    ) -> bool {
        if previous_distance <= 0.0 || distance <= 0.0 {
            return false;
        }
        self.zoom_at(distance / previous_distance, center_x, center_y)
    }

    /// Pointer pressed.
    pub fn begin_drag(&mut self, x: f64, y: f64) {
        self.drag = Some(Drag {
            start: (x, y),
            last: (x, y),
        });
    }

    /// Pointer moved; pans while a drag is in progress.
    pub fn drag_to(&mut self, x: f64, y: f64) -> bool {
        let Some(drag) = self.drag.as_mut() else {
            return false;
        };
        let (dx, dy) = (x - drag.last.0, y - drag.last.1);
        drag.last = (x, y);
        self.viewport = self.viewport.panned(dx, dy);
        dx != 0.0 || dy != 0.0
    }

    /// Pointer released. A short movement counts as a tap and selects
    /// the cell under the pointer; the tapped cell is returned.
    pub fn end_drag(&mut self, x: f64, y: f64) -> Option<Cell> {
        let drag = self.drag.take()?;
        let distance = (x - drag.start.0).hypot(y - drag.start.1);
        if distance < TAP_THRESHOLD_PX {
            self.select_at(x, y)
        } else {
            None
        }
    }

    /// Select the cell under a surface point. Points outside the grid
    /// leave the selection unchanged and return `None`.
    pub fn select_at(&mut self, x: f64, y: f64) -> Option<Cell> {
        let (cx, cy) = self.geometry.unclamped_cell(x, y, &self.viewport);
        let cell = self.geometry.cell(cx, cy)?;
        self.selection = Some(cell);
        Some(cell)
    }

    /// Set or clear the selection directly. Out-of-grid cells are ignored.
    pub fn set_selection(&mut self, selection: Option<Cell>) {
        match selection {
            Some(cell) if !self.geometry.in_bounds(i64::from(cell.x), i64::from(cell.y)) => {}
            other => self.selection = other,
        }
    }

    /// Keyboard movement: step the selection, clamped to the grid. With no
    /// selection, selects the centre cell instead.
    pub fn move_selection(&mut self, dx: i32, dy: i32) -> Cell {
        let next = match self.selection {
            None => self.geometry.center(),
            Some(cell) => {
                let clamp = |v: u32, d: i32, len: u32| -> u32 {
                    let max = i64::from(len.saturating_sub(1));
                    (i64::from(v) + i64::from(d)).clamp(0, max) as u32
                };
                Cell::new(
                    clamp(cell.x, dx, self.geometry.width),
                    clamp(cell.y, dy, self.geometry.height),
                )
            }
        };
        self.selection = Some(next);
        next
    }

    fn surface_center(&self) -> (f64, f64) {
        (self.surface.0 / 2.0, self.surface.1 / 2.0)
    }
}
