//! Coordinate mapping between the presentation surface and grid cells.
//!
//! Everything here is pure: a [`Viewport`] is a value, and the mapping
//! functions take it as an argument. Device pixels are `f64`; cells are
//! integers. A cell at `(cx, cy)` covers the surface rectangle starting at
//! `offset + c * pixel_size * scale` with edge `pixel_size * scale`.

/// Smallest permitted zoom.
pub const MIN_SCALE: f64 = 0.1;
/// Largest permitted zoom.
pub const MAX_SCALE: f64 = 10.0;

/// Pan/zoom transform applied to the composite and the selection overlay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Horizontal translation in device pixels.
    pub offset_x: f64,
    /// Vertical translation in device pixels.
    pub offset_y: f64,
    /// Zoom factor, always within [`MIN_SCALE`, `MAX_SCALE`].
    pub scale: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            scale: 1.0,
        }
    }
}

/// Clamp a zoom factor into the permitted range.
#[must_use]
pub fn clamp_scale(scale: f64) -> f64 {
    if scale.is_nan() {
        return 1.0;
    }
    scale.clamp(MIN_SCALE, MAX_SCALE)
}

impl Viewport {
    /// Build a viewport; `scale` is clamped.
    #[must_use]
    pub fn new(offset_x: f64, offset_y: f64, scale: f64) -> Self {
        Self {
            offset_x,
            offset_y,
            scale: clamp_scale(scale),
        }
    }

    /// Translate by a device-pixel delta.
    #[must_use]
    pub fn panned(self, dx: f64, dy: f64) -> Self {
        Self {
            offset_x: self.offset_x + dx,
            offset_y: self.offset_y + dy,
            ..self
        }
    }

    /// Zoom by `factor` keeping the surface point `(center_x, center_y)`
    /// fixed. At a scale bound the viewport is returned unchanged.
    #[must_use]
    pub fn zoom_at(self, factor: f64, center_x: f64, center_y: f64) -> Self {
        let scale = clamp_scale(self.scale * factor);
        if scale == self.scale {
            return self;
        }
        let ratio = scale / self.scale;
        Self {
            offset_x: center_x - (center_x - self.offset_x) * ratio,
            offset_y: center_y - (center_y - self.offset_y) * ratio,
            scale,
        }
    }
}

/// A grid cell index known to be inside the grid it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

impl Cell {
    /// Build a cell index.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Grid dimensions and the composite cell size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridGeometry {
    /// Width in cells.
    pub width: u32,
    /// Height in cells.
    pub height: u32,
    /// Composite pixels per cell edge.
    pub pixel_size: u32,
}

impl GridGeometry {
    /// Build a geometry. Zero dimensions are allowed but map nothing.
    #[must_use]
    pub const fn new(width: u32, height: u32, pixel_size: u32) -> Self {
        Self {
            width,
            height,
            pixel_size,
        }
    }

    /// Total number of cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// `true` iff `0 <= x < width` and `0 <= y < height`.
    #[must_use]
    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < i64::from(self.width) && y < i64::from(self.height)
    }

    /// The cell at `(x, y)` if it is inside the grid.
    #[must_use]
    pub fn cell(&self, x: i64, y: i64) -> Option<Cell> {
        if self.in_bounds(x, y) {
            // In bounds, so both fit in u32.
            Some(Cell::new(x as u32, y as u32))
        } else {
            None
        }
    }

    /// The cell in the middle of the grid.
    #[must_use]
    pub fn center(&self) -> Cell {
        Cell::new(self.width / 2, self.height / 2)
    }

    /// Edge length of one cell on the surface under `viewport`.
    #[must_use]
    pub fn cell_extent(&self, viewport: &Viewport) -> f64 {
        f64::from(self.pixel_size) * viewport.scale
    }

    /// Floor-map a surface point to a cell index without clamping.
    #[must_use]
    pub fn unclamped_cell(&self, px: f64, py: f64, viewport: &Viewport) -> (i64, i64) {
        let extent = self.cell_extent(viewport);
        let map = |p: f64, offset: f64| -> i64 {
            let raw = ((p - offset) / extent).floor();
            if raw.is_nan() { 0 } else { raw as i64 }
        };
        (map(px, viewport.offset_x), map(py, viewport.offset_y))
    }

    /// Map a surface point to the cell under it, clamped into the grid.
    ///
    /// Points left of or above the grid map to row/column 0; points past
    /// the far edge map to the last row/column. Use [`Self::in_bounds`] on
    /// [`Self::unclamped_cell`] when the distinction matters.
    #[must_use]
    pub fn pixel_to_cell(&self, px: f64, py: f64, viewport: &Viewport) -> Cell {
        let (x, y) = self.unclamped_cell(px, py, viewport);
        let max_x = i64::from(self.width.saturating_sub(1));
        let max_y = i64::from(self.height.saturating_sub(1));
        Cell::new(x.clamp(0, max_x) as u32, y.clamp(0, max_y) as u32)
    }

    /// Top-left surface point of cell `(cx, cy)`. Not clamped.
    #[must_use]
    pub fn cell_to_pixel(&self, cx: i64, cy: i64, viewport: &Viewport) -> (f64, f64) {
        let extent = self.cell_extent(viewport);
        (
            cx as f64 * extent + viewport.offset_x,
            cy as f64 * extent + viewport.offset_y,
        )
    }
}
