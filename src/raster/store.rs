//! Authoritative grid plus its composite and overview buffers.

use std::path::Path;

use image::{ImageFormat, Rgba, RgbaImage};
use neuroplace_wire::{Color, GridSnapshot};

use super::RasterError;
use crate::viewport::GridGeometry;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Derived pixel buffers. Absent when allocation failed.
#[derive(Debug)]
struct Buffers {
    composite: RgbaImage,
    overview: RgbaImage,
}

/// The cell grid and everything rendered from it.
#[derive(Debug)]
pub struct RasterStore {
    geometry: GridGeometry,
    overview_factor: u32,
    background: Color,
    /// Row-major; `None` is an unset cell.
    cells: Vec<Option<Color>>,
    buffers: Option<Buffers>,
}

impl RasterStore {
    /// Create an empty store.
    ///
    /// If the composite or overview buffer cannot be allocated the store
    /// still tracks cells but renders nothing.
    #[must_use]
    pub fn new(geometry: GridGeometry, overview_factor: u32, background: Color) -> Self {
        let overview_factor = overview_factor.max(1);
        let buffers = match allocate_buffers(&geometry, overview_factor) {
            Ok(buffers) => Some(buffers),
            Err(e) => {
                tracing::warn!("raster buffers unavailable, rendering disabled: {e}");
                None
            }
        };
        Self {
            geometry,
            overview_factor,
            background,
            cells: vec![None; geometry.cell_count()],
            buffers,
        }
    }

    /// Build a store from the canvas configuration.
    #[must_use]
    pub fn from_config(config: &crate::config::CanvasConfig) -> Self {
        Self::new(config.geometry(), config.overview_factor, config.background)
    }

    /// Grid dimensions.
    #[must_use]
    pub fn geometry(&self) -> GridGeometry {
        self.geometry
    }

    /// Overview decimation factor.
    #[must_use]
    pub fn overview_factor(&self) -> u32 {
        self.overview_factor
    }

    /// Surface color shown behind unset cells.
    #[must_use]
    pub fn background(&self) -> Color {
        self.background
    }

    /// `true` when buffers could not be allocated and rendering is a no-op.
    #[must_use]
    pub fn is_render_degraded(&self) -> bool {
        self.buffers.is_none()
    }

    /// The full-resolution composite, if rendering is available.
    #[must_use]
    pub fn composite(&self) -> Option<&RgbaImage> {
        self.buffers.as_ref().map(|b| &b.composite)
    }

    /// The decimated overview, if rendering is available.
    #[must_use]
    pub fn overview(&self) -> Option<&RgbaImage> {
        self.buffers.as_ref().map(|b| &b.overview)
    }

    /// Raw cell value; `None` when unset or out of bounds.
    #[must_use]
    pub fn cell(&self, x: i64, y: i64) -> Option<Color> {
        let cell = self.geometry.cell(x, y)?;
        self.cells[self.index(cell.x, cell.y)]
    }

    /// Color of a cell for display: black when unset or out of bounds.
    #[must_use]
    pub fn color_at(&self, x: i64, y: i64) -> Color {
        self.cell(x, y).unwrap_or(Color::BLACK)
    }

    /// Number of set cells.
    #[must_use]
    pub fn filled_cells(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Copy the grid out as a snapshot.
    #[must_use]
    pub fn snapshot(&self) -> GridSnapshot {
        let width = self.geometry.width as usize;
        if width == 0 {
            return GridSnapshot::default();
        }
        GridSnapshot::from_rows(self.cells.chunks(width).map(<[_]>::to_vec).collect())
    }

    /// Replace every cell from a full snapshot and repaint both buffers.
    ///
    /// Snapshot cells beyond the grid are ignored; grid cells the snapshot
    /// does not cover become unset.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::EmptyGrid`] if the snapshot has no cells; the
    /// store is left untouched.
    pub fn replace_all(&mut self, snapshot: &GridSnapshot) -> Result<(), RasterError> {
        if snapshot.is_empty() {
            return Err(RasterError::EmptyGrid);
        }
        let (width, height) = (self.geometry.width, self.geometry.height);
        if snapshot.width() != width as usize || snapshot.height() != height as usize {
            tracing::debug!(
                "snapshot is {}x{}, grid is {width}x{height}; fitting",
                snapshot.width(),
                snapshot.height()
            );
        }

        for y in 0..height {
            for x in 0..width {
                let index = self.index(x, y);
                self.cells[index] = snapshot.get(x as usize, y as usize);
            }
        }

        if self.buffers.is_some() {
            for y in 0..height {
                for x in 0..width {
                    self.paint_block(x, y);
                }
            }
            self.rebuild_overview();
        }
        Ok(())
    }

    /// Set one cell and repaint its composite block and overview pixel.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::OutOfBounds`] if `(x, y)` is outside the grid;
    /// nothing changes in that case.
    pub fn set_cell(&mut self, x: i64, y: i64, color: Color) -> Result<(), RasterError> {
        let cell = self
            .geometry
            .cell(x, y)
            .ok_or(RasterError::OutOfBounds { x, y })?;
        let index = self.index(cell.x, cell.y);
        self.cells[index] = Some(color);

        if self.buffers.is_some() {
            self.paint_block(cell.x, cell.y);
            let (ox, oy) = (cell.x / self.overview_factor, cell.y / self.overview_factor);
            if self.representative(ox, oy) == (cell.x, cell.y) {
                self.paint_overview_pixel(ox, oy);
            }
        }
        Ok(())
    }

    /// Write the overview as a PNG file.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::SurfaceUnavailable`] in degraded mode and
    /// [`RasterError::Export`] if encoding or writing fails.
    pub fn save_overview_png(&self, path: &Path) -> Result<(), RasterError> {
        let overview = self
            .overview()
            .ok_or_else(|| RasterError::SurfaceUnavailable("no overview buffer".into()))?;
        save_png(overview, path)
    }

    /// Write the full-resolution composite as a PNG file.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::SurfaceUnavailable`] in degraded mode and
    /// [`RasterError::Export`] if encoding or writing fails.
    pub fn save_composite_png(&self, path: &Path) -> Result<(), RasterError> {
        let composite = self
            .composite()
            .ok_or_else(|| RasterError::SurfaceUnavailable("no composite buffer".into()))?;
        save_png(composite, path)
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.geometry.width as usize + x as usize
    }

    /// The cell whose color an overview pixel shows: the last one in
    /// row-major order within its block, clamped to the grid edge.
    fn representative(&self, ox: u32, oy: u32) -> (u32, u32) {
        let f = self.overview_factor;
        let last_x = self.geometry.width.saturating_sub(1);
        let last_y = self.geometry.height.saturating_sub(1);
        (
            (ox * f).saturating_add(f - 1).min(last_x),
            (oy * f).saturating_add(f - 1).min(last_y),
        )
    }

    fn paint_block(&mut self, x: u32, y: u32) {
        let pixel = match self.cells[self.index(x, y)] {
            Some(color) => Rgba(color.to_rgba()),
            None => TRANSPARENT,
        };
        let size = self.geometry.pixel_size;
        let Some(buffers) = self.buffers.as_mut() else {
            return;
        };
        for py in y * size..(y + 1) * size {
            for px in x * size..(x + 1) * size {
                buffers.composite.put_pixel(px, py, pixel);
            }
        }
    }

    fn paint_overview_pixel(&mut self, ox: u32, oy: u32) {
        let (rx, ry) = self.representative(ox, oy);
        let color = self.cells[self.index(rx, ry)].unwrap_or(Color::BLACK);
        if let Some(buffers) = self.buffers.as_mut() {
            buffers.overview.put_pixel(ox, oy, Rgba(color.to_rgba()));
        }
    }

    fn rebuild_overview(&mut self) {
        let Some((width, height)) = self.overview().map(|o| o.dimensions()) else {
            return;
        };
        for oy in 0..height {
            for ox in 0..width {
                self.paint_overview_pixel(ox, oy);
            }
        }
    }
}

fn allocate_buffers(geometry: &GridGeometry, factor: u32) -> Result<Buffers, RasterError> {
    let overflow = || {
        RasterError::SurfaceUnavailable(format!(
            "{}x{} cells at {}px overflows",
            geometry.width, geometry.height, geometry.pixel_size
        ))
    };
    let composite_w = geometry.width.checked_mul(geometry.pixel_size).ok_or_else(overflow)?;
    let composite_h = geometry.height.checked_mul(geometry.pixel_size).ok_or_else(overflow)?;
    let composite = allocate_image(composite_w, composite_h, TRANSPARENT)?;
    let overview = allocate_image(
        geometry.width.div_ceil(factor),
        geometry.height.div_ceil(factor),
        Rgba(Color::BLACK.to_rgba()),
    )?;
    Ok(Buffers {
        composite,
        overview,
    })
}

/// Allocate a filled image without aborting on allocation failure.
pub(crate) fn allocate_image(
    width: u32,
    height: u32,
    fill: Rgba<u8>,
) -> Result<RgbaImage, RasterError> {
    if width == 0 || height == 0 {
        return Err(RasterError::SurfaceUnavailable(format!(
            "{width}x{height} surface has no pixels"
        )));
    }
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| RasterError::SurfaceUnavailable(format!("{width}x{height} overflows")))?;

    let mut raw: Vec<u8> = Vec::new();
    raw.try_reserve_exact(len)
        .map_err(|e| RasterError::SurfaceUnavailable(format!("{width}x{height}: {e}")))?;
    raw.resize(len, 0);
    if fill != TRANSPARENT {
        for px in raw.chunks_exact_mut(4) {
            px.copy_from_slice(&fill.0);
        }
    }
    RgbaImage::from_raw(width, height, raw)
        .ok_or_else(|| RasterError::SurfaceUnavailable(format!("{width}x{height} buffer mismatch")))
}

pub(crate) fn save_png(image: &RgbaImage, path: &Path) -> Result<(), RasterError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| RasterError::Export(e.to_string()))?;
    }
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| RasterError::Export(e.to_string()))
}
