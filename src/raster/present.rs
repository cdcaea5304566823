//! Presentation of the composite through a viewport.
//!
//! A [`Frame`] has two layers of the same size: `base` (background plus the
//! transformed composite) and `overlay` (the selection outline only), so the
//! selection can be redrawn without touching the base layer.

use std::path::Path;

use image::{Rgba, RgbaImage};
use neuroplace_wire::Color;

use super::store::{allocate_image, save_png};
use super::{RasterError, RasterStore};
use crate::viewport::{Cell, Viewport};

/// Selection stroke width in device pixels, at any zoom.
pub const SELECTION_STROKE_PX: f64 = 3.0;

/// A two-layer presentation surface.
#[derive(Debug, Clone)]
pub struct Frame {
    base: RgbaImage,
    overlay: RgbaImage,
}

impl Frame {
    /// Allocate a surface of `width × height` device pixels.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::SurfaceUnavailable`] for an empty or
    /// unallocatable surface.
    pub fn new(width: u32, height: u32) -> Result<Self, RasterError> {
        Ok(Self {
            base: allocate_image(width, height, Rgba([0, 0, 0, 0]))?,
            overlay: allocate_image(width, height, Rgba([0, 0, 0, 0]))?,
        })
    }

    /// Surface width.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.base.width()
    }

    /// Surface height.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.base.height()
    }

    /// Background and composite layer.
    #[must_use]
    pub fn base(&self) -> &RgbaImage {
        &self.base
    }

    /// Selection layer; transparent except for the outline.
    #[must_use]
    pub fn overlay(&self) -> &RgbaImage {
        &self.overlay
    }

    /// Both layers merged, overlay on top.
    #[must_use]
    pub fn flatten(&self) -> RgbaImage {
        let mut out = self.base.clone();
        for (dst, src) in out.pixels_mut().zip(self.overlay.pixels()) {
            if src.0[3] != 0 {
                *dst = *src;
            }
        }
        out
    }

    /// Write the flattened frame as a PNG file.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::Export`] if encoding or writing fails.
    pub fn save_png(&self, path: &Path) -> Result<(), RasterError> {
        save_png(&self.flatten(), path)
    }
}

impl RasterStore {
    /// Draw the composite and the selection into `frame`.
    ///
    /// Sampling is nearest-neighbour at device pixel centres. Surface pixels
    /// not covered by a set cell show the store's background color.
    pub fn present(
        &self,
        frame: &mut Frame,
        viewport: &Viewport,
        selection: Option<Cell>,
        accent: Color,
    ) {
        let Some(composite) = self.composite() else {
            return;
        };
        let background = Rgba(self.background().to_rgba());
        let (cw, ch) = composite.dimensions();

        // Composite column for each surface column; None when off-grid.
        let source = |device: u32, offset: f64, limit: u32| -> Option<u32> {
            let s = ((f64::from(device) + 0.5 - offset) / viewport.scale).floor();
            (s >= 0.0 && s < f64::from(limit)).then_some(s as u32)
        };
        let columns: Vec<Option<u32>> = (0..frame.width())
            .map(|dx| source(dx, viewport.offset_x, cw))
            .collect();

        for dy in 0..frame.height() {
            let sy = source(dy, viewport.offset_y, ch);
            for (dx, sx) in columns.iter().enumerate() {
                let pixel = match (*sx, sy) {
                    (Some(sx), Some(sy)) => {
                        let p = *composite.get_pixel(sx, sy);
                        if p.0[3] == 0 { background } else { p }
                    }
                    _ => background,
                };
                frame.base.put_pixel(dx as u32, dy, pixel);
            }
        }

        self.present_selection(frame, viewport, selection, accent);
    }

    /// Redraw only the selection layer.
    ///
    /// The outline is centred on the cell edge and [`SELECTION_STROKE_PX`]
    /// device pixels wide regardless of zoom.
    pub fn present_selection(
        &self,
        frame: &mut Frame,
        viewport: &Viewport,
        selection: Option<Cell>,
        accent: Color,
    ) {
        if self.is_render_degraded() {
            return;
        }
        for p in frame.overlay.pixels_mut() {
            *p = Rgba([0, 0, 0, 0]);
        }
        let Some(cell) = selection else {
            return;
        };

        let geometry = self.geometry();
        let extent = geometry.cell_extent(viewport);
        let (x0, y0) = geometry.cell_to_pixel(i64::from(cell.x), i64::from(cell.y), viewport);
        let (x1, y1) = (x0 + extent, y0 + extent);
        let half = SELECTION_STROKE_PX / 2.0;
        let stroke = Rgba(accent.to_rgba());

        let span = |lo: f64, hi: f64, limit: u32| -> (u32, u32) {
            let start = (lo - half).floor().max(0.0);
            let end = (hi + half).ceil().min(f64::from(limit));
            if end <= start {
                (0, 0)
            } else {
                (start as u32, end as u32)
            }
        };
        let (col_start, col_end) = span(x0, x1, frame.width());
        let (row_start, row_end) = span(y0, y1, frame.height());

        for dy in row_start..row_end {
            let cy = f64::from(dy) + 0.5;
            for dx in col_start..col_end {
                let cx = f64::from(dx) + 0.5;
                let in_outer =
                    cx >= x0 - half && cx < x1 + half && cy >= y0 - half && cy < y1 + half;
                let in_inner =
                    cx >= x0 + half && cx < x1 - half && cy >= y0 + half && cy < y1 - half;
                if in_outer && !in_inner {
                    frame.overlay.put_pixel(dx, dy, stroke);
                }
            }
        }
    }
}
