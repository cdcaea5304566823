//! Layered raster renderer.
//!
//! [`RasterStore`] owns the authoritative cell grid together with two
//! derived buffers that are kept consistent on every mutation:
//!
//! - the **composite**: one `pixel_size × pixel_size` block per cell, opaque
//!   where the cell is set and transparent where it is not
//! - the **overview**: a decimated view, one pixel per
//!   `overview_factor × overview_factor` block of cells
//!
//! Presentation ([`present`]) draws the composite through a [`Viewport`]
//! into a [`Frame`], with the selection outline on its own overlay layer.
//!
//! [`Viewport`]: crate::viewport::Viewport

pub mod present;
pub mod store;

pub use present::Frame;
pub use store::RasterStore;

/// Errors raised by the raster store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RasterError {
    /// A write targeted a cell outside the grid.
    #[error("cell ({x}, {y}) is outside the grid")]
    OutOfBounds {
        /// Requested column.
        x: i64,
        /// Requested row.
        y: i64,
    },

    /// A bulk replace was given a snapshot with no cells.
    #[error("snapshot contains no cells")]
    EmptyGrid,

    /// A pixel buffer could not be allocated.
    #[error("surface unavailable: {0}")]
    SurfaceUnavailable(String),

    /// Writing an image file failed.
    #[error("export failed: {0}")]
    Export(String),
}
