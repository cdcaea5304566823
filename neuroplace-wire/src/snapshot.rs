//! Full-grid snapshots.
//!
//! A snapshot is a JSON array of rows, each row an array of `"#rrggbb"`
//! strings. Servers in the wild send `null` rows for untouched lines and
//! occasionally junk cells, so decoding maps anything that is not a valid
//! color to an unset cell instead of rejecting the whole grid.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::color::Color;

/// A row-major grid of optional cell colors. `None` is an unset cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridSnapshot {
    rows: Vec<Vec<Option<Color>>>,
}

impl GridSnapshot {
    /// Wrap already-decoded rows.
    #[must_use]
    pub fn from_rows(rows: Vec<Vec<Option<Color>>>) -> Self {
        Self { rows }
    }

    /// A `width × height` grid with every cell set to `color`.
    #[must_use]
    pub fn filled(width: usize, height: usize, color: Color) -> Self {
        Self {
            rows: vec![vec![Some(color); width]; height],
        }
    }

    /// Rows in top-to-bottom order.
    #[must_use]
    pub fn rows(&self) -> &[Vec<Option<Color>>] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Length of the longest row.
    #[must_use]
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// `true` when the snapshot carries no cells at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }

    /// The cell at `(x, y)`, or `None` if unset or outside the snapshot.
    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> Option<Color> {
        self.rows.get(y).and_then(|row| row.get(x)).copied().flatten()
    }

    /// Set one cell, growing the snapshot as needed.
    pub fn set(&mut self, x: usize, y: usize, color: Color) {
        if self.rows.len() <= y {
            self.rows.resize_with(y + 1, Vec::new);
        }
        let row = &mut self.rows[y];
        if row.len() <= x {
            row.resize(x + 1, None);
        }
        row[x] = Some(color);
    }
}

/// A cell that decodes from any JSON value, keeping only valid colors.
struct LenientCell(Option<Color>);

impl<'de> Deserialize<'de> for LenientCell {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Self(value.as_str().and_then(|s| Color::parse(s).ok())))
    }
}

impl<'de> Deserialize<'de> for GridSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Vec<Option<Vec<LenientCell>>> = Vec::deserialize(deserializer)?;
        let rows = raw
            .into_iter()
            .map(|row| {
                row.unwrap_or_default()
                    .into_iter()
                    .map(|cell| cell.0)
                    .collect()
            })
            .collect();
        Ok(Self { rows })
    }
}

impl Serialize for GridSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.rows.serialize(serializer)
    }
}
