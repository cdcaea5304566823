//! Cell colors.
//!
//! Every grid cell resolves to exact 8-bit RGB and is always opaque. The
//! canonical text form is lowercase `#rrggbb`; parsing also accepts `#rgb`
//! shorthand, a bare six-digit hex string, and CSS `rgb()` / `rgba()`
//! functional notation (alpha is discarded).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::WireError;

/// An opaque 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Color {
    /// `#000000`, the color of unset cells.
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    /// `#ffffff`, the default canvas background.
    pub const WHITE: Self = Self::rgb(255, 255, 255);
    /// `#ffa500`, the default selection accent.
    pub const ORANGE: Self = Self::rgb(255, 165, 0);

    /// Build a color from its channels.
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// The channels as an opaque RGBA quadruple.
    #[must_use]
    pub const fn to_rgba(self) -> [u8; 4] {
        [self.r, self.g, self.b, 255]
    }

    /// Lowercase `#rrggbb` form.
    #[must_use]
    pub fn to_hex(self) -> String {
        self.to_string()
    }

    /// Parse any of the accepted text forms.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidColor`] when the text matches none of them.
    pub fn parse(text: &str) -> Result<Self, WireError> {
        let trimmed = text.trim();
        let invalid = || WireError::InvalidColor(text.to_owned());

        let lower = trimmed.to_ascii_lowercase();
        if let Some(args) = lower
            .strip_prefix("rgba(")
            .or_else(|| lower.strip_prefix("rgb("))
        {
            let args = args.strip_suffix(')').ok_or_else(invalid)?;
            let mut channels = args.split(',').map(str::trim);
            let mut next = || -> Result<u8, WireError> {
                channels
                    .next()
                    .and_then(|c| c.parse::<u8>().ok())
                    .ok_or_else(invalid)
            };
            return Ok(Self::rgb(next()?, next()?, next()?));
        }

        let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let digit = |i: usize| -> u8 {
            // Validated above, so every byte is a hex digit.
            char::from(hex.as_bytes()[i]).to_digit(16).unwrap_or(0) as u8
        };
        match hex.len() {
            6 => Ok(Self::rgb(
                digit(0) << 4 | digit(1),
                digit(2) << 4 | digit(3),
                digit(4) << 4 | digit(5),
            )),
            3 => Ok(Self::rgb(digit(0) * 17, digit(1) * 17, digit(2) * 17)),
            _ => Err(invalid()),
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<[u8; 3]> for Color {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self::rgb(r, g, b)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
