// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Display mode value types.
//!
//! A display mode is carried on the wire as the canonical string
//! `WxHxBxC`, e.g. `800x480x1xB`: viewport width and height, bit depth,
//! and a color-mode letter. The (bits, letter) pair is redundant on
//! purpose; a string whose components disagree is rejected rather than
//! silently reinterpreted.

use std::fmt;
use std::str::FromStr;

use crate::error::WebInkError;

/// Color encoding a device's panel expects.
///
/// Exactly four combinations of bit depth and letter exist:
/// 1/`B` (dithered mono), 8/`G` (grayscale), 2/`R` (four-color palette),
/// 24/`C` (raw RGB).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorMode {
    /// 1-bit monochrome with Floyd-Steinberg dithering (`B`).
    Mono,
    /// 8-bit grayscale (`G`).
    Gray,
    /// 2-bit four-color palette: black, white, red, blue (`R`).
    Quad,
    /// 24-bit raw RGB (`C`).
    Rgb,
}

impl ColorMode {
    /// Bit depth of this mode.
    #[must_use]
    pub fn bits(self) -> u8 {
        match self {
            Self::Mono => 1,
            Self::Quad => 2,
            Self::Gray => 8,
            Self::Rgb => 24,
        }
    }

    /// Mode letter used in the canonical string form.
    #[must_use]
    pub fn letter(self) -> char {
        match self {
            Self::Mono => 'B',
            Self::Gray => 'G',
            Self::Quad => 'R',
            Self::Rgb => 'C',
        }
    }

    /// Builds a mode from a (bits, letter) pair, rejecting the twelve
    /// inconsistent combinations.
    #[must_use]
    pub fn from_parts(bits: u8, letter: char) -> Option<Self> {
        match (bits, letter) {
            (1, 'B') => Some(Self::Mono),
            (8, 'G') => Some(Self::Gray),
            (2, 'R') => Some(Self::Quad),
            (24, 'C') => Some(Self::Rgb),
            _ => None,
        }
    }

    /// HTTP content type of a tile encoded in this mode.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Mono => "image/x-portable-bitmap",
            Self::Gray | Self::Quad => "image/x-portable-graymap",
            Self::Rgb => "image/x-portable-pixmap",
        }
    }

    /// The wire format token requests must carry for this mode.
    #[must_use]
    pub fn format(self) -> TileFormat {
        match self {
            Self::Mono => TileFormat::Pbm,
            Self::Gray | Self::Quad => TileFormat::Pgm,
            Self::Rgb => TileFormat::Ppm,
        }
    }
}

/// Output framing requested by a client (`format` parameter / token).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileFormat {
    /// Portable bitmap, `P4`.
    Pbm,
    /// Portable graymap, `P5`.
    Pgm,
    /// Portable pixmap, `P6`.
    Ppm,
}

impl FromStr for TileFormat {
    type Err = WebInkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pbm" => Ok(Self::Pbm),
            "pgm" => Ok(Self::Pgm),
            "ppm" => Ok(Self::Ppm),
            other => Err(WebInkError::BadFormat(other.to_string())),
        }
    }
}

/// A device viewport plus its color encoding, parsed from `WxHxBxC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    /// Viewport width in pixels. Always > 0.
    pub width: u32,
    /// Viewport height in pixels. Always > 0.
    pub height: u32,
    /// Color encoding.
    pub color: ColorMode,
}

impl DisplayMode {
    /// Creates a display mode, rejecting empty viewports.
    pub fn new(width: u32, height: u32, color: ColorMode) -> crate::Result<Self> {
        if width == 0 || height == 0 {
            return Err(WebInkError::BadMode(format!(
                "{width}x{height}x{}x{}",
                color.bits(),
                color.letter()
            )));
        }
        Ok(Self { width, height, color })
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}x{}",
            self.width,
            self.height,
            self.color.bits(),
            self.color.letter()
        )
    }
}

impl FromStr for DisplayMode {
    type Err = WebInkError;

    /// Parses the canonical `WxHxBxC` form. Empty fields, zero viewport
    /// axes, unknown letters and inconsistent (bits, letter) pairs are
    /// all rejected with `BadMode`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || WebInkError::BadMode(s.to_string());

        let mut parts = s.split('x');
        let width: u32 = parts.next().and_then(|t| t.parse().ok()).ok_or_else(bad)?;
        let height: u32 = parts.next().and_then(|t| t.parse().ok()).ok_or_else(bad)?;
        let bits: u8 = parts.next().and_then(|t| t.parse().ok()).ok_or_else(bad)?;
        let letter = parts.next().ok_or_else(bad)?;
        if parts.next().is_some() {
            return Err(bad());
        }

        let mut chars = letter.chars();
        let letter = match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => return Err(bad()),
        };

        let color = ColorMode::from_parts(bits, letter).ok_or_else(bad)?;
        Self::new(width, height, color).map_err(|_| bad())
    }
}
