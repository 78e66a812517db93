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

//! Tile encoding implementations.
//!
//! This module converts a captured RGB frame into the byte stream an
//! e-ink panel consumes: an axis-aligned sub-rectangle, encoded at the
//! panel's bit depth and prefixed with canonical PNM framing. Encoders
//! are pure functions of the frame contents; the same tile of the same
//! frame always produces identical bytes, and adjacent tiles concatenate
//! into the bytes of their union.

use bytes::BytesMut;

use crate::error::{Result, WebInkError};
use crate::mode::ColorMode;

pub mod common;
pub mod gray;
pub mod mono;
pub mod quad;
pub mod rgb;

pub use common::{dither_mono, luminance};
pub use gray::GrayEncoding;
pub use mono::MonoEncoding;
pub use quad::QuadEncoding;
pub use rgb::RgbEncoding;

/// An axis-aligned sub-rectangle of a frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width. Must be > 0.
    pub w: u32,
    /// Height. Must be > 0.
    pub h: u32,
}

impl Rect {
    /// Creates a rectangle without bounds-checking it against a frame.
    #[must_use]
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Checks that the rectangle is non-empty and lies entirely within a
    /// `frame_w` x `frame_h` frame.
    pub fn validate(&self, frame_w: u32, frame_h: u32) -> Result<()> {
        let fits = self.w > 0
            && self.h > 0
            && self.x.checked_add(self.w).is_some_and(|r| r <= frame_w)
            && self.y.checked_add(self.h).is_some_and(|b| b <= frame_h);
        if fits {
            Ok(())
        } else {
            Err(WebInkError::InvalidRect {
                x: self.x,
                y: self.y,
                w: self.w,
                h: self.h,
                frame_w,
                frame_h,
            })
        }
    }
}

/// Borrowed view of a captured frame handed to the encoders.
///
/// `rgb` is tightly packed `width * height * 3` bytes. `mono` is the
/// pre-dithered plane (one byte per pixel, 1 = black) and is only
/// present for mono devices; dithering runs over the full frame at
/// capture time so that tile bytes do not depend on slicing.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    /// Packed RGB pixel data.
    pub rgb: &'a [u8],
    /// Full-frame dithered plane, if the device is mono.
    pub mono: Option<&'a [u8]>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

/// Trait defining the interface for tile encoding implementations.
pub trait TileEncoding {
    /// Encodes one rectangle of the frame, PNM header included.
    ///
    /// The rectangle has already been validated against the frame
    /// bounds by [`encode_tile`].
    fn encode(&self, frame: &FrameView<'_>, rect: Rect) -> Result<BytesMut>;
}

/// Creates an encoder instance for the given color mode.
#[must_use]
pub fn encoder_for(color: ColorMode) -> Box<dyn TileEncoding> {
    match color {
        ColorMode::Mono => Box::new(MonoEncoding),
        ColorMode::Gray => Box::new(GrayEncoding),
        ColorMode::Quad => Box::new(QuadEncoding),
        ColorMode::Rgb => Box::new(RgbEncoding),
    }
}

/// Validates `rect` against the frame and produces the framed tile bytes.
pub fn encode_tile(frame: &FrameView<'_>, color: ColorMode, rect: Rect) -> Result<BytesMut> {
    rect.validate(frame.width, frame.height)?;
    encoder_for(color).encode(frame, rect)
}
