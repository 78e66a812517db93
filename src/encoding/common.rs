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


//! Common helper functions shared across the tile encodings.

use bytes::{BufMut, BytesMut};

/// Rec. 601 integer luminance of one RGB pixel.
///
/// `Y = (299*R + 587*G + 114*B) / 1000`, computed in integer space so the
/// result is identical on every architecture.
#[inline]
#[must_use]
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    let y = (299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b)) / 1000;
    y as u8
}

/// Floyd-Steinberg dithers a packed RGB frame down to a 1-bit plane.
///
/// Returns one byte per pixel, 1 = black, 0 = white. The error diffusion
/// runs left-to-right, top-to-bottom over the whole frame with the
/// standard 7/16, 3/16, 5/16, 1/16 weights. Running over the full frame
/// before any tile is cut keeps a pixel's bit independent of which tile
/// it is later served in.
///
/// # Panics
///
/// Panics if `rgb.len() != width * height * 3` (caller bug).
#[must_use]
pub fn dither_mono(rgb: &[u8], width: usize, height: usize) -> Vec<u8> {
    assert_eq!(rgb.len(), width * height * 3, "frame size mismatch");

    // Working luminance copy; diffusion pushes values outside 0..=255.
    let mut lum: Vec<i32> = rgb
        .chunks_exact(3)
        .map(|px| i32::from(luminance(px[0], px[1], px[2])))
        .collect();

    let mut plane = vec![0u8; width * height];
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            let old = lum[idx];
            let new = if old >= 128 { 255 } else { 0 };
            plane[idx] = u8::from(new == 0);

            let err = old - new;
            if x + 1 < width {
                lum[idx + 1] += err * 7 / 16;
            }
            if y + 1 < height {
                if x > 0 {
                    lum[idx + width - 1] += err * 3 / 16;
                }
                lum[idx + width] += err * 5 / 16;
                if x + 1 < width {
                    lum[idx + width + 1] += err / 16;
                }
            }
        }
    }
    plane
}

/// Writes a `P4` bitmap header: `P4\n<w> <h>\n`.
pub fn put_pbm_header(buf: &mut BytesMut, w: u32, h: u32) {
    buf.put_slice(format!("P4\n{w} {h}\n").as_bytes());
}

/// Writes a `P5` graymap header: `P5\n<w> <h>\n<maxval>\n`.
pub fn put_pgm_header(buf: &mut BytesMut, w: u32, h: u32, maxval: u32) {
    buf.put_slice(format!("P5\n{w} {h}\n{maxval}\n").as_bytes());
}

/// Writes a `P6` pixmap header: `P6\n<w> <h>\n255\n`.
pub fn put_ppm_header(buf: &mut BytesMut, w: u32, h: u32) {
    buf.put_slice(format!("P6\n{w} {h}\n255\n").as_bytes());
}
