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


//! 2-bit four-color tile encoding for black/white/red/blue panels.
//!
//! Each pixel is quantized to the nearest fixed palette entry by squared
//! Euclidean RGB distance. Ties resolve to the earliest palette entry,
//! so half-values land on black and keep the panel high-contrast. Four
//! pixels pack per byte MSB-first (row stride `(w+3)/4`), framed as a
//! low-maxval PGM.

use bytes::{BufMut, BytesMut};

use super::common::put_pgm_header;
use super::{FrameView, Rect, TileEncoding};
use crate::error::Result;

/// Fixed panel palette, in index order: black, white, red, blue.
pub const PALETTE: [(u8, u8, u8); 4] = [(0, 0, 0), (255, 255, 255), (255, 0, 0), (0, 0, 255)];

/// Returns the palette index nearest to an RGB value.
#[inline]
#[must_use]
pub fn quantize(r: u8, g: u8, b: u8) -> u8 {
    let mut best = 0u8;
    let mut best_dist = u32::MAX;
    for (i, &(pr, pg, pb)) in PALETTE.iter().enumerate() {
        let dr = i32::from(r) - i32::from(pr);
        let dg = i32::from(g) - i32::from(pg);
        let db = i32::from(b) - i32::from(pb);
        let dist = (dr * dr + dg * dg + db * db) as u32;
        // Strict comparison keeps the earliest entry on ties.
        if dist < best_dist {
            best_dist = dist;
            best = i as u8;
        }
    }
    best
}

/// Implements the 2-bit four-color encoding (`R` devices).
pub struct QuadEncoding;

impl TileEncoding for QuadEncoding {
    fn encode(&self, frame: &FrameView<'_>, rect: Rect) -> Result<BytesMut> {
        let stride = ((rect.w as usize) + 3) / 4;
        let mut buf = BytesMut::with_capacity(16 + stride * rect.h as usize);
        put_pgm_header(&mut buf, rect.w, rect.h, 3);

        let fw = frame.width as usize;
        for row in 0..rect.h as usize {
            let base = ((rect.y as usize + row) * fw + rect.x as usize) * 3;
            let mut byte = 0u8;
            for (col, px) in frame.rgb[base..base + rect.w as usize * 3]
                .chunks_exact(3)
                .enumerate()
            {
                let idx = quantize(px[0], px[1], px[2]);
                byte |= idx << ((3 - col % 4) * 2);
                if col % 4 == 3 {
                    buf.put_u8(byte);
                    byte = 0;
                }
            }
            if rect.w as usize % 4 != 0 {
                buf.put_u8(byte);
            }
        }
        Ok(buf)
    }
}
