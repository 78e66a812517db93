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


//! 1-bit monochrome tile encoding.
//!
//! Slices the pre-dithered full-frame plane and packs 8 pixels per byte,
//! MSB-first, set bit = black, matching PBM `P4` raster layout. The row
//! stride is `(w+7)/8` bytes; trailing bits of a ragged final byte are
//! zero.

use bytes::{BufMut, BytesMut};

use super::common::put_pbm_header;
use super::{FrameView, Rect, TileEncoding};
use crate::error::{Result, WebInkError};

/// Implements the 1-bit dithered mono encoding (`B` devices).
pub struct MonoEncoding;

impl TileEncoding for MonoEncoding {
    fn encode(&self, frame: &FrameView<'_>, rect: Rect) -> Result<BytesMut> {
        let plane = frame.mono.ok_or_else(|| {
            WebInkError::RenderFailed("snapshot has no dithered plane".to_string())
        })?;

        let stride = ((rect.w as usize) + 7) / 8;
        let mut buf = BytesMut::with_capacity(16 + stride * rect.h as usize);
        put_pbm_header(&mut buf, rect.w, rect.h);

        let fw = frame.width as usize;
        for row in 0..rect.h as usize {
            let base = (rect.y as usize + row) * fw + rect.x as usize;
            let mut byte = 0u8;
            for col in 0..rect.w as usize {
                if plane[base + col] != 0 {
                    byte |= 0x80 >> (col % 8);
                }
                if col % 8 == 7 {
                    buf.put_u8(byte);
                    byte = 0;
                }
            }
            if rect.w as usize % 8 != 0 {
                buf.put_u8(byte);
            }
        }
        Ok(buf)
    }
}
