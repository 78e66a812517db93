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


//! 24-bit raw RGB tile encoding.
//!
//! The simplest encoding: copies the packed R,G,B source rows directly
//! under a PPM `P6` header. High bandwidth but lossless.

use bytes::{BufMut, BytesMut};

use super::common::put_ppm_header;
use super::{FrameView, Rect, TileEncoding};
use crate::error::Result;

/// Implements the raw 24-bit RGB encoding (`C` devices).
pub struct RgbEncoding;

impl TileEncoding for RgbEncoding {
    fn encode(&self, frame: &FrameView<'_>, rect: Rect) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(24 + (rect.w * rect.h * 3) as usize);
        put_ppm_header(&mut buf, rect.w, rect.h);

        let fw = frame.width as usize;
        for row in 0..rect.h as usize {
            let base = ((rect.y as usize + row) * fw + rect.x as usize) * 3;
            buf.put_slice(&frame.rgb[base..base + rect.w as usize * 3]);
        }
        Ok(buf)
    }
}
