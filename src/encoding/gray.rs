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


//! 8-bit grayscale tile encoding: one luminance byte per pixel, no
//! dithering, PGM `P5` framing with maxval 255.

use bytes::{BufMut, BytesMut};

use super::common::{luminance, put_pgm_header};
use super::{FrameView, Rect, TileEncoding};
use crate::error::Result;

/// Implements the 8-bit grayscale encoding (`G` devices).
pub struct GrayEncoding;

impl TileEncoding for GrayEncoding {
    fn encode(&self, frame: &FrameView<'_>, rect: Rect) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(24 + (rect.w * rect.h) as usize);
        put_pgm_header(&mut buf, rect.w, rect.h, 255);

        let fw = frame.width as usize;
        for row in 0..rect.h as usize {
            let base = ((rect.y as usize + row) * fw + rect.x as usize) * 3;
            for px in frame.rgb[base..base + rect.w as usize * 3].chunks_exact(3) {
                buf.put_u8(luminance(px[0], px[1], px[2]));
            }
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::encode_tile;
    use crate::mode::ColorMode;

    fn gradient_frame(w: u32, h: u32) -> Vec<u8> {
        (0..w * h)
            .flat_map(|i| {
                let v = (i % 256) as u8;
                [v, v, v]
            })
            .collect()
    }

    #[test]
    fn test_full_frame() {
        let rgb = gradient_frame(4, 2);
        let frame = FrameView { rgb: &rgb, mono: None, width: 4, height: 2 };
        let tile = encode_tile(&frame, ColorMode::Gray, Rect::new(0, 0, 4, 2)).unwrap();
        assert_eq!(&tile[..], b"P5\n4 2\n255\n\x00\x01\x02\x03\x04\x05\x06\x07");
    }

    #[test]
    fn test_subrect_offsets() {
        let rgb = gradient_frame(4, 4);
        let frame = FrameView { rgb: &rgb, mono: None, width: 4, height: 4 };
        let tile = encode_tile(&frame, ColorMode::Gray, Rect::new(1, 2, 2, 2)).unwrap();
        let body = &tile[b"P5\n2 2\n255\n".len()..];
        assert_eq!(body, &[9, 10, 13, 14]);
    }

    #[test]
    fn test_stitching_byte_level() {
        let rgb: Vec<u8> = (0..6 * 3 * 3).map(|i| (i * 91 % 256) as u8).collect();
        let frame = FrameView { rgb: &rgb, mono: None, width: 6, height: 3 };

        let left = encode_tile(&frame, ColorMode::Gray, Rect::new(0, 0, 3, 3)).unwrap();
        let right = encode_tile(&frame, ColorMode::Gray, Rect::new(3, 0, 3, 3)).unwrap();
        let full = encode_tile(&frame, ColorMode::Gray, Rect::new(0, 0, 6, 3)).unwrap();

        let lbody = &left[b"P5\n3 3\n255\n".len()..];
        let rbody = &right[b"P5\n3 3\n255\n".len()..];
        let fbody = &full[b"P5\n6 3\n255\n".len()..];
        for row in 0..3 {
            assert_eq!(&fbody[row * 6..row * 6 + 3], &lbody[row * 3..row * 3 + 3]);
            assert_eq!(&fbody[row * 6 + 3..row * 6 + 6], &rbody[row * 3..row * 3 + 3]);
        }
    }

    #[test]
    fn test_out_of_bounds_rect() {
        let rgb = gradient_frame(4, 4);
        let frame = FrameView { rgb: &rgb, mono: None, width: 4, height: 4 };
        assert!(encode_tile(&frame, ColorMode::Gray, Rect::new(2, 2, 3, 3)).is_err());
    }
}
