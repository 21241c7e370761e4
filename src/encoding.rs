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

//! FrameBufferUpdate assembly with RAW rectangle encoding.
//!
//! The encoder drains the framebuffer's pending-update set into a single
//! `FrameBufferUpdate` wire message: the two-byte header and big-endian
//! rectangle count, then one RAW rectangle per pending entry. Rectangles
//! are drained in LIFO order (most recently queued first); clients do not
//! depend on the order, but it is kept stable for wire compatibility.
//!
//! RAW is the trivial encoding: for a `w × h` rectangle, `h` scanline
//! spans of `w × bytes_per_pixel` literal framebuffer bytes each.

use bytes::{BufMut, BytesMut};

use crate::framebuffer::{FrameState, UpdateRect};
use crate::protocol::{Rectangle, ENCODING_RAW, SERVER_MSG_FRAMEBUFFER_UPDATE};

/// Drains `state.pending` into a complete `FrameBufferUpdate` message.
///
/// An empty pending set produces a valid message with a zero rectangle
/// count. Caller holds the framebuffer lock.
#[allow(clippy::cast_possible_truncation)] // rectangle count capped to u16 below
pub(crate) fn encode_update(state: &mut FrameState) -> BytesMut {
    // A u16 caps the per-message rectangle count; any excess stays queued.
    let n_rects = state.pending.len().min(usize::from(u16::MAX));
    let body: usize = state
        .pending
        .iter()
        .rev()
        .take(n_rects)
        .map(|u| 12 + usize::from(u.width) * usize::from(u.height) * state.bytes_per_pixel)
        .sum();

    let mut buf = BytesMut::with_capacity(4 + body);
    buf.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
    buf.put_u8(0); // padding
    buf.put_u16(n_rects as u16);

    for _ in 0..n_rects {
        let Some(rect) = state.pending.pop() else {
            break;
        };
        put_raw_rect(&mut buf, state, rect);
    }
    buf
}

/// Appends one RAW rectangle: header, encoding word, then the pixel rows.
fn put_raw_rect(buf: &mut BytesMut, state: &FrameState, rect: UpdateRect) {
    Rectangle {
        x: rect.x,
        y: rect.y,
        width: rect.width,
        height: rect.height,
        encoding: ENCODING_RAW,
    }
    .write_header(buf);

    let bpp = state.bytes_per_pixel;
    let stride = usize::from(state.width) * bpp;
    let span = usize::from(rect.width) * bpp;
    for row in rect.y..rect.y + rect.height {
        let start = usize::from(row) * stride + usize::from(rect.x) * bpp;
        buf.put_slice(&state.buffer[start..start + span]);
    }
}
