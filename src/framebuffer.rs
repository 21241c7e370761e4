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

//! Thread-safe framebuffer storage with dirty-rectangle tracking.
//!
//! The framebuffer owns a contiguous, row-major pixel buffer whose size is
//! fixed at construction (`width × height × bytes_per_pixel`) together with
//! the pending-update set: the list of rectangles dirtied since the last
//! update message was drained. Both live behind a single mutex so that a
//! painter thread and the connection tasks never observe a half-written
//! region alongside its dirty record.
//!
//! Rectangular access is granted through [`AreaMut`] and [`Area`] views,
//! which borrow the lock guard: pixel access is only possible while the
//! lock is held, and the borrow ends when the view is dropped. Acquiring a
//! mutable view queues the rectangle in the pending-update set; a read-only
//! view does not.

use bytes::Bytes;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::encoding;

/// Bit depth of the framebuffer, fixed at server construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelDepth {
    /// 8 bits per pixel (1 byte).
    Eight,
    /// 16 bits per pixel (2 bytes).
    Sixteen,
    /// 32 bits per pixel (4 bytes).
    ThirtyTwo,
}

impl PixelDepth {
    /// Bits per pixel.
    #[must_use]
    pub fn bits(self) -> u8 {
        match self {
            PixelDepth::Eight => 8,
            PixelDepth::Sixteen => 16,
            PixelDepth::ThirtyTwo => 32,
        }
    }

    /// Bytes per pixel.
    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        usize::from(self.bits() / 8)
    }
}

/// A 4-byte RGBX colour value as stored in a 32-bit framebuffer.
///
/// The fourth byte is padding, not alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Colour {
    /// Red component.
    pub red: u8,
    /// Green component.
    pub green: u8,
    /// Blue component.
    pub blue: u8,
    /// Padding byte.
    pub pad: u8,
}

impl Colour {
    /// Creates a colour from its RGB components with zero padding.
    #[must_use]
    pub const fn rgb(red: u8, green: u8, blue: u8) -> Self {
        Self {
            red,
            green,
            blue,
            pad: 0,
        }
    }

    /// The colour as the 4 framebuffer bytes of a 32-bpp pixel.
    #[must_use]
    pub const fn bytes(self) -> [u8; 4] {
        [self.red, self.green, self.blue, self.pad]
    }
}

/// A dirtied rectangle queued for the next framebuffer update message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRect {
    /// X coordinate of the top-left corner.
    pub x: u16,
    /// Y coordinate of the top-left corner.
    pub y: u16,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
}

/// Pixel bytes and the pending-update set, guarded together.
pub(crate) struct FrameState {
    pub(crate) width: u16,
    pub(crate) bytes_per_pixel: usize,
    pub(crate) buffer: Vec<u8>,
    pub(crate) pending: Vec<UpdateRect>,
}

impl FrameState {
    fn stride(&self) -> usize {
        usize::from(self.width) * self.bytes_per_pixel
    }
}

/// The shared framebuffer: fixed-size pixel storage plus dirty tracking.
///
/// Cheap accessors (`width`, `height`, `depth`) read immutable fields and
/// never contend with painters. All pixel access goes through the mutex.
pub struct Framebuffer {
    width: u16,
    height: u16,
    depth: PixelDepth,
    state: Mutex<FrameState>,
}

impl Framebuffer {
    /// Creates a zero-filled framebuffer of the given dimensions and depth.
    ///
    /// # Panics
    ///
    /// Panics if `width` or `height` is zero.
    #[must_use]
    pub fn new(width: u16, height: u16, depth: PixelDepth) -> Self {
        assert!(width > 0 && height > 0, "framebuffer dimensions must be non-zero");
        let len = usize::from(width) * usize::from(height) * depth.bytes_per_pixel();
        Self {
            width,
            height,
            depth,
            state: Mutex::new(FrameState {
                width,
                bytes_per_pixel: depth.bytes_per_pixel(),
                buffer: vec![0u8; len],
                pending: Vec::new(),
            }),
        }
    }

    /// Width of the framebuffer in pixels.
    #[must_use]
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Height of the framebuffer in pixels.
    #[must_use]
    pub fn height(&self) -> u16 {
        self.height
    }

    /// The configured pixel depth.
    #[must_use]
    pub fn depth(&self) -> PixelDepth {
        self.depth
    }

    fn lock_state(&self) -> MutexGuard<'_, FrameState> {
        // A panicked painter leaves the pixels usable; recover the guard.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a mutable view of the rectangle spanning columns `[x1, x2)`
    /// and rows `[y1, y2)`, and queues it in the pending-update set.
    ///
    /// The framebuffer lock is held for the lifetime of the view; drop it
    /// before calling anything that encodes an update. An empty rectangle
    /// (`x1 == x2` or `y1 == y2`) yields a view with no rows and queues
    /// nothing.
    ///
    /// # Panics
    ///
    /// Panics if `x1 > x2`, `y1 > y2`, `x2 > width` or `y2 > height`; these
    /// are programming errors.
    #[must_use]
    pub fn get_area(&self, x1: u16, y1: u16, x2: u16, y2: u16) -> AreaMut<'_> {
        self.check_bounds(x1, y1, x2, y2);
        let mut guard = self.lock_state();
        if x2 > x1 && y2 > y1 {
            guard.pending.push(UpdateRect {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
            });
        }
        AreaMut {
            guard,
            x1: usize::from(x1),
            y1: usize::from(y1),
            x2: usize::from(x2),
            y2: usize::from(y2),
        }
    }

    /// Returns a read-only view of the rectangle spanning columns `[x1, x2)`
    /// and rows `[y1, y2)`. Does not touch the pending-update set.
    ///
    /// # Panics
    ///
    /// Panics on the same out-of-bounds conditions as [`Framebuffer::get_area`].
    #[must_use]
    pub fn get_readonly_area(&self, x1: u16, y1: u16, x2: u16, y2: u16) -> Area<'_> {
        self.check_bounds(x1, y1, x2, y2);
        Area {
            guard: self.lock_state(),
            x1: usize::from(x1),
            y1: usize::from(y1),
            x2: usize::from(x2),
            y2: usize::from(y2),
        }
    }

    /// Queues a rectangle in the pending-update set without touching pixels.
    ///
    /// Used for client framebuffer-update requests, so the rectangle is
    /// clipped to the framebuffer bounds rather than trusted; requests that
    /// end up empty are dropped.
    pub fn add_update_request(&self, x: u16, y: u16, width: u16, height: u16) {
        let x = x.min(self.width);
        let y = y.min(self.height);
        let width = width.min(self.width - x);
        let height = height.min(self.height - y);
        if width == 0 || height == 0 {
            return;
        }
        self.lock_state().pending.push(UpdateRect {
            x,
            y,
            width,
            height,
        });
    }

    /// Drains the pending-update set into a complete `FrameBufferUpdate`
    /// wire message and returns it.
    ///
    /// The message is assembled entirely under the framebuffer lock and the
    /// lock is released before this function returns, so the caller can
    /// hand the buffer to socket writers without holding it. An empty
    /// pending set yields a valid message with a zero rectangle count.
    #[must_use]
    pub fn take_update_message(&self) -> Bytes {
        let mut guard = self.lock_state();
        encoding::encode_update(&mut guard).freeze()
    }

    fn check_bounds(&self, x1: u16, y1: u16, x2: u16, y2: u16) {
        assert!(x1 <= x2, "area columns inverted: x1={x1} > x2={x2}");
        assert!(y1 <= y2, "area rows inverted: y1={y1} > y2={y2}");
        assert!(x2 <= self.width, "area exceeds width: x2={x2} > {}", self.width);
        assert!(y2 <= self.height, "area exceeds height: y2={y2} > {}", self.height);
    }

    #[cfg(test)]
    pub(crate) fn pending_rects(&self) -> Vec<UpdateRect> {
        self.lock_state().pending.clone()
    }
}

/// A mutable rectangular view into the framebuffer.
///
/// Holds the framebuffer lock; rows are scanline slices of
/// `(x2 - x1) × bytes_per_pixel` bytes each.
pub struct AreaMut<'a> {
    guard: MutexGuard<'a, FrameState>,
    x1: usize,
    y1: usize,
    x2: usize,
    y2: usize,
}

impl AreaMut<'_> {
    /// Number of rows in the view.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.y2 - self.y1
    }

    /// Iterates over the rows of the rectangle as mutable byte slices.
    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [u8]> {
        let bpp = self.guard.bytes_per_pixel;
        let stride = self.guard.stride();
        let (x1, x2) = (self.x1 * bpp, self.x2 * bpp);
        self.guard
            .buffer
            .chunks_exact_mut(stride)
            .skip(self.y1)
            .take(self.y2 - self.y1)
            .map(move |row| &mut row[x1..x2])
    }

    /// Iterates over the rows of the rectangle as shared byte slices.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        let bpp = self.guard.bytes_per_pixel;
        let stride = self.guard.stride();
        let (x1, x2) = (self.x1 * bpp, self.x2 * bpp);
        self.guard
            .buffer
            .chunks_exact(stride)
            .skip(self.y1)
            .take(self.y2 - self.y1)
            .map(move |row| &row[x1..x2])
    }
}

/// A read-only rectangular view into the framebuffer.
///
/// Holds the framebuffer lock; acquiring one does not queue an update.
pub struct Area<'a> {
    guard: MutexGuard<'a, FrameState>,
    x1: usize,
    y1: usize,
    x2: usize,
    y2: usize,
}

impl Area<'_> {
    /// Number of rows in the view.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.y2 - self.y1
    }

    /// Iterates over the rows of the rectangle as shared byte slices.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        let bpp = self.guard.bytes_per_pixel;
        let stride = self.guard.stride();
        let (x1, x2) = (self.x1 * bpp, self.x2 * bpp);
        self.guard
            .buffer
            .chunks_exact(stride)
            .skip(self.y1)
            .take(self.y2 - self.y1)
            .map(move |row| &row[x1..x2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_row_geometry() {
        let fb = Framebuffer::new(64, 48, PixelDepth::ThirtyTwo);
        let mut area = fb.get_area(2, 3, 10, 13);
        assert_eq!(area.row_count(), 10);
        let rows: Vec<usize> = area.rows_mut().map(|row| row.len()).collect();
        assert_eq!(rows.len(), 10);
        assert!(rows.iter().all(|&len| len == 8 * 4));
    }

    #[test]
    fn depth_scales_row_bytes() {
        for (depth, bpp) in [
            (PixelDepth::Eight, 1),
            (PixelDepth::Sixteen, 2),
            (PixelDepth::ThirtyTwo, 4),
        ] {
            let fb = Framebuffer::new(16, 16, depth);
            let area = fb.get_readonly_area(0, 0, 10, 3);
            assert_eq!(area.row_count(), 3);
            assert_eq!(area.rows().count(), 3);
            assert!(area.rows().all(|row| row.len() == 10 * bpp));
        }
    }

    #[test]
    fn get_area_queues_one_rect() {
        let fb = Framebuffer::new(32, 32, PixelDepth::Eight);
        drop(fb.get_area(1, 2, 11, 22));
        assert_eq!(
            fb.pending_rects(),
            vec![UpdateRect {
                x: 1,
                y: 2,
                width: 10,
                height: 20,
            }]
        );
    }

    #[test]
    fn readonly_area_queues_nothing() {
        let fb = Framebuffer::new(32, 32, PixelDepth::Eight);
        drop(fb.get_readonly_area(0, 0, 32, 32));
        assert!(fb.pending_rects().is_empty());
    }

    #[test]
    fn empty_area_is_empty_and_queues_nothing() {
        let fb = Framebuffer::new(32, 32, PixelDepth::Eight);
        let mut area = fb.get_area(5, 5, 5, 20);
        assert_eq!(area.row_count(), 15);
        assert!(area.rows_mut().all(|row| row.is_empty()));
        drop(area);
        drop(fb.get_area(5, 5, 20, 5));
        assert!(fb.pending_rects().is_empty());
    }

    #[test]
    fn writes_are_visible_to_readers() {
        let fb = Framebuffer::new(8, 8, PixelDepth::ThirtyTwo);
        {
            let mut area = fb.get_area(1, 1, 3, 2);
            for row in area.rows_mut() {
                for pixel in row.chunks_exact_mut(4) {
                    pixel.copy_from_slice(&Colour::rgb(9, 8, 7).bytes());
                }
            }
        }
        let area = fb.get_readonly_area(1, 1, 3, 2);
        let row: Vec<u8> = area.rows().next().unwrap().to_vec();
        assert_eq!(row, [9, 8, 7, 0, 9, 8, 7, 0]);
    }

    #[test]
    fn mutable_view_reads_back_without_writing() {
        let fb = Framebuffer::new(8, 8, PixelDepth::ThirtyTwo);
        {
            let mut area = fb.get_area(2, 2, 4, 4);
            for row in area.rows_mut() {
                for pixel in row.chunks_exact_mut(4) {
                    pixel.copy_from_slice(&Colour::rgb(4, 5, 6).bytes());
                }
            }
        }

        // A mutable view also reads; painters use this to blend with what
        // is already on screen.
        let area = fb.get_area(2, 2, 4, 4);
        let rows: Vec<Vec<u8>> = area.rows().map(<[u8]>::to_vec).collect();
        assert_eq!(rows.len(), 2);
        for row in rows {
            assert_eq!(row, [4, 5, 6, 0, 4, 5, 6, 0]);
        }
    }

    #[test]
    fn update_requests_are_clipped() {
        let fb = Framebuffer::new(100, 50, PixelDepth::Eight);
        fb.add_update_request(90, 40, 50, 50);
        fb.add_update_request(200, 0, 10, 10); // fully outside, dropped
        assert_eq!(
            fb.pending_rects(),
            vec![UpdateRect {
                x: 90,
                y: 40,
                width: 10,
                height: 10,
            }]
        );
    }

    #[test]
    #[should_panic(expected = "columns inverted")]
    fn inverted_area_panics() {
        let fb = Framebuffer::new(16, 16, PixelDepth::Eight);
        let _ = fb.get_area(10, 0, 5, 5);
    }

    #[test]
    #[should_panic(expected = "exceeds width")]
    fn out_of_bounds_area_panics() {
        let fb = Framebuffer::new(16, 16, PixelDepth::Eight);
        let _ = fb.get_readonly_area(0, 0, 17, 5);
    }
}
