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

//! RFB (Remote Framebuffer) protocol constants and wire structures.
//!
//! This module provides the building blocks for RFB 3.3 communication:
//! the protocol version string, message type constants, the pixel format
//! and `ServerInit` structures, and the small server-to-client message
//! builders shared by the facade and the connection handler.
//!
//! # Protocol Overview
//!
//! An RFB 3.3 session proceeds through the following phases:
//! 1. **Protocol Version** - Server announces its version; client echoes it
//! 2. **Authentication** - Server announces the authentication scheme
//! 3. **Initialization** - Client declares shared access; server sends `ServerInit`
//! 4. **Normal Operation** - Ongoing message exchange for input events and screen updates
//!
//! All multi-byte integers on the wire are big-endian (network byte order),
//! which is the default for the `bytes` put/get accessors used throughout.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;

use crate::framebuffer::PixelDepth;

/// The RFB protocol version string exchanged during the handshake.
///
/// This server implements RFB protocol version 3.3. The version string must
/// be exactly 12 bytes including the newline character, and the client is
/// required to echo it back verbatim.
pub const PROTOCOL_VERSION: &str = "RFB 003.003\n";

/// Reason string sent with the scheme-0 rejection when a client answers the
/// version handshake with anything other than [`PROTOCOL_VERSION`].
pub const VERSION_MISMATCH_REASON: &str = "Unsupported version, only 3.3 is supported";

/// Desktop name announced in `ServerInit` unless the application overrides it.
pub const DEFAULT_DESKTOP_NAME: &str = "Test RFB Service";

// Client-to-Server Message Types

/// Message type: Client requests to change the pixel format.
///
/// Accepted and ignored; the server's pixel format is fixed at construction.
pub const CLIENT_MSG_SET_PIXEL_FORMAT: u8 = 0;

/// Message type: Client fixes colour map entries.
///
/// Accepted and ignored; this server is true-colour only.
pub const CLIENT_MSG_FIX_COLOUR_MAP_ENTRIES: u8 = 1;

/// Message type: Client specifies supported encodings.
///
/// Accepted and ignored; only RAW encoding is produced.
pub const CLIENT_MSG_SET_ENCODINGS: u8 = 2;

/// Message type: Client requests a framebuffer update for a region.
pub const CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;

/// Message type: Client sends a keyboard event.
pub const CLIENT_MSG_KEY_EVENT: u8 = 4;

/// Message type: Client sends a pointer (mouse) event.
pub const CLIENT_MSG_POINTER_EVENT: u8 = 5;

/// Message type: Client sends cut text (clipboard data).
pub const CLIENT_MSG_CLIENT_CUT_TEXT: u8 = 6;

// Server-to-Client Message Types

/// Message type: Server sends a framebuffer update.
pub const SERVER_MSG_FRAMEBUFFER_UPDATE: u8 = 0;

/// Message type: Server sends a bell (beep) notification.
///
/// The message is a single byte.
pub const SERVER_MSG_BELL: u8 = 2;

/// Message type: Server sends cut text (clipboard data).
pub const SERVER_MSG_SERVER_CUT_TEXT: u8 = 3;

// Authentication Schemes (RFB 3.3: announced by the server, not negotiated)

/// Authentication scheme: connection failed.
///
/// Followed on the wire by a `u32` reason length and the reason string.
pub const AUTH_SCHEME_FAILED: u32 = 0;

/// Authentication scheme: no authentication required.
///
/// The client proceeds directly to the initialization phase.
pub const AUTH_SCHEME_NONE: u32 = 1;

// Encoding Types

/// Encoding type: Raw pixel data.
///
/// Literal pixel bytes in row-major order. The only encoding this server
/// produces.
pub const ENCODING_RAW: i32 = 0;

/// Represents the pixel format of the RFB framebuffer.
///
/// This struct defines how pixel data is interpreted, including colour depth,
/// endianness, and RGB component details. On the wire it occupies 16 bytes,
/// the final three of which are padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    /// Number of bits per pixel.
    pub bits_per_pixel: u8,
    /// Depth of the pixel in bits.
    pub depth: u8,
    /// Flag indicating if the pixel data is big-endian (1) or little-endian (0).
    pub big_endian_flag: u8,
    /// Flag indicating if the pixel format is true-colour (1) or colormapped (0).
    pub true_colour_flag: u8,
    /// Maximum red colour value.
    pub red_max: u16,
    /// Maximum green colour value.
    pub green_max: u16,
    /// Maximum blue colour value.
    pub blue_max: u16,
    /// Number of shifts to apply to get the red colour component.
    pub red_shift: u8,
    /// Number of shifts to apply to get the green colour component.
    pub green_shift: u8,
    /// Number of shifts to apply to get the blue colour component.
    pub blue_shift: u8,
}

impl PixelFormat {
    /// Creates the server's true-colour pixel format for the given depth.
    ///
    /// Bits-per-pixel and depth both carry the configured bit depth; each
    /// colour channel maxes out at 255 with zero shifts.
    #[must_use]
    pub fn truecolour(depth: PixelDepth) -> Self {
        Self {
            bits_per_pixel: depth.bits(),
            depth: depth.bits(),
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 0,
            green_shift: 0,
            blue_shift: 0,
        }
    }

    /// Writes the pixel format into a `BytesMut` buffer in wire order.
    ///
    /// # Arguments
    ///
    /// * `buf` - A mutable reference to the `BytesMut` buffer to write into.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.bits_per_pixel);
        buf.put_u8(self.depth);
        buf.put_u8(self.big_endian_flag);
        buf.put_u8(self.true_colour_flag);
        buf.put_u16(self.red_max);
        buf.put_u16(self.green_max);
        buf.put_u16(self.blue_max);
        buf.put_u8(self.red_shift);
        buf.put_u8(self.green_shift);
        buf.put_u8(self.blue_shift);
        buf.put_bytes(0, 3); // padding
    }

    /// Reads and deserializes a `PixelFormat` from a `BytesMut` buffer.
    ///
    /// # Arguments
    ///
    /// * `buf` - A mutable reference to the `BytesMut` buffer to read from.
    ///
    /// # Errors
    ///
    /// Returns `Err(io::Error)` if there are not enough bytes in the buffer
    /// to read a complete `PixelFormat`.
    pub fn from_bytes(buf: &mut BytesMut) -> io::Result<Self> {
        if buf.len() < 16 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Not enough bytes for PixelFormat",
            ));
        }

        let pf = Self {
            bits_per_pixel: buf.get_u8(),
            depth: buf.get_u8(),
            big_endian_flag: buf.get_u8(),
            true_colour_flag: buf.get_u8(),
            red_max: buf.get_u16(),
            green_max: buf.get_u16(),
            blue_max: buf.get_u16(),
            red_shift: buf.get_u8(),
            green_shift: buf.get_u8(),
            blue_shift: buf.get_u8(),
        };
        buf.advance(3);
        Ok(pf)
    }
}

/// Represents the `ServerInit` message sent at the end of the handshake.
///
/// It provides the client with the framebuffer dimensions, the pixel format,
/// and the desktop name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInit {
    /// The width of the framebuffer in pixels.
    pub framebuffer_width: u16,
    /// The height of the framebuffer in pixels.
    pub framebuffer_height: u16,
    /// The pixel format used by the framebuffer.
    pub pixel_format: PixelFormat,
    /// The name of the desktop.
    pub name: String,
}

impl ServerInit {
    /// Serializes the `ServerInit` message into a byte buffer.
    ///
    /// The format follows the RFB protocol specification:
    /// - 2 bytes: framebuffer width
    /// - 2 bytes: framebuffer height
    /// - 16 bytes: pixel format
    /// - 4 bytes: name length
    /// - N bytes: name string (UTF-8)
    ///
    /// # Arguments
    ///
    /// * `buf` - The buffer to write the serialized message into.
    #[allow(clippy::cast_possible_truncation)] // Desktop name length limited to u32 per RFB protocol
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.framebuffer_width);
        buf.put_u16(self.framebuffer_height);
        self.pixel_format.write_to(buf);

        let name_bytes = self.name.as_bytes();
        buf.put_u32(name_bytes.len() as u32);
        buf.put_slice(name_bytes);
    }

    /// Reads and deserializes a `ServerInit` from a `BytesMut` buffer.
    ///
    /// # Arguments
    ///
    /// * `buf` - A mutable reference to the `BytesMut` buffer to read from.
    ///
    /// # Errors
    ///
    /// Returns `Err(io::Error)` if the buffer is truncated or the desktop
    /// name is not valid UTF-8.
    pub fn from_bytes(buf: &mut BytesMut) -> io::Result<Self> {
        if buf.len() < 24 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Not enough bytes for ServerInit",
            ));
        }

        let framebuffer_width = buf.get_u16();
        let framebuffer_height = buf.get_u16();
        let pixel_format = PixelFormat::from_bytes(buf)?;
        let name_len = buf.get_u32() as usize;
        if buf.len() < name_len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Not enough bytes for desktop name",
            ));
        }
        let name_bytes = buf.split_to(name_len);
        let name = String::from_utf8(name_bytes.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Desktop name is not UTF-8"))?;

        Ok(Self {
            framebuffer_width,
            framebuffer_height,
            pixel_format,
            name,
        })
    }
}

/// Represents a rectangle header in a framebuffer update message.
///
/// Each framebuffer update can contain multiple rectangles, each with its own
/// encoding type. The rectangle header specifies the position, dimensions,
/// and encoding of the pixel data that follows.
#[derive(Debug)]
pub struct Rectangle {
    /// X coordinate of the top-left corner.
    pub x: u16,
    /// Y coordinate of the top-left corner.
    pub y: u16,
    /// Width of the rectangle in pixels.
    pub width: u16,
    /// Height of the rectangle in pixels.
    pub height: u16,
    /// The encoding type used for this rectangle's pixel data.
    pub encoding: i32,
}

impl Rectangle {
    /// Writes the rectangle header to a byte buffer.
    ///
    /// The header format is:
    /// - 2 bytes: x position
    /// - 2 bytes: y position
    /// - 2 bytes: width
    /// - 2 bytes: height
    /// - 4 bytes: encoding type (signed 32-bit integer)
    ///
    /// # Arguments
    ///
    /// * `buf` - The buffer to write the header into.
    pub fn write_header(&self, buf: &mut BytesMut) {
        buf.put_u16(self.x);
        buf.put_u16(self.y);
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_i32(self.encoding);
    }
}

/// Builds the authentication announcement for a successful handshake:
/// scheme 1, no authentication.
pub(crate) fn encode_auth_none() -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(AUTH_SCHEME_NONE);
    buf.freeze()
}

/// Builds the scheme-0 rejection sent when the client's version echo does
/// not match: a zero scheme word followed by the length-prefixed reason.
#[allow(clippy::cast_possible_truncation)] // reason is a short constant string
pub(crate) fn encode_version_reject(reason: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + reason.len());
    buf.put_u32(AUTH_SCHEME_FAILED);
    buf.put_u32(reason.len() as u32);
    buf.put_slice(reason.as_bytes());
    buf.freeze()
}

/// Builds a `ServerCutText` message carrying the given clipboard text.
///
/// The `u32` length prefix is mandatory in RFB; it always precedes the text.
#[allow(clippy::cast_possible_truncation)] // length checked by the caller
pub(crate) fn encode_server_cut_text(text: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + text.len());
    buf.put_u8(SERVER_MSG_SERVER_CUT_TEXT);
    buf.put_bytes(0, 3); // padding
    buf.put_u32(text.len() as u32);
    buf.put_slice(text.as_bytes());
    buf.freeze()
}

/// Builds the single-byte `Bell` message.
pub(crate) fn encode_bell() -> Bytes {
    Bytes::from_static(&[SERVER_MSG_BELL])
}
