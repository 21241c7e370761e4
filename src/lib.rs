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


//! # rfbserver
//!
//! A pure Rust RFB 3.3 (Remote Framebuffer, the protocol behind VNC) server
//! library hosting a single in-memory framebuffer.
//!
//! The server accepts any number of concurrent clients, negotiates protocol
//! version 3.3 with no authentication, and streams RAW-encoded rectangular
//! updates of the shared framebuffer. Client input (keyboard, pointer,
//! clipboard) is forwarded to application callbacks, and the application can
//! push clipboard text and bell notifications to every connected client.
//!
//! ## Features
//!
//! - **RFB 3.3 handshake**: version exchange, scheme announcement, shared
//!   session flag, `ServerInit`
//! - **Shared framebuffer**: 8/16/32 bits per pixel, rectangular views with
//!   automatic dirty tracking, paintable from any thread
//! - **Fan-out broadcasting**: updates, clipboard and bell delivered to all
//!   clients in a single order; exclusive clients can take over the session
//! - **Async I/O**: built on Tokio, one lightweight task per connection
//!
//! ## Quick Start
//!
//! ```no_run
//! use rfbserver::{Colour, PixelDepth, RfbServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Create a server with a 640x480, 32-bpp framebuffer
//!     let server = RfbServer::new(640, 480, PixelDepth::ThirtyTwo);
//!
//!     server.on_key_event(|down, key| {
//!         println!("key {key:#x} {}", if down { "pressed" } else { "released" });
//!     });
//!
//!     // Start accepting clients
//!     server.listen(5900).await?;
//!
//!     // Paint a rectangle and announce it
//!     {
//!         let mut area = server.get_area(10, 10, 110, 60);
//!         for row in area.rows_mut() {
//!             for pixel in row.chunks_exact_mut(4) {
//!                 pixel.copy_from_slice(&Colour::rgb(0, 128, 255).bytes());
//!             }
//!         }
//!     }
//!     server.update();
//!
//!     // ... run until done, then shut down
//!     server.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! application thread(s)                 tokio runtime
//! ┌──────────────────┐     ┌─────────────────────────────────┐
//! │ paint get_area() │     │ accept loop ── task per client  │
//! │ update() / bell  │     │   handshake → dispatch loop     │
//! └────────┬─────────┘     └───────┬──────────────▲──────────┘
//!          │    framebuffer +      │  broadcast   │ input
//!          └──▶ pending rects ─────┴──▶ bus ──────┘ callbacks
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod events;
pub mod framebuffer;
pub mod protocol;
pub mod server;

// Internal modules
mod broadcast;
mod client;
mod encoding;

// Re-exports
pub use error::{Result, RfbError};
pub use events::ButtonMask;
pub use framebuffer::{Area, AreaMut, Colour, Framebuffer, PixelDepth, UpdateRect};
pub use protocol::PixelFormat;
pub use server::{IpVersion, RfbServer};

/// RFB protocol version implemented by this server.
pub const PROTOCOL_VERSION: &str = protocol::PROTOCOL_VERSION;

/// Default VNC port.
pub const DEFAULT_PORT: u16 = 5900;
