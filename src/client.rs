//! Per-connection RFB session handling.
//!
//! Each accepted socket gets one [`Connection`] running on its own task.
//! The session is the RFB 3.3 sequence:
//!
//! 1. **Version**: send `"RFB 003.003\n"` and require the exact echo;
//!    anything else gets a scheme-0 rejection with a reason string.
//! 2. **Authentication announcement**: scheme 1, no authentication.
//! 3. **Client init**: one shared-access byte; zero means every other
//!    session is asked to close.
//! 4. **Dispatch**: send `ServerInit`, then loop over incoming client
//!    messages and bus traffic until either side closes.
//!
//! The handshake used to be a chain of "next data" continuations in older
//! designs; written as a straight-line async fn, the await points are the
//! state boundaries. Incoming bytes are parsed incrementally from a
//! `BytesMut`: a message that has not fully arrived stays buffered until
//! the next read, and a connection that closes mid-message is dropped.

use bytes::{Buf, BytesMut};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::broadcast::{BroadcastBus, BusMessage};
use crate::error::{Result, RfbError};
use crate::events::{ButtonMask, EventHandlers};
use crate::framebuffer::Framebuffer;
use crate::protocol::*;

/// Upper bound on client cut-text payloads, to bound memory on hostile
/// length prefixes.
const MAX_CUT_TEXT: usize = 10 * 1024 * 1024;

/// State for a single client session.
pub(crate) struct Connection {
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    framebuffer: Arc<Framebuffer>,
    handlers: Arc<EventHandlers>,
    bus: BroadcastBus,
    rx: broadcast::Receiver<BusMessage>,
    desktop_name: String,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        stream: TcpStream,
        peer: SocketAddr,
        framebuffer: Arc<Framebuffer>,
        handlers: Arc<EventHandlers>,
        bus: BroadcastBus,
        rx: broadcast::Receiver<BusMessage>,
        desktop_name: String,
    ) -> Self {
        Self {
            id,
            stream,
            peer,
            framebuffer,
            handlers,
            bus,
            rx,
            desktop_name,
        }
    }

    /// Runs the session to completion: handshake, then the dispatch loop.
    pub(crate) async fn run(mut self) -> Result<()> {
        // Immediate delivery for small protocol messages
        self.stream.set_nodelay(true)?;
        self.handshake().await?;
        self.dispatch().await
    }

    async fn handshake(&mut self) -> Result<()> {
        self.stream.write_all(PROTOCOL_VERSION.as_bytes()).await?;

        let mut version = [0u8; 12];
        self.stream.read_exact(&mut version).await?;
        if &version[..] != PROTOCOL_VERSION.as_bytes() {
            self.stream
                .write_all(&encode_version_reject(VERSION_MISMATCH_REASON))
                .await?;
            return Err(RfbError::Protocol(format!(
                "client {} sent unsupported version {:?}",
                self.id,
                String::from_utf8_lossy(&version).trim_end()
            )));
        }

        self.stream.write_all(&encode_auth_none()).await?;

        let mut shared = [0u8; 1];
        self.stream.read_exact(&mut shared).await?;
        if shared[0] == 0 {
            info!(
                "client {} ({}) requested exclusive access, closing other sessions",
                self.id, self.peer
            );
            self.bus.close_all_except(self.id);
        }

        let server_init = ServerInit {
            framebuffer_width: self.framebuffer.width(),
            framebuffer_height: self.framebuffer.height(),
            pixel_format: PixelFormat::truecolour(self.framebuffer.depth()),
            name: self.desktop_name.clone(),
        };
        let mut init_buf = BytesMut::new();
        server_init.write_to(&mut init_buf);
        self.stream.write_all(&init_buf).await?;

        info!("client {} ({}) handshake completed", self.id, self.peer);
        Ok(())
    }

    /// The message loop: client bytes on one arm, bus traffic on the other.
    async fn dispatch(&mut self) -> Result<()> {
        let mut buf = BytesMut::with_capacity(4096);

        loop {
            tokio::select! {
                read = self.stream.read_buf(&mut buf) => {
                    if read? == 0 {
                        if !buf.is_empty() {
                            return Err(RfbError::Protocol(format!(
                                "client {} closed mid-message ({} bytes pending)",
                                self.id,
                                buf.len()
                            )));
                        }
                        debug!("client {} disconnected", self.id);
                        return Ok(());
                    }
                    self.drain_messages(&mut buf)?;
                }

                msg = self.rx.recv() => match msg {
                    Ok(BusMessage::Send(buffer)) => {
                        self.stream.write_all(&buffer).await?;
                    }
                    Ok(BusMessage::CloseAllExcept(keep)) => {
                        if keep != self.id {
                            info!("client {} closed by exclusive-session takeover", self.id);
                            return Ok(());
                        }
                    }
                    Ok(BusMessage::Shutdown) => {
                        debug!("client {} closed by server shutdown", self.id);
                        return Ok(());
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("client {} lagging, {} broadcasts dropped", self.id, missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Parses every complete client message currently buffered.
    ///
    /// Returns with the remainder still buffered when a message has only
    /// partially arrived; errors close the connection.
    fn drain_messages(&mut self, buf: &mut BytesMut) -> Result<()> {
        loop {
            let Some(&msg_type) = buf.first() else {
                return Ok(());
            };

            match msg_type {
                CLIENT_MSG_SET_PIXEL_FORMAT => {
                    if buf.len() < 20 {
                        return Ok(()); // need more data
                    }
                    buf.advance(4); // message type + padding
                    let format = PixelFormat::from_bytes(buf)?;
                    debug!(
                        "client {} requested {}bpp pixel format (ignored, server format is fixed)",
                        self.id, format.bits_per_pixel
                    );
                }
                CLIENT_MSG_FIX_COLOUR_MAP_ENTRIES => {
                    if buf.len() < 6 {
                        return Ok(());
                    }
                    let colours = usize::from(u16::from_be_bytes([buf[4], buf[5]]));
                    let length = 6 + colours * 6;
                    if buf.len() < length {
                        return Ok(());
                    }
                    buf.advance(length);
                    debug!("client {} sent colour map entries (ignored)", self.id);
                }
                CLIENT_MSG_SET_ENCODINGS => {
                    if buf.len() < 4 {
                        return Ok(());
                    }
                    let count = usize::from(u16::from_be_bytes([buf[2], buf[3]]));
                    if buf.len() < 4 + count * 4 {
                        return Ok(());
                    }
                    buf.advance(4);
                    let mut encodings = Vec::with_capacity(count);
                    for _ in 0..count {
                        encodings.push(buf.get_i32());
                    }
                    debug!(
                        "client {} offered encodings {:?} (only RAW is produced)",
                        self.id, encodings
                    );
                }
                CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST => {
                    if buf.len() < 10 {
                        return Ok(());
                    }
                    buf.advance(1);
                    let _incremental = buf.get_u8();
                    let x = buf.get_u16();
                    let y = buf.get_u16();
                    let width = buf.get_u16();
                    let height = buf.get_u16();
                    debug!(
                        "client {} update request ({x},{y} {width}x{height})",
                        self.id
                    );
                    self.framebuffer.add_update_request(x, y, width, height);
                    self.bus.send_buffer(self.framebuffer.take_update_message());
                }
                CLIENT_MSG_KEY_EVENT => {
                    if buf.len() < 8 {
                        return Ok(());
                    }
                    buf.advance(1);
                    let down = buf.get_u8() != 0;
                    buf.advance(2); // padding
                    let key = buf.get_u32();
                    self.handlers.emit_key_event(down, key);
                }
                CLIENT_MSG_POINTER_EVENT => {
                    if buf.len() < 6 {
                        return Ok(());
                    }
                    buf.advance(1);
                    let button_mask = buf.get_u8();
                    let x = buf.get_u16();
                    let y = buf.get_u16();
                    self.handlers
                        .emit_pointer_event(ButtonMask::new(button_mask), x, y);
                }
                CLIENT_MSG_CLIENT_CUT_TEXT => {
                    if buf.len() < 8 {
                        return Ok(());
                    }
                    let length =
                        u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
                    if length > MAX_CUT_TEXT {
                        return Err(RfbError::Protocol(format!(
                            "client {} cut text too large: {length} bytes",
                            self.id
                        )));
                    }
                    if buf.len() < 8 + length {
                        return Ok(());
                    }
                    buf.advance(8); // message type + padding + length
                    let text_bytes = buf.split_to(length);
                    match std::str::from_utf8(&text_bytes) {
                        Ok(text) => self.handlers.emit_clipboard_text(text),
                        Err(_) => {
                            debug!("client {} sent non-UTF-8 cut text, dropped", self.id);
                        }
                    }
                }
                other => {
                    return Err(RfbError::Protocol(format!(
                        "client {} sent unknown message type {other}",
                        self.id
                    )));
                }
            }
        }
    }
}
