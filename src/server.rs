//! The public RFB server facade.
//!
//! [`RfbServer`] owns the framebuffer, the broadcast bus and the callback
//! registry. `listen` binds a TCP listener and spawns the accept loop;
//! every accepted socket gets its own connection task. All server-originated
//! traffic (framebuffer updates, clipboard, bell) goes through the bus so
//! that every connected client observes the same message order.
//!
//! The framebuffer can be painted from any thread; the facade's
//! non-async methods (`get_area`, `update`, `send_bell`, ...) are safe to
//! call from a dedicated rendering thread while the runtime serves clients.

use log::{debug, error, info, warn};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broadcast::BroadcastBus;
use crate::client::Connection;
use crate::error::{Result, RfbError};
use crate::events::{ButtonMask, EventHandlers};
use crate::framebuffer::{Area, AreaMut, Framebuffer, PixelDepth};
use crate::protocol::{encode_bell, encode_server_cut_text, DEFAULT_DESKTOP_NAME};

/// IP version selection for [`RfbServer::listen_on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    /// Bind an IPv4 wildcard socket.
    V4,
    /// Bind an IPv6 wildcard socket.
    V6,
}

/// An RFB 3.3 server hosting a single in-memory framebuffer.
///
/// Construction fixes the framebuffer geometry and pixel depth for the
/// lifetime of the server. Clients negotiate no authentication and receive
/// RAW-encoded updates of whatever rectangles the application (or their own
/// update requests) have dirtied.
pub struct RfbServer {
    framebuffer: Arc<Framebuffer>,
    handlers: Arc<EventHandlers>,
    bus: BroadcastBus,
    desktop_name: Arc<Mutex<String>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl RfbServer {
    /// Creates a server with a zero-filled `width × height` framebuffer of
    /// the given pixel depth.
    ///
    /// # Panics
    ///
    /// Panics if `width` or `height` is zero.
    #[must_use]
    pub fn new(width: u16, height: u16, depth: PixelDepth) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            framebuffer: Arc::new(Framebuffer::new(width, height, depth)),
            handlers: Arc::new(EventHandlers::new()),
            bus: BroadcastBus::new(),
            desktop_name: Arc::new(Mutex::new(DEFAULT_DESKTOP_NAME.to_string())),
            accept_task: Mutex::new(None),
            shutdown,
        }
    }

    /// Width of the framebuffer in pixels.
    #[must_use]
    pub fn width(&self) -> u16 {
        self.framebuffer.width()
    }

    /// Height of the framebuffer in pixels.
    #[must_use]
    pub fn height(&self) -> u16 {
        self.framebuffer.height()
    }

    /// Largest valid x coordinate (`width - 1`).
    #[must_use]
    pub fn max_x(&self) -> u16 {
        self.width() - 1
    }

    /// Largest valid y coordinate (`height - 1`).
    #[must_use]
    pub fn max_y(&self) -> u16 {
        self.height() - 1
    }

    /// The configured pixel depth.
    #[must_use]
    pub fn depth(&self) -> PixelDepth {
        self.framebuffer.depth()
    }

    /// Sets the desktop name announced to clients in `ServerInit`.
    ///
    /// Affects connections accepted after the call; defaults to
    /// `"Test RFB Service"`.
    pub fn set_desktop_name(&self, name: impl Into<String>) {
        *lock(&self.desktop_name) = name.into();
    }

    /// Starts accepting connections on the given IPv4 port.
    ///
    /// Binds the listener, spawns the accept loop and returns the bound
    /// address (useful with port 0). The server keeps serving until
    /// [`RfbServer::close`] is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind fails or the server is already
    /// listening.
    pub async fn listen(&self, port: u16) -> Result<SocketAddr> {
        self.listen_on(port, IpVersion::V4).await
    }

    /// Starts accepting connections on the given port and IP version.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind fails or the server is already
    /// listening.
    pub async fn listen_on(&self, port: u16, ip: IpVersion) -> Result<SocketAddr> {
        let bind_addr: SocketAddr = match ip {
            IpVersion::V4 => (Ipv4Addr::UNSPECIFIED, port).into(),
            IpVersion::V6 => (Ipv6Addr::UNSPECIFIED, port).into(),
        };
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;

        {
            let mut slot = lock(&self.accept_task);
            if slot.is_some() {
                return Err(RfbError::InvalidOperation(
                    "server is already listening".to_string(),
                ));
            }
            *slot = Some(tokio::spawn(accept_loop(
                listener,
                self.framebuffer.clone(),
                self.handlers.clone(),
                self.bus.clone(),
                self.desktop_name.clone(),
                self.shutdown.subscribe(),
            )));
        }

        info!("RFB server listening on {local_addr}");
        Ok(local_addr)
    }

    /// Stops accepting connections and closes every client session.
    ///
    /// Signals the accept loop, broadcasts a shutdown to all connection
    /// tasks and waits for the accept loop to finish. Safe to call when the
    /// server never listened.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        self.bus.shutdown();
        let task = lock(&self.accept_task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("RFB server closed");
    }

    /// Returns a mutable view of the rectangle spanning columns `[x1, x2)`
    /// and rows `[y1, y2)`, queueing it for the next update.
    ///
    /// See [`Framebuffer::get_area`] for the locking contract and
    /// preconditions: drop the view before calling [`RfbServer::update`].
    #[must_use]
    pub fn get_area(&self, x1: u16, y1: u16, x2: u16, y2: u16) -> AreaMut<'_> {
        self.framebuffer.get_area(x1, y1, x2, y2)
    }

    /// Returns a read-only view of the rectangle spanning columns
    /// `[x1, x2)` and rows `[y1, y2)` without queueing anything.
    #[must_use]
    pub fn get_readonly_area(&self, x1: u16, y1: u16, x2: u16, y2: u16) -> Area<'_> {
        self.framebuffer.get_readonly_area(x1, y1, x2, y2)
    }

    /// Broadcasts a `FrameBufferUpdate` covering every pending rectangle.
    ///
    /// Drains the pending-update set even when no client is connected; with
    /// an empty set a valid zero-rectangle update is broadcast.
    pub fn update(&self) {
        self.bus.send_buffer(self.framebuffer.take_update_message());
    }

    /// Broadcasts a `ServerCutText` message carrying `text` to all clients.
    ///
    /// # Panics
    ///
    /// Panics if `text` is longer than `u32::MAX` bytes; the RFB length
    /// prefix cannot represent it.
    pub fn send_clipboard_text(&self, text: &str) {
        assert!(
            text.len() <= u32::MAX as usize,
            "clipboard text exceeds the u32 wire length"
        );
        self.bus.send_buffer(encode_server_cut_text(text));
    }

    /// Broadcasts a `Bell` message to all clients.
    pub fn send_bell(&self) {
        self.bus.send_buffer(encode_bell());
    }

    /// Registers the callback invoked for client key events with
    /// `(down, keysym)`. Replaces any previously registered callback.
    pub fn on_key_event<F>(&self, callback: F)
    where
        F: Fn(bool, u32) + Send + Sync + 'static,
    {
        self.handlers.set_key(Box::new(callback));
    }

    /// Registers the callback invoked for client pointer events with
    /// `(buttons, x, y)`. Replaces any previously registered callback.
    pub fn on_pointer_event<F>(&self, callback: F)
    where
        F: Fn(ButtonMask, u16, u16) + Send + Sync + 'static,
    {
        self.handlers.set_pointer(Box::new(callback));
    }

    /// Registers the callback invoked when a client transfers clipboard
    /// text. Replaces any previously registered callback.
    pub fn on_client_clipboard_text<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.handlers.set_clipboard(Box::new(callback));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Accepts sockets until shutdown, spawning one connection task each.
async fn accept_loop(
    listener: TcpListener,
    framebuffer: Arc<Framebuffer>,
    handlers: Arc<EventHandlers>,
    bus: BroadcastBus,
    desktop_name: Arc<Mutex<String>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let (id, rx) = bus.register();
                    info!("connection from {peer} as client {id}");
                    let connection = Connection::new(
                        id,
                        stream,
                        peer,
                        framebuffer.clone(),
                        handlers.clone(),
                        bus.clone(),
                        rx,
                        lock(&desktop_name).clone(),
                    );
                    tokio::spawn(async move {
                        if let Err(e) = connection.run().await {
                            warn!("client {id} terminated: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("accept failed: {e}");
                }
            },
        }
    }
    debug!("accept loop stopped");
}
