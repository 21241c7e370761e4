//! Fan-out of server-originated messages to every connected client.
//!
//! The bus is a single typed broadcast channel owned by the server. Each
//! connection registers on accept, receiving a unique connection id and a
//! channel receiver; deregistration is simply dropping the receiver when the
//! connection task ends, so a closed socket can never be written to again.
//!
//! All sends go through one channel, so every client observes server
//! buffers in the same order. Delivery is best-effort: there is no
//! backpressure, and a receiver that falls behind logs a warning and skips
//! the messages it lost.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// In-flight messages buffered per receiver before lagging sets in.
const BUS_CAPACITY: usize = 64;

/// A message fanned out to every connection task.
#[derive(Debug, Clone)]
pub(crate) enum BusMessage {
    /// Write this buffer to the client socket.
    Send(Bytes),
    /// Close every connection except the one with this id.
    CloseAllExcept(u64),
    /// Close every connection; the server is shutting down.
    Shutdown,
}

/// The server's broadcast bus plus the connection-id allocator.
#[derive(Clone)]
pub(crate) struct BroadcastBus {
    tx: broadcast::Sender<BusMessage>,
    next_id: Arc<AtomicU64>,
}

impl BroadcastBus {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Registers a connection: allocates its id and subscribes it to the bus.
    pub(crate) fn register(&self) -> (u64, broadcast::Receiver<BusMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        (id, self.tx.subscribe())
    }

    /// Fans a server-originated buffer out to every connected client.
    pub(crate) fn send_buffer(&self, buffer: Bytes) {
        // Err means no connected clients; nothing to deliver.
        let _ = self.tx.send(BusMessage::Send(buffer));
    }

    /// Asks every connection except `keep` to close.
    pub(crate) fn close_all_except(&self, keep: u64) {
        let _ = self.tx.send(BusMessage::CloseAllExcept(keep));
    }

    /// Asks every connection to close.
    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(BusMessage::Shutdown);
    }
}
