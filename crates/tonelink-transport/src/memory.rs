//! In-process packet links backed by tokio channels.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};
use crate::traits::{PacketReceiver, PacketSender};

/// Default number of packets buffered per direction.
pub const DEFAULT_CAPACITY: usize = 64;

/// Sending end of an in-memory link.
#[derive(Debug, Clone)]
pub struct MemorySender {
    tx: mpsc::Sender<Bytes>,
}

/// Receiving end of an in-memory link.
#[derive(Debug)]
pub struct MemoryReceiver {
    rx: mpsc::Receiver<Bytes>,
}

/// Create a one-directional link.
pub fn channel(capacity: usize) -> (MemorySender, MemoryReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (MemorySender { tx }, MemoryReceiver { rx })
}

/// Both halves of one endpoint of a duplex link.
pub type Endpoint = (MemorySender, MemoryReceiver);

/// Create a duplex link: what one endpoint sends, the other receives.
pub fn duplex(capacity: usize) -> (Endpoint, Endpoint) {
    let (a_tx, b_rx) = channel(capacity);
    let (b_tx, a_rx) = channel(capacity);
    ((a_tx, a_rx), (b_tx, b_rx))
}

impl PacketSender for MemorySender {
    async fn send_packet(&mut self, packet: Bytes) -> Result<()> {
        self.tx
            .send(packet)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

impl PacketReceiver for MemoryReceiver {
    async fn recv_packet(&mut self) -> Result<Option<Bytes>> {
        Ok(self.rx.recv().await)
    }
}

impl MemoryReceiver {
    /// Take a packet if one is already queued.
    pub fn try_recv_packet(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}
