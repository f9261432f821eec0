use std::future::Future;

use bytes::Bytes;

use crate::error::Result;

/// Outbound half of a packet link.
///
/// `send_packet` resolves once the link has accepted the packet. It does not
/// wait for any reply from the device.
pub trait PacketSender: Send + 'static {
    fn send_packet(&mut self, packet: Bytes) -> impl Future<Output = Result<()>> + Send;
}

/// Inbound half of a packet link.
pub trait PacketReceiver: Send + 'static {
    /// Next packet, or `Ok(None)` once the link has closed.
    fn recv_packet(&mut self) -> impl Future<Output = Result<Option<Bytes>>> + Send;
}
