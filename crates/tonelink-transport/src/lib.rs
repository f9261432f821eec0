//! Packet links to BLE-MIDI devices.
//!
//! The platform's Bluetooth stack owns pairing and device selection. What
//! reaches tonelink is a stream of BLE-MIDI packets in each direction, exposed
//! through [`PacketSender`] and [`PacketReceiver`].
//!
//! Two links are provided:
//! - [`memory`]: in-process channels, for tests and simulation.
//! - [`bridge`]: a Unix stream socket to a BLE gateway process, carrying
//!   length-prefixed packets (Unix only).

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(unix)]
pub mod bridge;
#[cfg(unix)]
pub mod codec;

pub use error::{Result, TransportError};
pub use traits::{PacketReceiver, PacketSender};

#[cfg(unix)]
pub use bridge::{connect, BridgeListener, BridgeReceiver, BridgeSender};
#[cfg(unix)]
pub use codec::{PacketCodec, MAX_PACKET_SIZE};
