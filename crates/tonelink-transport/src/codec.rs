use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TransportError;

/// Record header: 2-byte little-endian packet length.
pub const RECORD_HEADER_SIZE: usize = 2;

/// Largest BLE-MIDI packet carried over the bridge.
pub const MAX_PACKET_SIZE: usize = 512;

/// Length-prefixed packet records on a bridge socket.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────────────┐
/// │ Length (2B)  │ BLE-MIDI packet      │
/// │ LE           │ (Length bytes)       │
/// └──────────────┴──────────────────────┘
/// ```
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_packet_size: usize,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self::with_max_packet_size(MAX_PACKET_SIZE)
    }

    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            max_packet_size: max_packet_size.min(usize::from(u16::MAX)),
        }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Bytes;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, TransportError> {
        if src.len() < RECORD_HEADER_SIZE {
            return Ok(None);
        }

        let len = usize::from(u16::from_le_bytes([src[0], src[1]]));
        if len > self.max_packet_size {
            return Err(TransportError::PacketTooLarge {
                size: len,
                max: self.max_packet_size,
            });
        }

        if src.len() < RECORD_HEADER_SIZE + len {
            src.reserve(RECORD_HEADER_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(RECORD_HEADER_SIZE);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for PacketCodec {
    type Error = TransportError;

    fn encode(&mut self, packet: Bytes, dst: &mut BytesMut) -> Result<(), TransportError> {
        if packet.len() > self.max_packet_size {
            return Err(TransportError::PacketTooLarge {
                size: packet.len(),
                max: self.max_packet_size,
            });
        }
        dst.reserve(RECORD_HEADER_SIZE + packet.len());
        dst.put_u16_le(packet.len() as u16);
        dst.put_slice(&packet);
        Ok(())
    }
}
