use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::sysex::{SYSEX_END, SYSEX_START};

/// BLE-MIDI packet header byte.
pub const PACKET_HEADER: u8 = 0x90;

/// Fixed timestamp byte. The link does not need monotonic timestamps.
pub const TIMESTAMP: u8 = 0x80;

/// Default maximum packet size in bytes.
pub const DEFAULT_MAX_PACKET: usize = 512;

/// Smallest packet that can carry header, timestamp and EOX plus one data byte.
const MIN_PACKET: usize = 4;

/// Configuration for BLE-MIDI framing.
#[derive(Debug, Clone)]
pub struct FramerConfig {
    /// Largest packet handed to the link (the negotiated MTU payload). Default: 512.
    pub max_packet_size: usize,
    /// Idle time after which a partial SysEx body is discarded. Default: 1s.
    pub reassembly_timeout: Duration,
    /// Timestamp byte written into outbound packets.
    pub timestamp: u8,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET,
            reassembly_timeout: Duration::from_secs(1),
            timestamp: TIMESTAMP,
        }
    }
}

/// Wrap a SysEx body (as produced by the codec, starting with `F0`) into
/// BLE-MIDI packets.
///
/// Wire format of a message that fits one packet:
/// ```text
/// ┌────────┬────┬─────────────────────────┬────┬──────┐
/// │ Header │ TS │ F0 .. body .. checksum  │ TS │ F7   │
/// │ 0x90   │    │                         │    │      │
/// └────────┴────┴─────────────────────────┴────┴──────┘
/// ```
/// Longer bodies continue in packets that carry only the header byte; the
/// closing `TS F7` pair is never split.
pub fn wrap_sysex(body: &[u8], config: &FramerConfig) -> Result<Vec<Bytes>> {
    if config.max_packet_size < MIN_PACKET {
        return Err(FrameError::PacketTooSmall {
            size: config.max_packet_size,
            min: MIN_PACKET,
        });
    }
    if config.timestamp < 0x80 {
        return Err(FrameError::InvalidSysex("timestamp byte must have bit 7 set"));
    }
    match body.split_first() {
        Some((&SYSEX_START, rest)) if rest.iter().all(|b| *b < 0x80) => {}
        Some((&SYSEX_START, _)) => return Err(FrameError::InvalidSysex("status byte inside body")),
        _ => return Err(FrameError::InvalidSysex("body must start with 0xF0")),
    }

    let max = config.max_packet_size;
    let mut packets = Vec::new();
    let mut pos = 0usize;
    let mut first = true;

    loop {
        let mut packet = BytesMut::with_capacity(max);
        packet.put_u8(PACKET_HEADER);
        if first {
            packet.put_u8(config.timestamp);
            first = false;
        }

        let room = max - packet.len();
        let remaining = body.len() - pos;
        if remaining + 2 <= room {
            packet.put_slice(&body[pos..]);
            packet.put_u8(config.timestamp);
            packet.put_u8(SYSEX_END);
            packets.push(packet.freeze());
            return Ok(packets);
        }

        let take = remaining.min(room);
        packet.put_slice(&body[pos..pos + take]);
        pos += take;
        packets.push(packet.freeze());
    }
}
