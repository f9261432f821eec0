//! Channel-voice decoding for the pedal link.
//!
//! Pedal controllers send ordinary control-change messages inside BLE-MIDI
//! packets: a header byte, then `timestamp, status, data..` groups. Running
//! status lets further data pairs follow without repeating the status byte.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::packet::PACKET_HEADER;
use crate::sysex::{SYSEX_END, SYSEX_START};

const STATUS_CONTROL_CHANGE: u8 = 0xB0;

/// A decoded control-change message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlChange {
    /// MIDI channel, 0-15.
    pub channel: u8,
    /// Controller number, 0-127.
    pub controller: u8,
    /// Controller value, 0-127.
    pub value: u8,
}

/// Number of data bytes following a channel-voice status byte.
fn data_len(status: u8) -> usize {
    match status & 0xF0 {
        0xC0 | 0xD0 => 1,
        _ => 2,
    }
}

/// Extract control-change messages from one BLE-MIDI packet.
///
/// Other channel messages are skipped, as is any SysEx content.
pub fn decode_control_changes(packet: &[u8]) -> Vec<ControlChange> {
    let mut out = Vec::new();
    let Some((&header, body)) = packet.split_first() else {
        return out;
    };
    if header & 0x80 == 0 {
        return out;
    }

    let mut running: Option<u8> = None;
    let mut in_sysex = false;
    let mut i = 0usize;

    while i < body.len() {
        let byte = body[i];

        if byte & 0x80 != 0 {
            // Timestamp byte, optionally followed by a status byte.
            i += 1;
            if let Some(&status) = body.get(i).filter(|b| **b & 0x80 != 0) {
                i += 1;
                match status {
                    SYSEX_START => {
                        in_sysex = true;
                        running = None;
                    }
                    SYSEX_END => in_sysex = false,
                    0xF8..=0xFF => {}
                    0xF1..=0xF6 => running = None,
                    s => running = Some(s),
                }
            }
            continue;
        }

        if in_sysex {
            i += 1;
            continue;
        }

        let Some(status) = running else {
            i += 1;
            continue;
        };
        let need = data_len(status);
        let Some(data) = body.get(i..i + need) else {
            break;
        };
        if data.iter().any(|b| *b & 0x80 != 0) {
            i += 1;
            continue;
        }
        if status & 0xF0 == STATUS_CONTROL_CHANGE {
            out.push(ControlChange {
                channel: status & 0x0F,
                controller: data[0],
                value: data[1],
            });
        }
        i += need;
    }

    out
}

/// Build a single-message BLE-MIDI packet carrying a control change.
pub fn wrap_control_change(cc: ControlChange, timestamp: u8) -> Result<Bytes> {
    if cc.channel > 0x0F {
        return Err(FrameError::InvalidControlChange("channel above 15"));
    }
    if cc.controller > 0x7F || cc.value > 0x7F {
        return Err(FrameError::InvalidControlChange("data byte above 127"));
    }

    let mut packet = BytesMut::with_capacity(5);
    packet.put_u8(PACKET_HEADER);
    packet.put_u8(timestamp | 0x80);
    packet.put_u8(STATUS_CONTROL_CHANGE | cc.channel);
    packet.put_u8(cc.controller);
    packet.put_u8(cc.value);
    Ok(packet.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::TIMESTAMP;

    fn cc(controller: u8, value: u8) -> ControlChange {
        ControlChange {
            channel: 0,
            controller,
            value,
        }
    }

    #[test]
    fn single_control_change() {
        let packet = wrap_control_change(cc(127, 64), TIMESTAMP).unwrap();
        assert_eq!(packet.as_ref(), &[0x90, 0x80, 0xB0, 127, 64]);
        assert_eq!(decode_control_changes(&packet), vec![cc(127, 64)]);
    }

    #[test]
    fn running_status_with_and_without_timestamps() {
        let packet = [0x90, 0x80, 0xB2, 127, 10, 0x81, 127, 20, 127, 30];
        let decoded = decode_control_changes(&packet);
        assert_eq!(decoded.len(), 3);
        assert!(decoded.iter().all(|m| m.channel == 2 && m.controller == 127));
        assert_eq!(
            decoded.iter().map(|m| m.value).collect::<Vec<_>>(),
            vec![10, 20, 30]
        );
    }

    #[test]
    fn skips_other_channel_messages() {
        // Note on, program change, then a control change.
        let packet = [0x90, 0x80, 0x90, 60, 100, 0x80, 0xC0, 5, 0x80, 0xB0, 80, 127];
        assert_eq!(decode_control_changes(&packet), vec![cc(80, 127)]);
    }

    #[test]
    fn skips_sysex_content() {
        let packet = [0x90, 0x80, 0xF0, 0x41, 0x10, 0x80, 0xF7, 0x80, 0xB0, 81, 0];
        assert_eq!(decode_control_changes(&packet), vec![cc(81, 0)]);
    }

    #[test]
    fn truncated_message_is_dropped() {
        assert!(decode_control_changes(&[0x90, 0x80, 0xB0, 127]).is_empty());
        assert!(decode_control_changes(&[]).is_empty());
        assert!(decode_control_changes(&[0x10, 0x80, 0xB0, 1, 2]).is_empty());
    }

    #[test]
    fn wrap_rejects_out_of_range_fields() {
        assert!(wrap_control_change(
            ControlChange {
                channel: 16,
                controller: 1,
                value: 1
            },
            TIMESTAMP
        )
        .is_err());
        assert!(wrap_control_change(cc(1, 128), TIMESTAMP).is_err());
    }
}
