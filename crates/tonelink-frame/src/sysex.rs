use bytes::{BufMut, BytesMut};
use tonelink_registry::Address;

use crate::error::{FrameError, Result};

/// SysEx start byte.
pub const SYSEX_START: u8 = 0xF0;

/// SysEx end byte (EOX).
pub const SYSEX_END: u8 = 0xF7;

/// Message header: SysEx start, Roland ID, device ID, 4-byte model ID.
pub const HEADER: [u8; 7] = [SYSEX_START, 0x41, 0x10, 0x00, 0x00, 0x00, 0x33];

/// RQ1: request data.
pub const CMD_READ: u8 = 0x11;

/// DT1: data set (writes, and the amp's value notifications).
pub const CMD_WRITE: u8 = 0x12;

const COMMAND_OFFSET: usize = HEADER.len();
const ADDRESS_OFFSET: usize = COMMAND_OFFSET + 1;
const VALUE_OFFSET: usize = ADDRESS_OFFSET + 4;
const QUIRK_VALUE_OFFSET: usize = VALUE_OFFSET + 1;

/// Shortest buffer that can carry a DT1 value (checksum may be missing).
pub const MIN_MESSAGE_LEN: usize = VALUE_OFFSET + 1;

/// Size of a DT1 message with one value byte and a checksum.
pub const WRITE_MESSAGE_LEN: usize = MIN_MESSAGE_LEN + 1;

/// Size of an RQ1 message.
pub const READ_MESSAGE_LEN: usize = VALUE_OFFSET + 4 + 1;

/// Roland checksum over address and payload bytes.
///
/// `(128 - (sum mod 128)) mod 128`, so that the address, payload and checksum
/// together sum to a multiple of 128.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum: u32 = bytes.iter().map(|&b| u32::from(b)).sum();
    ((128 - sum % 128) % 128) as u8
}

/// A protocol message, independent of its wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysexMessage {
    /// DT1: a single value at an address.
    Data { address: Address, value: u8 },
    /// RQ1: request `length` bytes starting at an address.
    Request { address: Address, length: u32 },
}

impl SysexMessage {
    pub fn address(&self) -> Address {
        match self {
            SysexMessage::Data { address, .. } | SysexMessage::Request { address, .. } => *address,
        }
    }

    /// Encode into `dst`, without the trailing EOX byte.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        match *self {
            SysexMessage::Data { address, value } => encode_write(address, value, dst),
            SysexMessage::Request { address, length } => encode_read(address, length, dst),
        }
    }
}

/// A decoded message plus what its checksum byte said.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub message: SysexMessage,
    /// Checksum byte found on the wire, if the buffer carried one.
    pub checksum: Option<u8>,
    /// Checksum computed over the received address and payload bytes.
    pub expected_checksum: u8,
}

impl Decoded {
    pub fn checksum_ok(&self) -> bool {
        self.checksum == Some(self.expected_checksum)
    }
}

/// Encode a DT1 write.
///
/// Wire format:
/// ```text
/// ┌──────────────────────┬──────┬──────────────┬───────┬──────────┐
/// │ Header (7B)          │ 0x12 │ Address (4B) │ Value │ Checksum │
/// │ F0 41 10 00 00 00 33 │      │              │ (1B)  │ (1B)     │
/// └──────────────────────┴──────┴──────────────┴───────┴──────────┘
/// ```
pub fn encode_write(address: Address, value: u8, dst: &mut BytesMut) -> Result<()> {
    check_data(&address.bytes())?;
    check_data(&[value])?;

    let [a, b, c, d] = address.bytes();
    dst.reserve(WRITE_MESSAGE_LEN);
    dst.put_slice(&HEADER);
    dst.put_u8(CMD_WRITE);
    dst.put_slice(&address.bytes());
    dst.put_u8(value);
    dst.put_u8(checksum(&[a, b, c, d, value]));
    Ok(())
}

/// Encode an RQ1 read request for `length` bytes (big-endian, usually 1).
pub fn encode_read(address: Address, length: u32, dst: &mut BytesMut) -> Result<()> {
    let size = length.to_be_bytes();
    check_data(&address.bytes())?;
    check_data(&size)?;

    let mut summed = [0u8; 8];
    summed[..4].copy_from_slice(&address.bytes());
    summed[4..].copy_from_slice(&size);

    dst.reserve(READ_MESSAGE_LEN);
    dst.put_slice(&HEADER);
    dst.put_u8(CMD_READ);
    dst.put_slice(&summed);
    dst.put_u8(checksum(&summed));
    Ok(())
}

/// Decode a SysEx body (starting with `F0`, optional trailing `F7`).
///
/// Returns `None` for anything that is not a DT1/RQ1 message for this header:
/// short buffers, foreign headers, unknown commands. Never fails otherwise.
pub fn decode(src: &[u8]) -> Option<Decoded> {
    let src = match src.split_last() {
        Some((&SYSEX_END, body)) => body,
        _ => src,
    };

    if src.len() < MIN_MESSAGE_LEN || src[..HEADER.len()] != HEADER {
        return None;
    }
    if src[COMMAND_OFFSET + 1..].iter().any(|b| *b > 0x7F) {
        return None;
    }

    let address = Address::new(src[ADDRESS_OFFSET..VALUE_OFFSET].try_into().ok()?);

    match src[COMMAND_OFFSET] {
        CMD_WRITE => {
            // Some firmware inserts a zero byte before the value.
            let value_at = if src[VALUE_OFFSET] == 0x00 && src.len() > QUIRK_VALUE_OFFSET + 1 {
                QUIRK_VALUE_OFFSET
            } else {
                VALUE_OFFSET
            };
            Some(Decoded {
                message: SysexMessage::Data {
                    address,
                    value: src[value_at],
                },
                checksum: src.get(value_at + 1).copied(),
                expected_checksum: checksum(&src[ADDRESS_OFFSET..=value_at]),
            })
        }
        CMD_READ => {
            let size_end = VALUE_OFFSET + 4;
            let size: [u8; 4] = src.get(VALUE_OFFSET..size_end)?.try_into().ok()?;
            Some(Decoded {
                message: SysexMessage::Request {
                    address,
                    length: u32::from_be_bytes(size),
                },
                checksum: src.get(size_end).copied(),
                expected_checksum: checksum(&src[ADDRESS_OFFSET..size_end]),
            })
        }
        _ => None,
    }
}

fn check_data(bytes: &[u8]) -> Result<()> {
    match bytes.iter().find(|b| **b > 0x7F) {
        Some(&value) => Err(FrameError::DataOutOfRange { value }),
        None => Ok(()),
    }
}
