//! SysEx codec and BLE-MIDI framing for amplifier parameter traffic.
//!
//! Two layers live here:
//! - [`sysex`]: checksummed DT1 (write) and RQ1 (read request) messages
//!   addressed by 4-byte parameter addresses.
//! - [`packet`], [`reassembly`], [`midi`]: the BLE-MIDI envelope. Outbound
//!   messages are wrapped with header and timestamp bytes; inbound packets are
//!   scanned and SysEx bodies reassembled across packet boundaries.
//!
//! Nothing in this crate knows about requests and responses; it only turns
//! bytes into messages and back.

pub mod error;
pub mod midi;
pub mod packet;
pub mod reassembly;
pub mod sysex;

pub use error::{FrameError, Result};
pub use midi::{decode_control_changes, wrap_control_change, ControlChange};
pub use packet::{wrap_sysex, FramerConfig, DEFAULT_MAX_PACKET, PACKET_HEADER, TIMESTAMP};
pub use reassembly::SysexReassembler;
pub use sysex::{
    checksum, decode, encode_read, encode_write, Decoded, SysexMessage, CMD_READ, CMD_WRITE,
    HEADER, SYSEX_END, SYSEX_START,
};
