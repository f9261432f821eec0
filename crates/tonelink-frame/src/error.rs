use std::time::Duration;

/// Errors that can occur during SysEx encoding and packet framing.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A payload byte does not fit in a 7-bit MIDI data byte.
    #[error("data byte out of range (0x{value:02X} > 0x7F)")]
    DataOutOfRange { value: u8 },

    /// The bytes handed to the framer are not a SysEx body.
    #[error("invalid sysex body: {0}")]
    InvalidSysex(&'static str),

    /// The configured packet size cannot hold a BLE-MIDI envelope.
    #[error("packet size too small ({size} bytes, min {min})")]
    PacketTooSmall { size: usize, min: usize },

    /// A control-change field is out of range.
    #[error("invalid control change: {0}")]
    InvalidControlChange(&'static str),

    /// A partially received SysEx message was abandoned.
    #[error("sysex reassembly timed out after {elapsed:?} ({buffered} bytes discarded)")]
    ReassemblyTimeout { elapsed: Duration, buffered: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
