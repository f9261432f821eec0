use tonelink_registry::Address;

use crate::events::Link;

/// Errors surfaced by control operations.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The operation needs a link that does not exist.
    #[error("{0} link not connected")]
    NotConnected(Link),

    /// Sending on the link failed. Transient; the operation did not happen.
    #[error("transport send failed: {0}")]
    Transport(#[from] tonelink_transport::TransportError),

    /// A message could not be encoded.
    #[error("frame error: {0}")]
    Frame(#[from] tonelink_frame::FrameError),

    /// Unknown key, out-of-range value or similar registry rejection.
    #[error("registry error: {0}")]
    Registry(#[from] tonelink_registry::RegistryError),

    /// The parameter exists only in software.
    #[error("parameter '{0}' is virtual and has no hardware address")]
    VirtualParameter(String),

    /// An inbound value carried an address no parameter owns.
    #[error("no parameter owns address {0}")]
    UnknownAddress(Address),

    /// A pedal or controller value outside 0..=127.
    #[error("sample {0} out of range (0..=127)")]
    OutOfRangeSample(u8),

    /// Footswitch and expression codes are unusable.
    #[error("invalid pedal configuration: {0}")]
    InvalidPedalConfig(String),
}

pub type Result<T> = std::result::Result<T, ControlError>;
