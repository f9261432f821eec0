use std::fmt;
use std::io;

use tonelink_control::ControlError;
use tonelink_frame::FrameError;
use tonelink_registry::RegistryError;
use tonelink_transport::TransportError;

use tonelink::sim::SimError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::DataOutOfRange { .. } | FrameError::InvalidSysex(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn registry_error(context: &str, err: RegistryError) -> CliError {
    match err {
        RegistryError::UnknownParameter(_) | RegistryError::OutOfRange { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        RegistryError::LoadFailed(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn control_error(context: &str, err: ControlError) -> CliError {
    match err {
        ControlError::Transport(err) => transport_error(context, err),
        ControlError::Frame(err) => frame_error(context, err),
        ControlError::Registry(err) => registry_error(context, err),
        ControlError::NotConnected(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        ControlError::VirtualParameter(_) | ControlError::InvalidPedalConfig(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        ControlError::UnknownAddress(_) | ControlError::OutOfRangeSample(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
    }
}

pub fn sim_error(context: &str, err: SimError) -> CliError {
    match err {
        SimError::Registry(err) => registry_error(context, err),
        SimError::Frame(err) => frame_error(context, err),
        SimError::Virtual(_) => CliError::new(USAGE, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonelink_control::Link;

    #[test]
    fn not_connected_is_a_transport_failure() {
        let err = control_error("set failed", ControlError::NotConnected(Link::Amp));
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert_eq!(err.message, "set failed: amp link not connected");
    }

    #[test]
    fn bad_user_input_is_usage() {
        let err = control_error(
            "set failed",
            RegistryError::OutOfRange {
                key: "gain".into(),
                value: 200,
                min: 0,
                max: 100,
            }
            .into(),
        );
        assert_eq!(err.code, USAGE);
        assert_eq!(
            registry_error("x", RegistryError::UnknownParameter("nope".into())).code,
            USAGE
        );
    }

    #[test]
    fn missing_socket_is_transport_error() {
        let err = transport_error(
            "connect failed",
            TransportError::Connect {
                path: "/tmp/none.sock".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }
}
