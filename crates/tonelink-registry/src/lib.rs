//! Parameter registry for SysEx-addressed amplifier controls.
//!
//! The registry is the leaf of tonelink: a table of every parameter the
//! controller can read, write or map a pedal onto. Each entry is either
//! addressable (it owns a 4-byte hardware address) or virtual (software-only,
//! never sent on the wire).
//!
//! Tables are loaded from JSON definitions, either the built-in table for the
//! default amplifier or a user-supplied file.

pub mod address;
pub mod config;
pub mod error;
pub mod parameter;
pub mod registry;

pub use address::Address;
pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use parameter::{LinkedWrite, ModeGate, ParamKind, Parameter, ParameterDef, ValueRange};
pub use registry::Registry;
