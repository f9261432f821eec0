//! Control a BLE-MIDI guitar amplifier and an expression pedal.
//!
//! tonelink speaks the amp's Roland-style SysEx parameter protocol and
//! arbitrates which source owns a parameter at any moment: the caller, a
//! knob on the amp, or the pedal.
//!
//! # Crate Structure
//!
//! - [`registry`]: parameter table (addresses, ranges, mode gates)
//! - [`frame`]: SysEx codec and BLE-MIDI packet framing
//! - [`transport`]: packet links (in-memory, Unix-socket bridge)
//! - [`control`]: sequencer, classifier, pickup and the [`control::Controller`]
//!   (behind the `control` feature)
//! - [`sim`]: a virtual amplifier for bench testing

pub mod sim;

/// Re-export registry types.
pub mod registry {
    pub use tonelink_registry::*;
}

/// Re-export frame types.
pub mod frame {
    pub use tonelink_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use tonelink_transport::*;
}

/// Re-export control types (requires `control` feature).
#[cfg(feature = "control")]
pub mod control {
    pub use tonelink_control::*;
}
