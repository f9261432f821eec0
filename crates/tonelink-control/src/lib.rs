//! Control arbitration for a BLE-MIDI amplifier and expression pedal.
//!
//! This is the layer callers talk to. A [`Controller`] owns the parameter
//! registry and serializes every hardware operation through a [`Sequencer`].
//! Inbound values are labelled by the [`Classifier`] as answers to our reads
//! or as knob movements, and the [`PickupArbiter`] keeps the pedal from
//! jumping a parameter away from a value that was set some other way.
//!
//! State changes reach the caller as [`ControlEvent`]s on a FIFO channel.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod classifier;
pub mod controller;
pub mod error;
pub mod events;
pub mod pedal;
pub mod pickup;
pub mod sequencer;
pub mod session;
pub mod throttle;

pub use classifier::{Classifier, ClassifierConfig, Origin, OutstandingRequest};
pub use controller::{Controller, ControllerConfig, InboundValue};
pub use error::{ControlError, Result};
pub use events::{ControlEvent, EventSink, Link, Severity};
pub use pedal::{scale_to_range, PedalAction, PedalConfig, PedalInput, Polarity};
pub use pickup::{PedalDecision, PickupArbiter, PickupState, CAPTURE_THRESHOLD};
pub use sequencer::{BulkReadReport, Sequencer, SequencerConfig};
pub use session::{run_amp_link, run_pedal_link};
pub use throttle::{Throttle, ThrottleConfig};

/// Lock a state mutex. Nothing panics while holding one, so a poisoned lock
/// still holds consistent state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Current time on the tokio clock (pausable in tests).
pub(crate) fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}
