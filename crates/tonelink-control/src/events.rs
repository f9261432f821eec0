use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;

/// Which device link an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Link {
    Amp,
    Pedal,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::Amp => f.write_str("amp"),
            Link::Pedal => f.write_str("pedal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// Everything the core tells its collaborators, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControlEvent {
    /// A parameter's value changed. `spontaneous` is true when a person moved
    /// the hardware control.
    ValueUpdate {
        key: String,
        value: u8,
        spontaneous: bool,
    },
    /// Where the pedal currently sits, in the selected parameter's units.
    /// Informational only while pickup is holding the parameter.
    PedalPosition { key: String, value: u8 },
    SelectionChanged { key: String },
    ConnectionState { link: Link, connected: bool },
    Log { message: String, severity: Severity },
}

/// Sending side of the event channel. Cheap to clone; a sink without a
/// receiver silently drops events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<ControlEvent>>,
}

impl EventSink {
    /// Create a sink and the receiver collaborators read from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ControlEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ControlEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is listening any more.
            let _ = tx.send(event);
        }
    }

    pub fn log(&self, severity: Severity, message: impl Into<String>) {
        self.emit(ControlEvent::Log {
            message: message.into(),
            severity,
        });
    }
}
