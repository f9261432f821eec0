//! Expression pedal and footswitch input.

use serde::{Deserialize, Serialize};
use tonelink_frame::ControlChange;
use tonelink_registry::ValueRange;
use tracing::{trace, warn};

use crate::error::{ControlError, Result};

/// Controller value at or above which a switch counts as closed.
const SWITCH_THRESHOLD: u8 = 64;

const MIDI_DATA_MAX: u8 = 0x7F;

/// How a footswitch reports being pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Pressing closes the switch: high values mean pressed.
    #[default]
    NormallyOpen,
    /// Pressing opens the switch: low values mean pressed.
    NormallyClosed,
}

/// Controller numbers the pedal sends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PedalConfig {
    /// Footswitch that selects the previous parameter. Default: 80.
    pub previous_cc: u8,
    /// Footswitch that selects the next parameter. Default: 81.
    pub next_cc: u8,
    /// Continuous expression input. Default: 127.
    pub expression_cc: u8,
    pub polarity: Polarity,
}

impl Default for PedalConfig {
    fn default() -> Self {
        Self {
            previous_cc: 80,
            next_cc: 81,
            expression_cc: 127,
            polarity: Polarity::NormallyOpen,
        }
    }
}

impl PedalConfig {
    /// Codes must be valid controller numbers and distinct from each other.
    pub fn validate(&self) -> Result<()> {
        let codes = [self.previous_cc, self.next_cc, self.expression_cc];
        if let Some(code) = codes.iter().find(|c| **c > MIDI_DATA_MAX) {
            return Err(ControlError::InvalidPedalConfig(format!(
                "controller {code} above 127"
            )));
        }
        if codes[0] == codes[1] || codes[0] == codes[2] || codes[1] == codes[2] {
            return Err(ControlError::InvalidPedalConfig(format!(
                "controller numbers must differ (previous {}, next {}, expression {})",
                codes[0], codes[1], codes[2]
            )));
        }
        Ok(())
    }
}

/// What a control change from the pedal means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PedalAction {
    Previous,
    Next,
    /// Raw expression position, 0-127.
    Expression(u8),
}

/// Turns pedal control changes into actions.
///
/// Footswitches act on the press edge only, so holding a switch or the
/// release message does nothing.
#[derive(Debug)]
pub struct PedalInput {
    config: PedalConfig,
    previous_down: bool,
    next_down: bool,
}

impl PedalInput {
    pub fn new(config: PedalConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            previous_down: false,
            next_down: false,
        })
    }

    pub fn config(&self) -> &PedalConfig {
        &self.config
    }

    /// Change controller numbers. On error the previous codes stay in effect.
    pub fn set_codes(&mut self, previous_cc: u8, next_cc: u8, expression_cc: u8) -> Result<()> {
        let config = PedalConfig {
            previous_cc,
            next_cc,
            expression_cc,
            polarity: self.config.polarity,
        };
        config.validate()?;
        self.config = config;
        self.previous_down = false;
        self.next_down = false;
        Ok(())
    }

    pub fn set_polarity(&mut self, polarity: Polarity) {
        self.config.polarity = polarity;
        self.previous_down = false;
        self.next_down = false;
    }

    /// Interpret one control change. Any channel is accepted; values above
    /// 127 are not MIDI data and are dropped.
    pub fn handle(&mut self, cc: &ControlChange) -> Option<PedalAction> {
        if cc.value > MIDI_DATA_MAX {
            warn!(
                controller = cc.controller,
                value = cc.value,
                "dropping control change with out-of-range value"
            );
            return None;
        }
        let config = &self.config;
        if cc.controller == config.expression_cc {
            return Some(PedalAction::Expression(cc.value));
        }

        let pressed = match config.polarity {
            Polarity::NormallyOpen => cc.value >= SWITCH_THRESHOLD,
            Polarity::NormallyClosed => cc.value < SWITCH_THRESHOLD,
        };
        let (was_down, action) = if cc.controller == config.previous_cc {
            (&mut self.previous_down, PedalAction::Previous)
        } else if cc.controller == config.next_cc {
            (&mut self.next_down, PedalAction::Next)
        } else {
            trace!(controller = cc.controller, "ignoring unmapped controller");
            return None;
        };

        let edge = pressed && !*was_down;
        *was_down = pressed;
        edge.then_some(action)
    }
}

/// Map a raw 0-127 pedal position linearly onto `range`, rounding to nearest.
pub fn scale_to_range(raw: u8, range: ValueRange) -> u8 {
    let raw = u32::from(raw.min(MIDI_DATA_MAX));
    let span = u32::from(range.span());
    let max = u32::from(MIDI_DATA_MAX);
    let offset = (raw * span * 2 + max) / (max * 2);
    // offset <= span, so this cannot overflow.
    range.min + offset as u8
}
