//! Pedal pickup.
//!
//! When a parameter is selected, or set some other way, while the pedal sits
//! somewhere else, applying the next pedal sample would make the value jump.
//! Instead the pedal is ignored until it comes back to the value: within
//! [`CAPTURE_THRESHOLD`] of it, or crossing it between two samples. A knob
//! turned on the amp in the meantime ends the hold, since that value no
//! longer needs protecting.

use tracing::debug;

/// Distance from the held value at which the pedal takes over.
pub const CAPTURE_THRESHOLD: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PickupState {
    /// Pedal samples apply directly.
    #[default]
    Inactive,
    /// Pedal samples are only tracked until the pedal reaches `target`.
    Active {
        key: String,
        target: u8,
        last_sample: Option<u8>,
    },
}

/// What to do with one pedal sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PedalDecision {
    /// Write the value to the parameter.
    Apply(u8),
    /// Only show where the pedal is.
    Track(u8),
}

#[derive(Debug)]
pub struct PickupArbiter {
    state: PickupState,
    threshold: u8,
}

impl PickupArbiter {
    pub fn new() -> Self {
        Self::with_threshold(CAPTURE_THRESHOLD)
    }

    pub fn with_threshold(threshold: u8) -> Self {
        Self {
            state: PickupState::Inactive,
            threshold,
        }
    }

    /// Hold `key` at `target` if the pedal is away from it.
    ///
    /// `pedal` is the pedal position in the parameter's units, or `None` if
    /// the pedal has not reported yet. An unknown position holds too, and the
    /// first sample decides. Returns `true` when a hold started.
    pub fn engage(&mut self, key: &str, target: u8, pedal: Option<u8>) -> bool {
        let far = pedal.is_none_or(|p| p.abs_diff(target) > self.threshold);
        if far {
            debug!(key, target, ?pedal, "pickup engaged");
            self.state = PickupState::Active {
                key: key.to_string(),
                target,
                last_sample: pedal,
            };
        } else {
            self.state = PickupState::Inactive;
        }
        far
    }

    /// Decide what a pedal sample for `key` does.
    pub fn on_sample(&mut self, key: &str, sample: u8) -> PedalDecision {
        let PickupState::Active {
            key: held,
            target,
            last_sample,
        } = &mut self.state
        else {
            return PedalDecision::Apply(sample);
        };

        if held != key {
            self.state = PickupState::Inactive;
            return PedalDecision::Apply(sample);
        }

        let target = *target;
        let close = sample.abs_diff(target) <= self.threshold;
        let crossed = last_sample.is_some_and(|prev| {
            let (lo, hi) = if prev <= sample { (prev, sample) } else { (sample, prev) };
            (lo..=hi).contains(&target)
        });

        if close || crossed {
            debug!(key, target, sample, crossed, "pickup released; pedal has the value");
            self.state = PickupState::Inactive;
            PedalDecision::Apply(sample)
        } else {
            *last_sample = Some(sample);
            PedalDecision::Track(sample)
        }
    }

    /// The hardware changed `key` on its own. Returns `true` if that ended a hold.
    pub fn on_spontaneous(&mut self, key: &str) -> bool {
        match &self.state {
            PickupState::Active { key: held, .. } if held == key => {
                debug!(key, "pickup released by hardware change");
                self.state = PickupState::Inactive;
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.state = PickupState::Inactive;
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, PickupState::Active { .. })
    }

    pub fn state(&self) -> &PickupState {
        &self.state
    }
}

impl Default for PickupArbiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(arbiter: &mut PickupArbiter, samples: &[u8]) -> Vec<PedalDecision> {
        samples.iter().map(|s| arbiter.on_sample("gain", *s)).collect()
    }

    #[test]
    fn inactive_applies_everything() {
        let mut a = PickupArbiter::new();
        assert_eq!(a.on_sample("gain", 10), PedalDecision::Apply(10));
    }

    #[test]
    fn near_pedal_does_not_engage() {
        let mut a = PickupArbiter::new();
        assert!(!a.engage("gain", 50, Some(53)));
        assert!(!a.is_active());
    }

    #[test]
    fn approach_from_above_releases_on_crossing() {
        let mut a = PickupArbiter::new();
        assert!(a.engage("gain", 50, Some(70)));
        let decisions = feed(&mut a, &[70, 60, 54, 48]);
        assert_eq!(
            decisions,
            vec![
                PedalDecision::Track(70),
                PedalDecision::Track(60),
                PedalDecision::Track(54),
                PedalDecision::Apply(48),
            ]
        );
        assert!(!a.is_active());
    }

    #[test]
    fn release_within_threshold() {
        let mut a = PickupArbiter::new();
        a.engage("gain", 50, Some(10));
        assert_eq!(a.on_sample("gain", 40), PedalDecision::Track(40));
        assert_eq!(a.on_sample("gain", 47), PedalDecision::Apply(47));
    }

    #[test]
    fn jump_across_target_releases() {
        let mut a = PickupArbiter::new();
        a.engage("gain", 50, Some(0));
        assert_eq!(a.on_sample("gain", 20), PedalDecision::Track(20));
        assert_eq!(a.on_sample("gain", 100), PedalDecision::Apply(100));
    }

    #[test]
    fn unknown_position_holds_until_first_sample_decides() {
        let mut a = PickupArbiter::new();
        assert!(a.engage("gain", 50, None));
        assert_eq!(a.on_sample("gain", 90), PedalDecision::Track(90));

        let mut b = PickupArbiter::new();
        b.engage("gain", 50, None);
        assert_eq!(b.on_sample("gain", 52), PedalDecision::Apply(52));
    }

    #[test]
    fn spontaneous_change_releases_only_held_key() {
        let mut a = PickupArbiter::new();
        a.engage("gain", 50, Some(100));
        assert!(!a.on_spontaneous("bass"));
        assert!(a.is_active());
        assert!(a.on_spontaneous("gain"));
        assert_eq!(a.on_sample("gain", 100), PedalDecision::Apply(100));
    }

    #[test]
    fn sample_for_other_key_releases() {
        let mut a = PickupArbiter::new();
        a.engage("gain", 50, Some(100));
        assert_eq!(a.on_sample("bass", 100), PedalDecision::Apply(100));
        assert_eq!(a.state(), &PickupState::Inactive);
    }
}
