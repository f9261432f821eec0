//! Rate limiting for pedal-driven writes.
//!
//! A moving pedal produces far more samples than the amp link should carry.
//! Values go out at most once per minimum interval. Whatever was held back
//! is flushed once the pedal has been still for the trailing delay, so the
//! position the pedal stops at always reaches the amp.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum time between two sends. Default: 30ms.
    pub min_interval: Duration,
    /// Quiet time after the last offer before a held value is flushed. Default: 150ms.
    pub trailing_delay: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(30),
            trailing_delay: Duration::from_millis(150),
        }
    }
}

#[derive(Debug)]
pub struct Throttle<T> {
    config: ThrottleConfig,
    last_sent: Option<Instant>,
    last_offer: Option<Instant>,
    pending: Option<T>,
}

impl<T> Throttle<T> {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            last_sent: None,
            last_offer: None,
            pending: None,
        }
    }

    /// Offer a value. Returns it if it should be sent now; otherwise it is
    /// held, replacing anything held before.
    pub fn offer(&mut self, value: T, now: Instant) -> Option<T> {
        self.last_offer = Some(now);
        let due = self
            .last_sent
            .is_none_or(|at| now.saturating_duration_since(at) >= self.config.min_interval);
        if due {
            self.last_sent = Some(now);
            self.pending = None;
            Some(value)
        } else {
            self.pending = Some(value);
            None
        }
    }

    /// Release the held value once the trailing delay has passed.
    pub fn flush(&mut self, now: Instant) -> Option<T> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        self.last_sent = Some(now);
        self.pending.take()
    }

    /// When the held value will be flushed, if one is held.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        self.last_offer.map(|at| at + self.config.trailing_delay)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop the held value without sending it.
    pub fn clear(&mut self) {
        self.pending = None;
    }
}

impl<T> Default for Throttle<T> {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn first_offer_goes_out() {
        let mut t = Throttle::default();
        assert_eq!(t.offer(1, Instant::now()), Some(1));
        assert!(!t.has_pending());
    }

    #[test]
    fn burst_is_limited_and_last_value_flushed() {
        let mut t = Throttle::default();
        let t0 = Instant::now();
        let mut sent = Vec::new();
        // One sample every 10ms for 100ms.
        for i in 0..10u64 {
            sent.extend(t.offer(i, t0 + ms(i * 10)));
        }
        assert_eq!(sent, vec![0, 3, 6, 9]);
        assert!(!t.has_pending());

        for i in 10..12u64 {
            sent.extend(t.offer(i, t0 + ms(i * 10)));
        }
        assert_eq!(t.deadline(), Some(t0 + ms(110) + ms(150)));
        assert_eq!(t.flush(t0 + ms(200)), None);
        assert_eq!(t.flush(t0 + ms(260)), Some(11));
        assert_eq!(t.flush(t0 + ms(400)), None);
    }

    #[test]
    fn newer_offer_replaces_held_value() {
        let mut t = Throttle::default();
        let t0 = Instant::now();
        t.offer("a", t0);
        assert_eq!(t.offer("b", t0 + ms(5)), None);
        assert_eq!(t.offer("c", t0 + ms(10)), None);
        assert_eq!(t.flush(t0 + ms(200)), Some("c"));
    }

    #[test]
    fn clear_drops_held_value() {
        let mut t = Throttle::default();
        let t0 = Instant::now();
        t.offer(1, t0);
        t.offer(2, t0 + ms(1));
        t.clear();
        assert_eq!(t.deadline(), None);
        assert_eq!(t.flush(t0 + ms(500)), None);
    }
}
