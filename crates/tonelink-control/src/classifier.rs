//! Tells answers to our own reads apart from knob movements on the amp.
//!
//! The amp reports both with the same data message. A value is a response if
//! it matches an outstanding read, or if any read went out within the quiet
//! window. Only values arriving while the link has been quiet count as
//! spontaneous. Late responses are therefore biased toward "response", which
//! is the safer mistake: misreading a response as a knob turn would release
//! pedal pickup for no reason.

use std::time::{Duration, Instant};

use serde::Serialize;
use tonelink_registry::Address;
use tracing::trace;

/// Timing for change classification.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// How long a read stays outstanding without an answer. Default: 2s.
    pub request_ttl: Duration,
    /// How long after the last read every value is treated as a response. Default: 1s.
    pub quiet_window: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            request_ttl: Duration::from_secs(2),
            quiet_window: Duration::from_secs(1),
        }
    }
}

/// Where an inbound value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Answer to a read we issued.
    Response,
    /// Someone moved a control on the hardware.
    Spontaneous,
}

/// A read that has been sent but not yet answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutstandingRequest {
    pub address: Address,
    pub issued_at: Instant,
}

#[derive(Debug, Default)]
pub struct Classifier {
    outstanding: Vec<OutstandingRequest>,
    last_read_at: Option<Instant>,
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new() -> Self {
        Self::with_config(ClassifierConfig::default())
    }

    pub fn with_config(config: ClassifierConfig) -> Self {
        Self {
            outstanding: Vec::new(),
            last_read_at: None,
            config,
        }
    }

    /// Record a read sent to `address`.
    pub fn register(&mut self, address: Address, now: Instant) {
        self.purge(now);
        self.outstanding.push(OutstandingRequest {
            address,
            issued_at: now,
        });
        self.last_read_at = Some(now);
    }

    /// Label a value that arrived for `address`, consuming the oldest
    /// matching outstanding read.
    pub fn classify(&mut self, address: Address, now: Instant) -> Origin {
        self.purge(now);

        if let Some(pos) = self.outstanding.iter().position(|r| r.address == address) {
            self.outstanding.remove(pos);
            trace!(%address, "value answers outstanding read");
            return Origin::Response;
        }

        let quiet = self
            .last_read_at
            .is_none_or(|at| now.saturating_duration_since(at) > self.config.quiet_window);
        if quiet {
            Origin::Spontaneous
        } else {
            trace!(%address, "value inside read window; treating as response");
            Origin::Response
        }
    }

    /// Drop reads older than the TTL. Returns how many were dropped.
    pub fn purge(&mut self, now: Instant) -> usize {
        let ttl = self.config.request_ttl;
        let before = self.outstanding.len();
        self.outstanding
            .retain(|r| now.saturating_duration_since(r.issued_at) <= ttl);
        let dropped = before - self.outstanding.len();
        if dropped > 0 {
            trace!(dropped, "expired unanswered reads");
        }
        dropped
    }

    /// Forget a read that never reached the amp. `previous` is the last read
    /// time from before it was registered.
    pub fn withdraw(&mut self, address: Address, issued_at: Instant, previous: Option<Instant>) {
        if let Some(pos) = self
            .outstanding
            .iter()
            .rposition(|r| r.address == address && r.issued_at == issued_at)
        {
            self.outstanding.remove(pos);
        }
        if self.last_read_at == Some(issued_at) {
            self.last_read_at = previous;
        }
        trace!(%address, "read withdrawn");
    }

    pub fn last_read_at(&self) -> Option<Instant> {
        self.last_read_at
    }

    /// Forget all outstanding reads, e.g. when the link closes.
    pub fn clear(&mut self) {
        self.outstanding.clear();
        self.last_read_at = None;
    }

    pub fn outstanding(&self) -> &[OutstandingRequest] {
        &self.outstanding
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }
}
