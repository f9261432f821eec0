use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::error::FrameError;
use crate::packet::FramerConfig;
use crate::sysex::{SYSEX_END, SYSEX_START};

const INITIAL_BUFFER_CAPACITY: usize = 64;

/// Reassembles SysEx bodies from BLE-MIDI packets.
///
/// Bytes with bit 7 set are headers or timestamps and are dropped, except
/// `F0` (opens a new body, discarding any unfinished one) and `F7` (closes the
/// body). Completed bodies start with `F0` and exclude the `F7`.
#[derive(Debug)]
pub struct SysexReassembler {
    buf: BytesMut,
    open: bool,
    last_byte_at: Option<Instant>,
    timeout: Duration,
}

impl SysexReassembler {
    /// Create a reassembler with the default 1 second timeout.
    pub fn new() -> Self {
        Self::with_config(&FramerConfig::default())
    }

    /// Create a reassembler using the timeout from `config`.
    pub fn with_config(config: &FramerConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            open: false,
            last_byte_at: None,
            timeout: config.reassembly_timeout,
        }
    }

    /// Feed one packet; returns every SysEx body it completed.
    pub fn push(&mut self, packet: &[u8], now: Instant) -> Vec<Bytes> {
        self.expire(now);

        let mut complete = Vec::new();
        for &byte in packet {
            match byte {
                SYSEX_START => {
                    if self.open && self.buf.len() > 1 {
                        debug!(
                            discarded = self.buf.len(),
                            "sysex start inside open message; dropping partial body"
                        );
                    }
                    self.buf.clear();
                    self.buf.extend_from_slice(&[SYSEX_START]);
                    self.open = true;
                    self.last_byte_at = Some(now);
                }
                SYSEX_END => {
                    if self.open {
                        complete.push(self.buf.split().freeze());
                        self.open = false;
                        self.last_byte_at = None;
                    }
                }
                b if b >= 0x80 => {}
                b => {
                    if self.open {
                        self.buf.extend_from_slice(&[b]);
                        self.last_byte_at = Some(now);
                    }
                }
            }
        }

        if !complete.is_empty() {
            trace!(messages = complete.len(), "reassembled sysex");
        }
        complete
    }

    /// Discard an open body that has been idle longer than the timeout.
    ///
    /// Returns `true` when a body was discarded.
    pub fn expire(&mut self, now: Instant) -> bool {
        let Some(last) = self.last_byte_at else {
            return false;
        };
        let elapsed = now.saturating_duration_since(last);
        if !self.open || elapsed <= self.timeout {
            return false;
        }

        let err = FrameError::ReassemblyTimeout {
            elapsed,
            buffered: self.buf.len(),
        };
        debug!(error = %err, "discarding incomplete sysex");
        self.reset();
        true
    }

    /// True while a body is being accumulated.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// When the open body will expire, if any.
    pub fn deadline(&self) -> Option<Instant> {
        if self.open {
            self.last_byte_at.map(|last| last + self.timeout)
        } else {
            None
        }
    }

    /// Drop any partial body.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.open = false;
        self.last_byte_at = None;
    }
}

impl Default for SysexReassembler {
    fn default() -> Self {
        Self::new()
    }
}
