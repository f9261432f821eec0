//! Serialized command path to the amp.
//!
//! Every write, read and bulk read goes through one FIFO lock that is held
//! for the whole encode-and-send of a message, so the bytes of two messages
//! never interleave on the link and messages leave in submission order.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tonelink_frame::{wrap_sysex, FramerConfig, SysexMessage};
use tonelink_registry::Address;
use tonelink_transport::PacketSender;
use tracing::{debug, trace, warn};

use crate::classifier::Classifier;
use crate::error::{ControlError, Result};
use crate::events::Link;
use crate::{lock, now};

/// Bytes requested by a parameter read.
const READ_LENGTH: u32 = 1;

#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Pause between consecutive reads of a bulk read. Default: 120ms.
    pub inter_read_delay: Duration,
    pub framer: FramerConfig,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            inter_read_delay: Duration::from_millis(120),
            framer: FramerConfig::default(),
        }
    }
}

/// Outcome of a bulk read. Reads that failed did not stop the others.
#[derive(Debug)]
pub struct BulkReadReport<K> {
    pub sent: Vec<K>,
    pub failed: Vec<(K, ControlError)>,
}

impl<K> BulkReadReport<K> {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl<K> Default for BulkReadReport<K> {
    fn default() -> Self {
        Self {
            sent: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// Issues writes and reads on the amp link, one message at a time.
#[derive(Debug)]
pub struct Sequencer<S> {
    link: tokio::sync::Mutex<Option<S>>,
    classifier: Arc<Mutex<Classifier>>,
    config: SequencerConfig,
}

impl<S: PacketSender> Sequencer<S> {
    pub fn new(classifier: Arc<Mutex<Classifier>>, config: SequencerConfig) -> Self {
        Self {
            link: tokio::sync::Mutex::new(None),
            classifier,
            config,
        }
    }

    /// Start sending on `sender`, replacing any previous link.
    pub async fn attach(&self, sender: S) {
        let previous = self.link.lock().await.replace(sender);
        if previous.is_some() {
            debug!("replaced existing amp link");
        }
    }

    /// Drop the link and forget outstanding reads. Returns `true` if a link was attached.
    pub async fn close(&self) -> bool {
        let previous = self.link.lock().await.take();
        lock(&self.classifier).clear();
        previous.is_some()
    }

    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.is_some()
    }

    /// Write `value` to `address`.
    pub async fn write(&self, address: Address, value: u8) -> Result<()> {
        trace!(%address, value, "write");
        self.send(SysexMessage::Data { address, value }).await
    }

    /// Ask the amp for the value at `address`. The answer arrives later on
    /// the inbound path; this only records the read as outstanding.
    pub async fn read(&self, address: Address) -> Result<()> {
        trace!(%address, "read");
        self.send(SysexMessage::Request {
            address,
            length: READ_LENGTH,
        })
        .await
    }

    /// Read several addresses in order, pausing between reads so the amp's
    /// answers do not pile up. A failed read is reported and skipped.
    pub async fn bulk_read<K>(&self, items: &[(K, Address)]) -> BulkReadReport<K>
    where
        K: Clone + fmt::Display,
    {
        let mut report = BulkReadReport::default();
        for (i, (key, address)) in items.iter().enumerate() {
            if i > 0 && !self.config.inter_read_delay.is_zero() {
                tokio::time::sleep(self.config.inter_read_delay).await;
            }
            match self.read(*address).await {
                Ok(()) => report.sent.push(key.clone()),
                Err(err) => {
                    warn!(%key, %address, error = %err, "read failed; continuing");
                    report.failed.push((key.clone(), err));
                }
            }
        }
        debug!(
            sent = report.sent.len(),
            failed = report.failed.len(),
            "bulk read finished"
        );
        report
    }

    async fn send(&self, message: SysexMessage) -> Result<()> {
        let mut body = BytesMut::new();
        message.encode(&mut body)?;
        let packets = wrap_sysex(&body, &self.config.framer)?;

        let mut guard = self.link.lock().await;
        let sender = guard.as_mut().ok_or(ControlError::NotConnected(Link::Amp))?;
        let registered = match message {
            SysexMessage::Request { address, .. } => {
                let mut classifier = lock(&self.classifier);
                let previous = classifier.last_read_at();
                let issued_at = now();
                classifier.register(address, issued_at);
                Some((address, issued_at, previous))
            }
            SysexMessage::Data { .. } => None,
        };
        for packet in packets {
            if let Err(err) = sender.send_packet(packet).await {
                if let Some((address, issued_at, previous)) = registered {
                    lock(&self.classifier).withdraw(address, issued_at, previous);
                }
                return Err(err.into());
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }
}
