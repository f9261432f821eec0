//! A virtual amplifier.
//!
//! Answers reads and applies writes against its own copy of the parameter
//! table, the way the hardware does over BLE-MIDI. Knob movements can be
//! injected to exercise spontaneous-change handling.

use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tonelink_frame::{
    decode, encode_write, wrap_sysex, FrameError, FramerConfig, SysexMessage, SysexReassembler,
};
use tonelink_registry::{Address, Registry, RegistryError};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("parameter '{0}' has no hardware address")]
    Virtual(String),
}

pub type Result<T> = std::result::Result<T, SimError>;

/// Something the controller asked the amp to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmpActivity {
    /// A read. `value` is what the amp answered with, if it knew the address.
    Read {
        address: Address,
        key: Option<String>,
        value: Option<u8>,
    },
    Write {
        address: Address,
        key: Option<String>,
        value: u8,
    },
}

/// Result of feeding one packet to the amp.
#[derive(Debug, Default)]
pub struct Exchange {
    pub activity: Vec<AmpActivity>,
    /// Packets the amp sends back.
    pub replies: Vec<Bytes>,
}

#[derive(Debug)]
pub struct VirtualAmp {
    registry: Registry,
    reassembler: SysexReassembler,
    framer: FramerConfig,
}

impl VirtualAmp {
    pub fn new(registry: Registry) -> Self {
        Self::with_framer(registry, FramerConfig::default())
    }

    pub fn with_framer(registry: Registry, framer: FramerConfig) -> Self {
        Self {
            registry,
            reassembler: SysexReassembler::with_config(&framer),
            framer,
        }
    }

    /// Feed one packet from the controller.
    pub fn handle_packet(&mut self, packet: &[u8], now: Instant) -> Result<Exchange> {
        let mut exchange = Exchange::default();
        for body in self.reassembler.push(packet, now) {
            let Some(decoded) = decode(&body) else {
                debug!(len = body.len(), "ignoring unrecognized sysex");
                continue;
            };
            if !decoded.checksum_ok() {
                warn!(address = %decoded.message.address(), "bad checksum; message ignored");
                continue;
            }

            match decoded.message {
                SysexMessage::Request { address, .. } => {
                    let found = self
                        .registry
                        .resolve(address)
                        .map(|p| (p.key().to_string(), p.current()));
                    let (key, value) = match found {
                        Some((key, value)) => {
                            exchange.replies.extend(self.data_packets(address, value)?);
                            (Some(key), Some(value))
                        }
                        None => {
                            debug!(%address, "read of unknown address ignored");
                            (None, None)
                        }
                    };
                    exchange.activity.push(AmpActivity::Read {
                        address,
                        key,
                        value,
                    });
                }
                SysexMessage::Data { address, value } => {
                    let key = self.registry.resolve(address).map(|p| p.key().to_string());
                    match &key {
                        Some(key) => {
                            self.registry.apply_hardware_value(key, value)?;
                        }
                        None => debug!(%address, value, "write to unknown address ignored"),
                    }
                    exchange.activity.push(AmpActivity::Write {
                        address,
                        key,
                        value,
                    });
                }
            }
        }
        Ok(exchange)
    }

    /// Turn a knob on the amp. Returns the packets announcing the change.
    pub fn turn_knob(&mut self, key: &str, value: u8) -> Result<Vec<Bytes>> {
        let address = self
            .registry
            .require(key)?
            .address()
            .ok_or_else(|| SimError::Virtual(key.to_string()))?;
        self.registry.set_value(key, value)?;
        debug!(key, value, "knob turned");
        self.data_packets(address, value)
    }

    pub fn value(&self, key: &str) -> Option<u8> {
        self.registry.get(key).map(|p| p.current())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn data_packets(&self, address: Address, value: u8) -> Result<Vec<Bytes>> {
        let mut body = BytesMut::new();
        encode_write(address, value, &mut body)?;
        Ok(wrap_sysex(&body, &self.framer)?)
    }
}
