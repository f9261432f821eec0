use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{RegistryError, Result};

/// Largest value a SysEx data byte can carry.
pub const SYSEX_DATA_MAX: u8 = 0x7F;

/// Inclusive value range of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: u8,
    pub max: u8,
}

impl ValueRange {
    pub const fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: u8) -> bool {
        (self.min..=self.max).contains(&value)
    }

    pub fn clamp(&self, value: u8) -> u8 {
        value.clamp(self.min, self.max)
    }

    /// Number of steps between `min` and `max`.
    pub fn span(&self) -> u8 {
        self.max - self.min
    }
}

/// An auxiliary write that puts the hardware into the mode a parameter needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedWrite {
    pub address: Address,
    pub value: u8,
}

/// Restricts ownership of a shared address to one value of a selector parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeGate {
    /// Key of the parameter whose value selects the mode.
    pub selector: String,
    /// Selector value under which the gated parameter owns its address.
    pub value: u8,
}

/// How a parameter reaches the hardware, checked once at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Addressable { address: Address, range: ValueRange },
    Virtual { range: ValueRange },
}

impl ParamKind {
    pub fn range(&self) -> ValueRange {
        match self {
            ParamKind::Addressable { range, .. } | ParamKind::Virtual { range } => *range,
        }
    }

    pub fn address(&self) -> Option<Address> {
        match self {
            ParamKind::Addressable { address, .. } => Some(*address),
            ParamKind::Virtual { .. } => None,
        }
    }
}

/// Serialized form of a parameter in a definition table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterDef {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Hardware address; absent for virtual parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    pub min: u8,
    pub max: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linked: Vec<LinkedWrite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ModeGate>,
}

/// A registered parameter and its last known value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    key: String,
    label: String,
    kind: ParamKind,
    default: u8,
    current: u8,
    synced: bool,
    labels: Vec<String>,
    linked: Vec<LinkedWrite>,
    mode: Option<ModeGate>,
}

impl Parameter {
    /// Validate a definition on its own (cross-parameter checks live in the registry).
    pub(crate) fn from_def(def: ParameterDef) -> Result<Self> {
        let invalid = |reason: String| RegistryError::InvalidDefinition {
            key: def.key.clone(),
            reason,
        };

        if def.key.trim().is_empty() {
            return Err(invalid("key must not be empty".to_string()));
        }
        if def.min > def.max {
            return Err(invalid(format!("min {} exceeds max {}", def.min, def.max)));
        }

        let range = ValueRange::new(def.min, def.max);
        let default = def.default.unwrap_or(def.min);
        if !range.contains(default) {
            return Err(invalid(format!(
                "default {default} outside {}..={}",
                def.min, def.max
            )));
        }

        let kind = match def.address {
            Some(address) => {
                if !address.is_sysex_safe() {
                    return Err(invalid(format!("address {address} is not 7-bit clean")));
                }
                if def.max > SYSEX_DATA_MAX {
                    return Err(invalid(format!(
                        "max {} does not fit a SysEx data byte",
                        def.max
                    )));
                }
                ParamKind::Addressable { address, range }
            }
            None => {
                if def.mode.is_some() {
                    return Err(invalid("virtual parameters cannot be mode-gated".to_string()));
                }
                ParamKind::Virtual { range }
            }
        };

        for link in &def.linked {
            if !link.address.is_sysex_safe() || link.value > SYSEX_DATA_MAX {
                return Err(invalid(format!(
                    "linked write {} = {} is not 7-bit clean",
                    link.address, link.value
                )));
            }
        }
        if !def.linked.is_empty() && kind.address().is_none() {
            return Err(invalid(
                "virtual parameters cannot carry linked writes".to_string(),
            ));
        }

        Ok(Self {
            label: def.label.unwrap_or_else(|| def.key.clone()),
            key: def.key,
            kind,
            default,
            current: default,
            synced: false,
            labels: def.labels,
            linked: def.linked,
            mode: def.mode,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    pub fn address(&self) -> Option<Address> {
        self.kind.address()
    }

    pub fn range(&self) -> ValueRange {
        self.kind.range()
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self.kind, ParamKind::Virtual { .. })
    }

    pub fn default_value(&self) -> u8 {
        self.default
    }

    /// Last known value. Authoritative only when [`Parameter::is_synced`] is true.
    pub fn current(&self) -> u8 {
        self.current
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Enumeration label for a value, when the parameter has labels.
    pub fn label_for(&self, value: u8) -> Option<&str> {
        let index = usize::from(value.checked_sub(self.range().min)?);
        self.labels.get(index).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn linked(&self) -> &[LinkedWrite] {
        &self.linked
    }

    pub fn mode(&self) -> Option<&ModeGate> {
        self.mode.as_ref()
    }

    pub(crate) fn store(&mut self, value: u8) {
        self.current = value;
        self.synced = true;
    }

    pub(crate) fn forget(&mut self) {
        self.synced = false;
    }

    /// Definition form of this parameter (current value not included).
    pub fn to_def(&self) -> ParameterDef {
        let range = self.range();
        ParameterDef {
            key: self.key.clone(),
            label: Some(self.label.clone()),
            address: self.address(),
            min: range.min,
            max: range.max,
            default: Some(self.default),
            labels: self.labels.clone(),
            linked: self.linked.clone(),
            mode: self.mode.clone(),
        }
    }
}
