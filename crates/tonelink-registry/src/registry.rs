use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::address::Address;
use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::parameter::{Parameter, ParameterDef};

const BUILTIN_TABLE: &str = include_str!("../data/builtin.json");

/// On-disk layout of a parameter table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ParameterTable {
    parameters: Vec<ParameterDef>,
}

/// Key-indexed table of parameters, owned by a single controller.
///
/// Registration order is preserved; it is the order footswitch navigation
/// walks through.
#[derive(Debug, Clone)]
pub struct Registry {
    params: Vec<Parameter>,
    index: HashMap<String, usize>,
    config: RegistryConfig,
}

impl Registry {
    /// Create an empty registry with default config.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create an empty registry with explicit config.
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            params: Vec::new(),
            index: HashMap::new(),
            config,
        }
    }

    /// The table for the default amplifier, embedded at build time.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_TABLE)
    }

    /// Build a registry from a JSON table.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_json_with_config(json, RegistryConfig::default())
    }

    /// Build a registry from a JSON table with explicit config.
    pub fn from_json_with_config(json: &str, config: RegistryConfig) -> Result<Self> {
        let table: ParameterTable = serde_json::from_str(json)?;
        if table.parameters.len() > config.max_parameters {
            return Err(RegistryError::LoadFailed(format!(
                "parameter count exceeds configured max ({}): {}",
                config.max_parameters,
                table.parameters.len()
            )));
        }

        let mut registry = Self::with_config(config);
        for def in table.parameters {
            registry.register(def)?;
        }
        Ok(registry)
    }

    /// Load a JSON table from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_file_with_config(path, RegistryConfig::default())
    }

    /// Load a JSON table from a file with explicit config.
    pub fn from_file_with_config(path: &Path, config: RegistryConfig) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|err| RegistryError::LoadFailed(format!("{}: {err}", path.display())))?;
        let metadata = file
            .metadata()
            .map_err(|err| RegistryError::LoadFailed(err.to_string()))?;
        if metadata.len() > config.max_file_size as u64 {
            return Err(RegistryError::LoadFailed(format!(
                "parameter table too large ({} bytes): {}",
                metadata.len(),
                path.display()
            )));
        }

        let read_limit = u64::try_from(config.max_file_size.saturating_add(1)).unwrap_or(u64::MAX);
        let mut content = String::new();
        file.take(read_limit)
            .read_to_string(&mut content)
            .map_err(|err| {
                RegistryError::LoadFailed(format!("failed reading {}: {err}", path.display()))
            })?;
        if content.len() > config.max_file_size {
            return Err(RegistryError::LoadFailed(format!(
                "parameter table too large while reading: {}",
                path.display()
            )));
        }

        debug!(path = %path.display(), "loading parameter table");
        Self::from_json_with_config(&content, config)
    }

    /// Register one parameter definition.
    pub fn register(&mut self, def: ParameterDef) -> Result<()> {
        if self.index.contains_key(&def.key) {
            return Err(RegistryError::DuplicateKey(def.key));
        }
        if self.params.len() >= self.config.max_parameters {
            return Err(RegistryError::LoadFailed(format!(
                "parameter count exceeds configured max ({})",
                self.config.max_parameters
            )));
        }

        let param = Parameter::from_def(def)?;

        if let Some(gate) = param.mode() {
            let Some(selector) = self.get(&gate.selector) else {
                return Err(RegistryError::InvalidDefinition {
                    key: param.key().to_string(),
                    reason: format!("mode selector '{}' is not registered", gate.selector),
                });
            };
            if !selector.range().contains(gate.value) {
                return Err(RegistryError::InvalidDefinition {
                    key: param.key().to_string(),
                    reason: format!(
                        "mode value {} outside selector '{}' range",
                        gate.value, gate.selector
                    ),
                });
            }
        }

        if let Some(address) = param.address() {
            if let Some(existing) = self.conflicting_owner(address, &param) {
                return Err(RegistryError::DuplicateAddress {
                    address,
                    existing: existing.to_string(),
                    key: param.key().to_string(),
                });
            }
        }

        self.index.insert(param.key().to_string(), self.params.len());
        self.params.push(param);
        Ok(())
    }

    /// Shared addresses are only allowed between parameters gated on
    /// different values of the same selector.
    fn conflicting_owner(&self, address: Address, candidate: &Parameter) -> Option<&str> {
        self.params
            .iter()
            .filter(|p| p.address() == Some(address))
            .find(|p| match (p.mode(), candidate.mode()) {
                (Some(a), Some(b)) => a.selector != b.selector || a.value == b.value,
                _ => true,
            })
            .map(Parameter::key)
    }

    /// Look up a parameter by key.
    pub fn get(&self, key: &str) -> Option<&Parameter> {
        self.index.get(key).map(|&i| &self.params[i])
    }

    /// Look up a parameter by key, failing with `UnknownParameter`.
    pub fn require(&self, key: &str) -> Result<&Parameter> {
        self.get(key)
            .ok_or_else(|| RegistryError::UnknownParameter(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Parameters in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    /// Keys in registration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(Parameter::key)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Find the parameter that owns `address` under the currently active mode.
    ///
    /// When several parameters share the address, the one whose mode gate
    /// matches the current value of its selector wins.
    pub fn resolve(&self, address: Address) -> Option<&Parameter> {
        let mut ungated = None;
        for param in self.params.iter().filter(|p| p.address() == Some(address)) {
            match param.mode() {
                None => ungated = Some(param),
                Some(gate) => {
                    let active = self
                        .get(&gate.selector)
                        .is_some_and(|selector| selector.current() == gate.value);
                    if active {
                        return Some(param);
                    }
                }
            }
        }
        ungated
    }

    /// Store a value set by the caller. Out-of-range values are rejected.
    pub fn set_value(&mut self, key: &str, value: u8) -> Result<u8> {
        let param = self.get_mut(key)?;
        let range = param.range();
        if !range.contains(value) {
            return Err(RegistryError::OutOfRange {
                key: key.to_string(),
                value,
                min: range.min,
                max: range.max,
            });
        }
        param.store(value);
        Ok(value)
    }

    /// Store a value reported by the hardware, clamping it into range.
    pub fn apply_hardware_value(&mut self, key: &str, value: u8) -> Result<u8> {
        let param = self.get_mut(key)?;
        let range = param.range();
        let stored = range.clamp(value);
        if stored != value {
            warn!(
                key,
                value,
                min = range.min,
                max = range.max,
                "hardware value out of range; clamped"
            );
        }
        param.store(stored);
        Ok(stored)
    }

    /// Store the value of whichever parameter owns `address` in the given mode,
    /// or of the ungated owner. Used to track linked mode-switch writes.
    pub fn apply_linked_write(&mut self, address: Address, value: u8) -> Option<String> {
        let index = self
            .params
            .iter()
            .position(|p| p.address() == Some(address) && p.mode().is_none())?;
        let param = &mut self.params[index];
        let stored = param.range().clamp(value);
        param.store(stored);
        Some(param.key().to_string())
    }

    /// Mark every value as no longer confirmed by the hardware.
    pub fn mark_unsynced(&mut self) {
        for param in &mut self.params {
            param.forget();
        }
    }

    /// Key `step` positions away from `key` in registration order, wrapping around.
    pub fn neighbor(&self, key: &str, step: isize) -> Option<&str> {
        let len = isize::try_from(self.params.len()).ok()?;
        if len == 0 {
            return None;
        }
        let current = isize::try_from(*self.index.get(key)?).ok()?;
        let next = (current + step).rem_euclid(len);
        usize::try_from(next)
            .ok()
            .map(|i| self.params[i].key())
    }

    /// Serialize the table back to JSON definitions.
    pub fn to_json(&self) -> Result<String> {
        let table = ParameterTable {
            parameters: self.params.iter().map(Parameter::to_def).collect(),
        };
        Ok(serde_json::to_string_pretty(&table)?)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn get_mut(&mut self, key: &str) -> Result<&mut Parameter> {
        match self.index.get(key) {
            Some(&i) => Ok(&mut self.params[i]),
            None => Err(RegistryError::UnknownParameter(key.to_string())),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
