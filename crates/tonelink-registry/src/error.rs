use crate::address::Address;

/// Errors that can occur while building or updating a parameter registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The definition file could not be loaded.
    #[error("failed to load parameter table: {0}")]
    LoadFailed(String),

    /// The definitions are not valid JSON for a parameter table.
    #[error("invalid parameter table: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A parameter key was registered twice.
    #[error("duplicate parameter key '{0}'")]
    DuplicateKey(String),

    /// Two parameters claim the same address without disjoint mode gates.
    #[error("address {address} already owned by '{existing}' (while registering '{key}')")]
    DuplicateAddress {
        address: Address,
        existing: String,
        key: String,
    },

    /// A definition is internally inconsistent.
    #[error("invalid definition for '{key}': {reason}")]
    InvalidDefinition { key: String, reason: String },

    /// No parameter with the given key exists.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    /// A value lies outside the parameter's range.
    #[error("value {value} out of range for '{key}' ({min}..={max})")]
    OutOfRange {
        key: String,
        value: u8,
        min: u8,
        max: u8,
    },
}

pub type Result<T> = std::result::Result<T, RegistryError>;
