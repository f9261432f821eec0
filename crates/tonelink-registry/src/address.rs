use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A 4-byte hardware parameter address.
///
/// Every byte is a 7-bit SysEx data byte. The text form is four hex octets,
/// either space-separated (`"20 00 00 04"`) or packed (`"20000004"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 4]);

impl Address {
    /// Create an address from its four bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// The raw address bytes.
    pub const fn bytes(&self) -> [u8; 4] {
        self.0
    }

    /// True when every byte fits in a SysEx data byte.
    pub fn is_sysex_safe(&self) -> bool {
        self.0.iter().all(|b| *b < 0x80)
    }
}

impl From<[u8; 4]> for Address {
    fn from(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a:02X} {b:02X} {c:02X} {d:02X}")
    }
}

/// Error returned when an address string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address '{0}' (expected four hex octets, e.g. \"20 00 00 04\")")]
pub struct ParseAddressError(String);

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let packed: String = hex.chars().filter(|c| !c.is_whitespace()).collect();

        if packed.len() != 8 || !packed.is_ascii() {
            return Err(ParseAddressError(s.to_string()));
        }

        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&packed[i * 2..i * 2 + 2], 16)
                .map_err(|_| ParseAddressError(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
