//! IEEE address normalization

use crate::types::ProtocolError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of hex digits in an IEEE (EUI-64) address
pub const IEEE_HEX_DIGITS: usize = 16;

/// A 64-bit Zigbee IEEE address.
///
/// Bytes are kept in the order they are written, most significant first, so
/// `aa:bb:cc:dd:ee:ff:00:11` is stored as `[0xaa, 0xbb, .., 0x11]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress([u8; 8]);

impl DeviceAddress {
    /// Create an address from its bytes (most significant first)
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Normalize any accepted textual form into an address.
    ///
    /// Accepted forms are colon separated octets, a bare 16 digit hex
    /// string, and a `0x` prefixed hex string. Every non-hex character is
    /// dropped. An odd digit count is padded with one trailing zero nibble;
    /// anything that is still not 16 digits is rejected.
    pub fn normalize(raw: &str) -> Result<Self, ProtocolError> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        let mut digits: Vec<u8> = body
            .chars()
            .filter_map(|c| c.to_digit(16))
            .map(|d| d as u8)
            .collect();

        if digits.len() != IEEE_HEX_DIGITS && digits.len() % 2 != 0 {
            tracing::warn!(
                "IEEE address {:?} has odd length ({}), padding with 0",
                raw,
                digits.len()
            );
            digits.push(0);
        }

        if digits.len() != IEEE_HEX_DIGITS {
            return Err(ProtocolError::InvalidAddress {
                input: raw.to_string(),
                expected: IEEE_HEX_DIGITS,
                actual: digits.len(),
            });
        }

        let mut bytes = [0u8; 8];
        for (byte, pair) in bytes.iter_mut().zip(digits.chunks_exact(2)) {
            *byte = (pair[0] << 4) | pair[1];
        }
        Ok(Self(bytes))
    }

    /// Raw address bytes (most significant first)
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Canonical form: lowercase colon separated octets
    #[must_use]
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for DeviceAddress {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::normalize(&raw).map_err(serde::de::Error::custom)
    }
}
