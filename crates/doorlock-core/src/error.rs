//! Error types for the lock core

use crate::transport::TransportError;
use doorlock_protocol::{Channel, DeviceAddress, ProtocolError, Purpose};
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a single attempt on a channel failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// The transport call did not complete in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The lock answered with a value outside of its range
    #[error("Invalid value: {0}")]
    InvalidValue(ProtocolError),
}

impl AttemptError {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::InvalidValue(_) => "invalid_value",
        }
    }
}

impl Serialize for AttemptError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("AttemptError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Why one candidate channel was given up on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptFailure {
    pub channel: Channel,
    pub attempts: u32,
    /// Error of the last failed attempt
    pub error: AttemptError,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed {} time(s): {}",
            self.channel, self.attempts, self.error
        )
    }
}

/// Errors surfaced by the lock core
#[derive(Error, Debug)]
pub enum LockError {
    /// Malformed device address supplied by the caller
    #[error("Invalid address: {0}")]
    InvalidAddress(ProtocolError),

    /// Value outside of its semantic range
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Report for an attribute the lock does not expose
    #[error("Unknown attribute {attribute_id:#06x} on cluster {cluster_id:#06x}")]
    UnknownAttribute { cluster_id: u16, attribute_id: u16 },

    /// The resolver produced zero candidates
    #[error("No channel available for {purpose} on {address}")]
    NoChannelAvailable {
        address: DeviceAddress,
        purpose: Purpose,
    },

    /// Every candidate failed after all retries
    #[error(
        "All channels exhausted for {purpose} on {address} ({} candidate(s) tried)",
        failures.len()
    )]
    AllChannelsExhausted {
        address: DeviceAddress,
        purpose: Purpose,
        failures: Vec<AttemptFailure>,
    },

    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceAddress),

    /// IO error (persistence)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ProtocolError> for LockError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidAddress { .. } => Self::InvalidAddress(err),
            ProtocolError::UnknownAttribute {
                cluster_id,
                attribute_id,
            } => Self::UnknownAttribute {
                cluster_id,
                attribute_id,
            },
            other => Self::InvalidValue(other.to_string()),
        }
    }
}
