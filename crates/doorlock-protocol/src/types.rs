//! Common types used throughout the protocol

use thiserror::Error;

/// Protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid IEEE address {input:?}: expected {expected} hex digits, got {actual}")]
    InvalidAddress {
        input: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid value for {attribute}: {value} ({reason})")]
    InvalidValue {
        attribute: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("Unexpected value type for {attribute}: {value}")]
    UnexpectedType {
        attribute: &'static str,
        value: String,
    },

    #[error("Unknown attribute {attribute_id:#06x} on cluster {cluster_id:#06x}")]
    UnknownAttribute { cluster_id: u16, attribute_id: u16 },

    #[error("Unknown service: {0}")]
    UnknownService(String),
}
