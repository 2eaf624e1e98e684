//! The host transport seam
//!
//! A [`TransportClient`] performs exactly one concrete call per method
//! invocation. Retrying, fallback and timeouts are handled by the caller.

use async_trait::async_trait;
use doorlock_protocol::{
    AttributeDescriptor, Channel, CommandDescriptor, ServiceId, WriteDescriptor,
};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

/// Failure of a single transport call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport call timed out")]
    Timeout,

    #[error("Service not available: {0}")]
    ServiceUnavailable(String),

    #[error("Call rejected: {0}")]
    Rejected(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

/// One host able to reach Zigbee clusters through named services
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Issue a cluster command through `channel`
    async fn send_command(
        &self,
        channel: &Channel,
        descriptor: &CommandDescriptor,
    ) -> Result<(), TransportError>;

    /// Read one attribute through `channel`, returning its raw value
    async fn read_attribute(
        &self,
        channel: &Channel,
        descriptor: &AttributeDescriptor,
    ) -> Result<Value, TransportError>;

    /// Write one attribute through `channel`
    async fn write_attribute(
        &self,
        channel: &Channel,
        descriptor: &WriteDescriptor,
    ) -> Result<(), TransportError>;

    /// Services currently registered on the host
    async fn list_available_services(&self) -> Result<HashSet<ServiceId>, TransportError>;
}
