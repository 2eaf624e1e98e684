//! Channels: concrete (endpoint, cluster, service) paths to a lock capability

use crate::cluster::id;
use crate::types::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Host service domains able to reach a Zigbee cluster, in priority order
pub const SERVICE_DOMAINS: [&str; 2] = ["zha", "zigbee"];

/// Host service issuing a cluster command
pub const ISSUE_COMMAND: &str = "issue_zigbee_cluster_command";
/// Host service reading a cluster attribute
pub const GET_ATTRIBUTE: &str = "get_zigbee_cluster_attribute";
/// Host service writing a cluster attribute
pub const SET_ATTRIBUTE: &str = "set_zigbee_cluster_attribute";

/// A host service identifier in `domain.service` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceId {
    domain: String,
    service: String,
}

impl ServiceId {
    #[must_use]
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
        }
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.service)
    }
}

impl FromStr for ServiceId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((domain, service)) if !domain.is_empty() && !service.is_empty() => {
                Ok(Self::new(domain, service))
            }
            _ => Err(ProtocolError::UnknownService(s.to_string())),
        }
    }
}

impl TryFrom<String> for ServiceId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ServiceId> for String {
    fn from(value: ServiceId) -> Self {
        value.to_string()
    }
}

/// What a channel is used for. Each purpose resolves independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    /// Door Lock cluster commands (lock, unlock, PIN management)
    LockCommand,
    /// Door Lock cluster attribute reads
    LockAttribute,
    /// Door Lock cluster attribute writes (configuration)
    LockAttributeWrite,
    /// Power Configuration cluster attribute reads
    PowerAttribute,
}

impl Purpose {
    pub const ALL: [Purpose; 4] = [
        Purpose::LockCommand,
        Purpose::LockAttribute,
        Purpose::LockAttributeWrite,
        Purpose::PowerAttribute,
    ];

    /// Cluster this purpose talks to
    #[must_use]
    pub const fn cluster_id(self) -> u16 {
        match self {
            Self::LockCommand | Self::LockAttribute | Self::LockAttributeWrite => id::DOOR_LOCK,
            Self::PowerAttribute => id::POWER_CONFIG,
        }
    }

    /// Service name (without domain) able to carry this purpose
    #[must_use]
    pub const fn service_name(self) -> &'static str {
        match self {
            Self::LockCommand => ISSUE_COMMAND,
            Self::LockAttribute | Self::PowerAttribute => GET_ATTRIBUTE,
            Self::LockAttributeWrite => SET_ATTRIBUTE,
        }
    }

    /// Known services for this purpose, highest priority first
    #[must_use]
    pub fn candidate_services(self) -> Vec<ServiceId> {
        SERVICE_DOMAINS
            .iter()
            .map(|domain| ServiceId::new(*domain, self.service_name()))
            .collect()
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LockCommand => "lock_command",
            Self::LockAttribute => "lock_attribute",
            Self::LockAttributeWrite => "lock_attribute_write",
            Self::PowerAttribute => "power_attribute",
        };
        f.write_str(name)
    }
}

/// One concrete way to reach a cluster on a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub endpoint: u8,
    pub cluster_id: u16,
    pub service: ServiceId,
}

impl Channel {
    #[must_use]
    pub fn new(endpoint: u8, cluster_id: u16, service: ServiceId) -> Self {
        Self {
            endpoint,
            cluster_id,
            service,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ep{}/{:#06x}/{}",
            self.endpoint, self.cluster_id, self.service
        )
    }
}
