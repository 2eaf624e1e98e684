//! Registered lock devices

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use doorlock_protocol::DeviceAddress;
use serde::{Deserialize, Serialize};

/// Registration hints supplied by the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHints {
    /// Endpoints to try first, primary endpoint first
    #[serde(default)]
    pub endpoints: Vec<u8>,
    /// User-assigned friendly name
    #[serde(default)]
    pub name: Option<String>,
}

impl DeviceHints {
    #[must_use]
    pub fn with_primary(endpoint: u8) -> Self {
        Self {
            endpoints: vec![endpoint],
            name: None,
        }
    }
}

/// A registered lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDevice {
    /// IEEE address (EUI-64)
    pub address: DeviceAddress,
    #[serde(flatten)]
    pub hints: DeviceHints,
    pub registered_at: DateTime<Utc>,
}

impl LockDevice {
    #[must_use]
    pub fn new(address: DeviceAddress, hints: DeviceHints) -> Self {
        Self {
            address,
            hints,
            registered_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn endpoint_hints(&self) -> &[u8] {
        &self.hints.endpoints
    }

    /// Friendly name, or the address when none was given
    #[must_use]
    pub fn display_name(&self) -> String {
        self.hints
            .name
            .clone()
            .unwrap_or_else(|| self.address.to_string())
    }
}

/// Known locks keyed by address
#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<DeviceAddress, LockDevice>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a device; returns true if it was not known
    pub fn upsert(&self, device: LockDevice) -> bool {
        self.devices.insert(device.address, device).is_none()
    }

    pub fn remove(&self, address: &DeviceAddress) -> Option<LockDevice> {
        self.devices.remove(address).map(|(_, v)| v)
    }

    #[must_use]
    pub fn get(&self, address: &DeviceAddress) -> Option<LockDevice> {
        self.devices.get(address).map(|r| r.value().clone())
    }

    /// All devices ordered by address
    #[must_use]
    pub fn list(&self) -> Vec<LockDevice> {
        let mut all: Vec<_> = self.devices.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|d| d.address);
        all
    }
}
