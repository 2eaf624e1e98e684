//! Push ingress for attribute reports
//!
//! Reports are decoded with the same rules as polled reads and written
//! straight to the store, with no transport round trip.

use crate::error::LockError;
use crate::store::DeviceStateStore;
use chrono::{DateTime, Utc};
use doorlock_protocol::{Attribute, DeviceAddress};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// An attribute report pushed by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeReport {
    pub address: DeviceAddress,
    pub cluster_id: u16,
    pub attribute_id: u16,
    pub value: Value,
    /// When the host observed the report
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Applies pushed reports to the state store
#[derive(Clone)]
pub struct EventListener {
    store: Arc<DeviceStateStore>,
}

impl EventListener {
    #[must_use]
    pub fn new(store: Arc<DeviceStateStore>) -> Self {
        Self { store }
    }

    /// Decode and store one report; returns how many entries were applied
    pub fn handle_report(&self, report: &AttributeReport) -> Result<usize, LockError> {
        let attribute = Attribute::from_ids(report.cluster_id, report.attribute_id).ok_or(
            LockError::UnknownAttribute {
                cluster_id: report.cluster_id,
                attribute_id: report.attribute_id,
            },
        )?;
        if !self.store.is_tracked(&report.address) {
            return Err(LockError::DeviceNotFound(report.address));
        }

        let entries = attribute.decode(&report.value)?;
        let applied = self
            .store
            .apply(&report.address, entries, report.timestamp);
        tracing::debug!(
            "Report {} for {}: {} entr(y/ies) applied",
            attribute,
            report.address,
            applied
        );
        Ok(applied)
    }

}
