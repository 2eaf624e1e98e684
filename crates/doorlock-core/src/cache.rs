//! Learned channel cache
//!
//! Remembers, per device and purpose, the last channel a delivery succeeded
//! on. The resolver puts that channel first; a cached channel that fails
//! all of its retries is forgotten.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use doorlock_protocol::{Channel, DeviceAddress, Purpose};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

/// A learned channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedChannel {
    pub channel: Channel,
    pub learned_at: DateTime<Utc>,
}

/// Flat record used for persistence and reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnedChannel {
    pub address: DeviceAddress,
    pub purpose: Purpose,
    #[serde(flatten)]
    pub resolved: ResolvedChannel,
}

/// Per (address, purpose) cache of working channels.
///
/// Only tracked devices hold entries, so a delivery that finishes after its
/// device was removed cannot bring a channel back.
pub struct ChannelCache {
    devices: DashMap<DeviceAddress, HashMap<Purpose, ResolvedChannel>>,
    /// Signalled whenever the cache content changes
    changed: Arc<Notify>,
}

impl Default for ChannelCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
            changed: Arc::new(Notify::new()),
        }
    }

    /// Change notification, used to schedule persistence
    #[must_use]
    pub fn changes(&self) -> Arc<Notify> {
        Arc::clone(&self.changed)
    }

    /// Accept entries for a device; existing entries are kept
    pub fn track(&self, address: DeviceAddress) {
        self.devices.entry(address).or_default();
    }

    #[must_use]
    pub fn is_tracked(&self, address: &DeviceAddress) -> bool {
        self.devices.contains_key(address)
    }

    #[must_use]
    pub fn get(&self, address: &DeviceAddress, purpose: Purpose) -> Option<ResolvedChannel> {
        self.devices
            .get(address)
            .and_then(|entries| entries.get(&purpose).cloned())
    }

    /// Record a successful channel. Returns true if it was not cached yet;
    /// untracked devices are ignored.
    pub fn learn(&self, address: &DeviceAddress, purpose: Purpose, channel: &Channel) -> bool {
        let Some(mut entries) = self.devices.get_mut(address) else {
            tracing::debug!("Not learning {} channel for untracked {}", purpose, address);
            return false;
        };
        if entries.get(&purpose).is_some_and(|r| r.channel == *channel) {
            return false;
        }
        entries.insert(
            purpose,
            ResolvedChannel {
                channel: channel.clone(),
                learned_at: Utc::now(),
            },
        );
        drop(entries);

        tracing::info!("Learned {} channel for {}: {}", purpose, address, channel);
        self.changed.notify_one();
        true
    }

    /// Forget `channel` for (address, purpose) if it is the cached one
    pub fn invalidate(&self, address: &DeviceAddress, purpose: Purpose, channel: &Channel) -> bool {
        let removed = self.devices.get_mut(address).is_some_and(|mut entries| {
            if entries.get(&purpose).is_some_and(|r| r.channel == *channel) {
                entries.remove(&purpose);
                true
            } else {
                false
            }
        });
        if removed {
            tracing::info!(
                "Invalidated cached {} channel for {}: {}",
                purpose,
                address,
                channel
            );
            self.changed.notify_one();
        }
        removed
    }

    /// Drop every entry of a device and stop tracking it
    pub fn remove_device(&self, address: &DeviceAddress) {
        if let Some((_, entries)) = self.devices.remove(address) {
            if !entries.is_empty() {
                self.changed.notify_one();
            }
        }
    }

    /// Learned channels of one device, ordered by purpose
    #[must_use]
    pub fn for_device(&self, address: &DeviceAddress) -> Vec<(Purpose, ResolvedChannel)> {
        let mut found: Vec<_> = self
            .devices
            .get(address)
            .map(|entries| entries.iter().map(|(p, r)| (*p, r.clone())).collect())
            .unwrap_or_default();
        found.sort_by_key(|(purpose, _)| *purpose);
        found
    }

    /// All entries, for persistence
    #[must_use]
    pub fn snapshot(&self) -> Vec<LearnedChannel> {
        let mut all: Vec<_> = self
            .devices
            .iter()
            .flat_map(|r| {
                let address = *r.key();
                r.value()
                    .iter()
                    .map(|(purpose, resolved)| LearnedChannel {
                        address,
                        purpose: *purpose,
                        resolved: resolved.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        all.sort_by(|a, b| (a.address, a.purpose).cmp(&(b.address, b.purpose)));
        all
    }

    /// Restore persisted entries of tracked devices without signalling a
    /// change. Returns how many were dropped for unknown devices.
    pub fn restore(&self, learned: Vec<LearnedChannel>) -> usize {
        let mut dropped = 0;
        for entry in learned {
            match self.devices.get_mut(&entry.address) {
                Some(mut entries) => {
                    entries.insert(entry.purpose, entry.resolved);
                }
                None => dropped += 1,
            }
        }
        dropped
    }
}
