//! Canonical device state
//!
//! Entries are keyed by device address and symbolic attribute. Concurrent
//! writers are ordered by the timestamp they carry, not by arrival: a write
//! older than the stored entry is dropped. Only tracked (registered) devices
//! accept writes, so a late poll result cannot resurrect a removed device.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use doorlock_protocol::{DeviceAddress, StateKey, StateValue};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::broadcast;

/// A last-known value and when it was observed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateEntry {
    pub value: StateValue,
    pub updated_at: DateTime<Utc>,
}

/// Notifications for presentation consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    StateChanged {
        address: DeviceAddress,
        key: StateKey,
        value: StateValue,
        updated_at: DateTime<Utc>,
    },
    DeviceAdded {
        address: DeviceAddress,
    },
    DeviceRemoved {
        address: DeviceAddress,
    },
}

/// Address keyed state of every registered lock
pub struct DeviceStateStore {
    devices: DashMap<DeviceAddress, HashMap<StateKey, StateEntry>>,
    event_tx: broadcast::Sender<StateEvent>,
}

impl Default for DeviceStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStateStore {
    #[must_use]
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            devices: DashMap::new(),
            event_tx,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn notify(&self, event: StateEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Start accepting writes for a device. Existing entries are kept.
    pub fn track(&self, address: DeviceAddress) {
        self.devices.entry(address).or_default();
    }

    #[must_use]
    pub fn is_tracked(&self, address: &DeviceAddress) -> bool {
        self.devices.contains_key(address)
    }

    /// Drop every entry of a device
    pub fn remove_device(&self, address: &DeviceAddress) -> bool {
        self.devices.remove(address).is_some()
    }

    #[must_use]
    pub fn get(&self, address: &DeviceAddress, key: StateKey) -> Option<StateEntry> {
        self.devices
            .get(address)
            .and_then(|state| state.get(&key).cloned())
    }

    #[must_use]
    pub fn value(&self, address: &DeviceAddress, key: StateKey) -> Option<StateValue> {
        self.get(address, key).map(|e| e.value)
    }

    /// Every entry of a device, ordered by key
    #[must_use]
    pub fn snapshot(&self, address: &DeviceAddress) -> Option<BTreeMap<StateKey, StateEntry>> {
        self.devices
            .get(address)
            .map(|state| state.iter().map(|(k, v)| (*k, v.clone())).collect())
    }

    /// Write one value observed at `at`.
    ///
    /// Returns false if the device is not tracked or a newer value is stored.
    pub fn set(
        &self,
        address: &DeviceAddress,
        key: StateKey,
        value: StateValue,
        at: DateTime<Utc>,
    ) -> bool {
        self.apply(address, vec![(key, value)], at) == 1
    }

    /// Write several values observed at the same instant; returns how many were applied
    pub fn apply(
        &self,
        address: &DeviceAddress,
        entries: Vec<(StateKey, StateValue)>,
        at: DateTime<Utc>,
    ) -> usize {
        let mut changed = Vec::new();
        let mut applied = 0;

        {
            let Some(mut state) = self.devices.get_mut(address) else {
                tracing::debug!("Dropping state for untracked device {}", address);
                return 0;
            };

            for (key, value) in entries {
                let unchanged = match state.get(&key) {
                    Some(existing) if existing.updated_at > at => {
                        tracing::debug!(
                            "Ignoring stale {} for {} ({} < {})",
                            key,
                            address,
                            at,
                            existing.updated_at
                        );
                        continue;
                    }
                    Some(existing) => existing.value == value,
                    None => false,
                };
                if !unchanged {
                    changed.push((key, value.clone()));
                }
                state.insert(
                    key,
                    StateEntry {
                        value,
                        updated_at: at,
                    },
                );
                applied += 1;
            }
        }

        for (key, value) in changed {
            self.notify(StateEvent::StateChanged {
                address: *address,
                key,
                value,
                updated_at: at,
            });
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn addr() -> DeviceAddress {
        DeviceAddress::from_bytes([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00, 0x11])
    }

    #[test]
    fn test_untracked_device_ignored() {
        let store = DeviceStateStore::new();
        assert!(!store.set(&addr(), StateKey::Battery, StateValue::Int(50), Utc::now()));
        assert!(store.get(&addr(), StateKey::Battery).is_none());

        store.track(addr());
        assert!(store.set(&addr(), StateKey::Battery, StateValue::Int(50), Utc::now()));
        assert_eq!(store.value(&addr(), StateKey::Battery), Some(StateValue::Int(50)));
    }

    #[test]
    fn test_newer_timestamp_wins_regardless_of_arrival() {
        let store = DeviceStateStore::new();
        store.track(addr());
        let t1 = Utc::now();
        let t2 = t1 + Duration::seconds(2);

        // Push at T2 lands before the slower poll result from T1
        assert!(store.set(&addr(), StateKey::LockState, StateValue::Int(0), t2));
        assert!(!store.set(&addr(), StateKey::LockState, StateValue::Int(1), t1));

        let entry = store.get(&addr(), StateKey::LockState).unwrap();
        assert_eq!(entry.value, StateValue::Int(0));
        assert_eq!(entry.updated_at, t2);

        // Equal timestamps apply
        assert!(store.set(&addr(), StateKey::LockState, StateValue::Int(1), t2));
    }

    #[tokio::test]
    async fn test_concurrent_writers_converge_on_latest() {
        let store = Arc::new(DeviceStateStore::new());
        store.track(addr());
        let base = Utc::now();

        let mut handles = Vec::new();
        for i in (0..32i64).rev() {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.set(
                    &addr(),
                    StateKey::Rssi,
                    StateValue::Int(i),
                    base + Duration::milliseconds(i),
                );
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.value(&addr(), StateKey::Rssi), Some(StateValue::Int(31)));
    }

    #[tokio::test]
    async fn test_changes_are_broadcast() {
        let store = DeviceStateStore::new();
        store.track(addr());
        let mut rx = store.subscribe();

        let now = Utc::now();
        store.apply(
            &addr(),
            vec![
                (StateKey::Battery, StateValue::Int(80)),
                (StateKey::BatteryLow, StateValue::Bool(false)),
            ],
            now,
        );
        // Same value again: refreshed timestamp, no event
        store.set(&addr(), StateKey::Battery, StateValue::Int(80), now);

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            StateEvent::StateChanged {
                address: addr(),
                key: StateKey::Battery,
                value: StateValue::Int(80),
                updated_at: now,
            }
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            StateEvent::StateChanged {
                key: StateKey::BatteryLow,
                ..
            }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_remove_device_drops_state() {
        let store = DeviceStateStore::new();
        store.track(addr());
        store.set(&addr(), StateKey::Battery, StateValue::Int(50), Utc::now());
        assert!(store.remove_device(&addr()));
        assert!(store.snapshot(&addr()).is_none());
        assert!(!store.set(&addr(), StateKey::Battery, StateValue::Int(51), Utc::now()));
    }
}
