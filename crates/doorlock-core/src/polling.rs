//! Periodic attribute polling
//!
//! One task per device and attribute group. Each tick reads every attribute
//! of the group, then sleeps the fixed interval whatever the outcome.

use crate::config::PollIntervals;
use crate::error::LockError;
use crate::reader::{AttributeReader, AttributeRequest};
use dashmap::DashMap;
use doorlock_protocol::{Attribute, DeviceAddress, ProtocolError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Monitored attribute groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollGroup {
    LockState,
    Battery,
    Diagnostics,
}

impl PollGroup {
    pub const ALL: [PollGroup; 3] = [
        PollGroup::LockState,
        PollGroup::Battery,
        PollGroup::Diagnostics,
    ];

    /// Attributes read on every tick
    #[must_use]
    pub const fn attributes(self) -> &'static [Attribute] {
        match self {
            Self::LockState => &[Attribute::LockState, Attribute::DoorState],
            Self::Battery => &[Attribute::BatteryPercentage, Attribute::BatteryVoltage],
            Self::Diagnostics => &[Attribute::Diagnostics],
        }
    }

    #[must_use]
    pub fn interval(self, intervals: &PollIntervals) -> Duration {
        match self {
            Self::LockState => intervals.lock_state,
            Self::Battery => intervals.battery,
            Self::Diagnostics => intervals.diagnostics,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LockState => "lock_state",
            Self::Battery => "battery",
            Self::Diagnostics => "diagnostics",
        }
    }
}

impl fmt::Display for PollGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollGroup {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| ProtocolError::InvalidValue {
                attribute: "poll_group",
                value: s.to_string(),
                reason: "expected lock_state, battery or diagnostics",
            })
    }
}

/// Owns the polling tasks of every device
pub struct PollingScheduler {
    reader: Arc<AttributeReader>,
    /// Active loops keyed by device and group
    tasks: DashMap<(DeviceAddress, PollGroup), JoinHandle<()>>,
}

impl PollingScheduler {
    #[must_use]
    pub fn new(reader: Arc<AttributeReader>) -> Self {
        Self {
            reader,
            tasks: DashMap::new(),
        }
    }

    /// Start (or restart) one group for a device
    pub fn start(
        &self,
        address: DeviceAddress,
        endpoint_hints: Vec<u8>,
        group: PollGroup,
        interval: Duration,
    ) -> Result<(), LockError> {
        if interval.is_zero() {
            return Err(LockError::InvalidValue(format!(
                "poll interval for {group} must be positive"
            )));
        }

        let reader = Arc::clone(&self.reader);
        let handle = tokio::spawn(async move {
            loop {
                for attribute in group.attributes() {
                    let request =
                        AttributeRequest::new(address, endpoint_hints.clone(), *attribute);
                    if let Err(e) = reader.read(&request).await {
                        tracing::warn!("Poll of {} for {} failed: {}", attribute, address, e);
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });

        // Swapping and aborting under one key keeps concurrent restarts from
        // detaching a loop
        if let Some(previous) = self.tasks.insert((address, group), handle) {
            previous.abort();
        }
        tracing::info!(
            "Polling {} for {} every {}s",
            group,
            address,
            interval.as_secs()
        );
        Ok(())
    }

    pub fn stop_group(&self, address: &DeviceAddress, group: PollGroup) -> bool {
        if let Some((_, handle)) = self.tasks.remove(&(*address, group)) {
            handle.abort();
            tracing::debug!("Stopped {} polling for {}", group, address);
            true
        } else {
            false
        }
    }

    /// Cancel every loop of a device; returns how many were running
    pub fn stop(&self, address: &DeviceAddress) -> usize {
        PollGroup::ALL
            .into_iter()
            .filter(|group| self.stop_group(address, *group))
            .count()
    }

    /// Groups currently polled for a device
    #[must_use]
    pub fn active(&self, address: &DeviceAddress) -> Vec<PollGroup> {
        PollGroup::ALL
            .into_iter()
            .filter(|group| self.tasks.contains_key(&(*address, *group)))
            .collect()
    }

    /// Cancel everything
    pub fn shutdown(&self) {
        self.tasks.retain(|_, handle| {
            handle.abort();
            false
        });
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ChannelCache;
    use crate::config::RetryPolicy;
    use crate::executor::CommandExecutor;
    use crate::resolver::TransportResolver;
    use crate::store::DeviceStateStore;
    use crate::testing::{AttemptKind, FakeTransport};
    use doorlock_protocol::{StateKey, StateValue};
    use serde_json::json;

    fn addr() -> DeviceAddress {
        DeviceAddress::normalize("aa:bb:cc:dd:ee:ff:00:11").unwrap()
    }

    fn scheduler(transport: Arc<FakeTransport>) -> (PollingScheduler, Arc<DeviceStateStore>) {
        let cache = Arc::new(ChannelCache::new());
        cache.track(addr());
        let resolver =
            TransportResolver::new(Arc::clone(&cache), vec![11], Duration::from_secs(10));
        let policy = RetryPolicy {
            attempts: 1,
            ..RetryPolicy::default()
        };
        let executor = Arc::new(CommandExecutor::new(transport, resolver, cache, policy));
        let store = Arc::new(DeviceStateStore::new());
        store.track(addr());
        let reader = Arc::new(AttributeReader::new(executor, Arc::clone(&store)));
        (PollingScheduler::new(reader), store)
    }

    fn reads(transport: &FakeTransport) -> usize {
        transport
            .attempts()
            .iter()
            .filter(|a| matches!(a.kind, AttemptKind::Read(_)))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_fixed_interval() {
        let transport = Arc::new(
            FakeTransport::new()
                .succeed_on(11, "zha")
                .with_value(Attribute::Diagnostics, json!(0xC5A0_1234u32)),
        );
        let (scheduler, store) = scheduler(Arc::clone(&transport));

        scheduler
            .start(addr(), vec![], PollGroup::Diagnostics, Duration::from_secs(120))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(reads(&transport), 1);
        assert_eq!(store.value(&addr(), StateKey::RssiDbm), Some(StateValue::Int(-59)));

        tokio::time::sleep(Duration::from_secs(240)).await;
        assert_eq!(reads(&transport), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_the_loop() {
        // Door state has no value: every tick reads lock_state fine and fails door_state
        let transport = Arc::new(
            FakeTransport::new()
                .succeed_on(11, "zha")
                .with_value(Attribute::LockState, json!(1)),
        );
        let (scheduler, store) = scheduler(Arc::clone(&transport));

        scheduler
            .start(addr(), vec![], PollGroup::LockState, Duration::from_secs(60))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.value(&addr(), StateKey::LockState), Some(StateValue::Int(1)));
        assert!(store.get(&addr(), StateKey::DoorState).is_none());
        assert!(transport
            .attempts()
            .iter()
            .any(|a| a.kind == AttemptKind::Read(0x0003)));
        assert_eq!(scheduler.active(&addr()), vec![PollGroup::LockState]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attribute_failure_still_reads_the_rest() {
        // Lock state has no value, door state does
        let transport = Arc::new(
            FakeTransport::new()
                .succeed_on(11, "zha")
                .with_value(Attribute::DoorState, json!(1)),
        );
        let (scheduler, store) = scheduler(Arc::clone(&transport));

        scheduler
            .start(addr(), vec![], PollGroup::LockState, Duration::from_secs(60))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(store.get(&addr(), StateKey::LockState).is_none());
        assert_eq!(store.value(&addr(), StateKey::DoorState), Some(StateValue::Int(1)));

        let kinds: Vec<AttemptKind> = transport.attempts().iter().map(|a| a.kind).collect();
        assert_eq!(kinds.first(), Some(&AttemptKind::Read(0x0000)));
        assert_eq!(kinds.last(), Some(&AttemptKind::Read(0x0003)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_the_running_loop() {
        let transport = Arc::new(
            FakeTransport::new()
                .succeed_on(11, "zha")
                .with_value(Attribute::Diagnostics, json!(0x1234_5678u32)),
        );
        let (scheduler, _) = scheduler(Arc::clone(&transport));

        for _ in 0..3 {
            scheduler
                .start(addr(), vec![], PollGroup::Diagnostics, Duration::from_millis(20))
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(scheduler.active(&addr()), vec![PollGroup::Diagnostics]);

        assert_eq!(scheduler.stop(&addr()), 1);
        let before = reads(&transport);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(reads(&transport), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_restarts_leave_no_orphans() {
        let transport = Arc::new(
            FakeTransport::new()
                .succeed_on(11, "zha")
                .with_value(Attribute::Diagnostics, json!(0x1234_5678u32)),
        );
        let (scheduler, _) = scheduler(Arc::clone(&transport));
        let scheduler = Arc::new(scheduler);

        let starts: Vec<_> = (0..8)
            .map(|_| {
                let scheduler = Arc::clone(&scheduler);
                tokio::spawn(async move {
                    scheduler
                        .start(addr(), vec![], PollGroup::Diagnostics, Duration::from_millis(5))
                        .unwrap();
                })
            })
            .collect();
        for start in starts {
            start.await.unwrap();
        }

        scheduler.stop(&addr());
        // Let aborted tasks observe cancellation
        tokio::time::sleep(Duration::from_millis(20)).await;
        let before = reads(&transport);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(reads(&transport), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_loops() {
        let transport = Arc::new(
            FakeTransport::new()
                .succeed_on(11, "zha")
                .with_value(Attribute::BatteryPercentage, json!(70))
                .with_value(Attribute::BatteryVoltage, json!(58)),
        );
        let (scheduler, _) = scheduler(Arc::clone(&transport));

        scheduler
            .start(addr(), vec![], PollGroup::Battery, Duration::from_secs(300))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = reads(&transport);
        assert_eq!(before, 2);

        assert_eq!(scheduler.stop(&addr()), 1);
        assert!(scheduler.active(&addr()).is_empty());

        tokio::time::sleep(Duration::from_secs(900)).await;
        assert_eq!(reads(&transport), before);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let (scheduler, _) = scheduler(Arc::new(FakeTransport::new()));
        let err = scheduler
            .start(addr(), vec![], PollGroup::Battery, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidValue(_)));
        assert!(scheduler.active(&addr()).is_empty());
    }

    #[test]
    fn test_group_names() {
        assert_eq!("battery".parse::<PollGroup>().unwrap(), PollGroup::Battery);
        assert!("signal".parse::<PollGroup>().is_err());
        assert_eq!(
            PollGroup::LockState.interval(&PollIntervals::default()),
            Duration::from_secs(60)
        );
    }
}
