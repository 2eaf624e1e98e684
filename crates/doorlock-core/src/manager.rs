//! Lock manager
//!
//! The facade presentation code talks to. It wires the resolver, executor,
//! reader, store, polling scheduler and report listener together, keeps
//! the device registry and persists devices and learned channels.

use crate::cache::{ChannelCache, ResolvedChannel};
use crate::config::{PollIntervals, RetryPolicy};
use crate::device::{DeviceHints, DeviceRegistry, LockDevice};
use crate::error::LockError;
use crate::executor::{CommandExecutor, CommandRequest, Delivery, WriteRequest};
use crate::listener::{AttributeReport, EventListener};
use crate::persistence::{self, StoredLocks};
use crate::polling::{PollGroup, PollingScheduler};
use crate::reader::{AttributeReader, AttributeRequest, AttributeReading};
use crate::resolver::TransportResolver;
use crate::store::{DeviceStateStore, StateEntry, StateEvent};
use crate::transport::TransportClient;
use chrono::Utc;
use doorlock_protocol::cluster::FALLBACK_ENDPOINTS;
use doorlock_protocol::{
    Attribute, Channel, DeviceAddress, DoorLockCommand, LockState, Purpose, SoundVolume,
    StateKey, StateValue,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify};

/// PIN codes are 4 to 10 digits
const PIN_LENGTH: std::ops::RangeInclusive<usize> = 4..=10;

/// Manager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub retry: RetryPolicy,
    pub poll: PollIntervals,
    pub fallback_endpoints: Vec<u8>,
    /// Start every poll group when a device is registered
    pub auto_poll: bool,
    /// Where devices and learned channels are saved
    pub data_path: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll: PollIntervals::default(),
            fallback_endpoints: FALLBACK_ENDPOINTS.to_vec(),
            auto_poll: true,
            data_path: None,
        }
    }
}

/// Learned channel and candidate order of one purpose
#[derive(Debug, Clone, Serialize)]
pub struct PurposeChannels {
    pub learned: Option<ResolvedChannel>,
    pub candidates: Vec<Channel>,
}

/// Connection diagnostics for one device
#[derive(Debug, Clone, Serialize)]
pub struct ChannelReport {
    pub address: DeviceAddress,
    pub purposes: BTreeMap<Purpose, PurposeChannels>,
}

/// Outcome of one attribute during a refresh
#[derive(Debug, Clone, Serialize)]
pub struct RefreshResult {
    pub attribute: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a command sent by id
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub command: &'static str,
    pub command_id: u8,
    pub channel: Channel,
    /// Transport calls made, failed ones included
    pub attempts: u32,
}

/// Facade over the lock core
pub struct LockManager {
    registry: DeviceRegistry,
    cache: Arc<ChannelCache>,
    store: Arc<DeviceStateStore>,
    executor: Arc<CommandExecutor>,
    reader: Arc<AttributeReader>,
    scheduler: PollingScheduler,
    listener: EventListener,
    /// Signalled when something worth saving changed
    dirty: Arc<Notify>,
    /// Serializes writers of the data file
    save_lock: Mutex<()>,
    config: ManagerConfig,
}

impl LockManager {
    /// Build a manager without loading or saving anything
    #[must_use]
    pub fn new(transport: Arc<dyn TransportClient>, config: ManagerConfig) -> Self {
        let cache = Arc::new(ChannelCache::new());
        let store = Arc::new(DeviceStateStore::new());
        let resolver = TransportResolver::new(
            Arc::clone(&cache),
            config.fallback_endpoints.clone(),
            config.retry.attempt_timeout,
        );
        let executor = Arc::new(CommandExecutor::new(
            transport,
            resolver,
            Arc::clone(&cache),
            config.retry,
        ));
        let reader = Arc::new(AttributeReader::new(
            Arc::clone(&executor),
            Arc::clone(&store),
        ));

        Self {
            registry: DeviceRegistry::new(),
            dirty: cache.changes(),
            save_lock: Mutex::new(()),
            scheduler: PollingScheduler::new(Arc::clone(&reader)),
            listener: EventListener::new(Arc::clone(&store)),
            cache,
            store,
            executor,
            reader,
            config,
        }
    }

    /// Build a manager, restore persisted locks and save changes in the background
    pub async fn start(transport: Arc<dyn TransportClient>, config: ManagerConfig) -> Arc<Self> {
        let manager = Arc::new(Self::new(transport, config));

        if let Some(path) = &manager.config.data_path {
            let stored = persistence::load_locks(path).await;
            for device in &stored.devices {
                manager.cache.track(device.address);
            }
            let dropped = manager.cache.restore(stored.channels);
            if dropped > 0 {
                tracing::warn!("Ignored {} learned channel(s) of unknown locks", dropped);
            }
            for device in stored.devices {
                manager.add_device(device);
            }
            manager.spawn_persister();
        }
        manager
    }

    /// Save whenever the registry or the channel cache changes
    fn spawn_persister(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let dirty = Arc::clone(&self.dirty);

        tokio::spawn(async move {
            loop {
                dirty.notified().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = manager.save().await {
                    tracing::warn!("Failed to save locks: {}", e);
                }
            }
        });
    }

    /// Write devices and learned channels to the data file
    pub async fn save(&self) -> Result<(), LockError> {
        let Some(path) = &self.config.data_path else {
            return Ok(());
        };
        let _guard = self.save_lock.lock().await;
        let stored = StoredLocks {
            devices: self.registry.list(),
            channels: self.cache.snapshot(),
        };
        persistence::save_locks(path, &stored).await
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.store.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // ----- registration -----

    /// Register a lock (host "device added" callback)
    pub fn register_device(
        &self,
        raw_address: &str,
        hints: DeviceHints,
    ) -> Result<LockDevice, LockError> {
        let address = DeviceAddress::normalize(raw_address)?;
        let device = LockDevice::new(address, hints);
        self.add_device(device.clone());
        self.dirty.notify_one();
        Ok(device)
    }

    fn add_device(&self, device: LockDevice) {
        let address = device.address;
        let hints = device.endpoint_hints().to_vec();
        let is_new = self.registry.upsert(device);
        self.store.track(address);
        self.cache.track(address);

        if is_new {
            tracing::info!("Registered lock {}", address);
            self.store.notify(StateEvent::DeviceAdded { address });
        } else {
            tracing::info!("Updated lock {}", address);
        }

        if self.config.auto_poll {
            for group in PollGroup::ALL {
                let interval = group.interval(&self.config.poll);
                if let Err(e) = self.scheduler.start(address, hints.clone(), group, interval) {
                    tracing::warn!("Not polling {} for {}: {}", group, address, e);
                }
            }
        }
    }

    /// Forget a lock (host "device removed" callback)
    pub fn deregister_device(&self, raw_address: &str) -> Result<LockDevice, LockError> {
        let device = self.device(raw_address)?;
        let address = device.address;

        self.scheduler.stop(&address);
        self.registry.remove(&address);
        self.cache.remove_device(&address);
        self.store.remove_device(&address);
        self.store.notify(StateEvent::DeviceRemoved { address });
        self.dirty.notify_one();

        tracing::info!("Deregistered lock {}", address);
        Ok(device)
    }

    #[must_use]
    pub fn devices(&self) -> Vec<LockDevice> {
        self.registry.list()
    }

    /// Look up a registered lock by any accepted address form
    pub fn device(&self, raw_address: &str) -> Result<LockDevice, LockError> {
        let address = DeviceAddress::normalize(raw_address)?;
        self.registry
            .get(&address)
            .ok_or(LockError::DeviceNotFound(address))
    }

    // ----- commands -----

    pub async fn lock(&self, raw_address: &str) -> Result<(), LockError> {
        self.lock_command(raw_address, DoorLockCommand::LockDoor).await
    }

    pub async fn unlock(&self, raw_address: &str) -> Result<(), LockError> {
        self.lock_command(raw_address, DoorLockCommand::UnlockDoor).await
    }

    async fn lock_command(
        &self,
        raw_address: &str,
        command: DoorLockCommand,
    ) -> Result<(), LockError> {
        let device = self.device(raw_address)?;
        let request =
            CommandRequest::new(device.address, device.endpoint_hints().to_vec(), command);
        self.send(&request).await?;
        Ok(())
    }

    /// Send any Door Lock client command by id through the fallback chain
    pub async fn send_command(
        &self,
        raw_address: &str,
        command_id: u8,
        params: Map<String, Value>,
    ) -> Result<CommandOutcome, LockError> {
        let device = self.device(raw_address)?;
        let command = DoorLockCommand::try_from(command_id)?;
        let mut request =
            CommandRequest::new(device.address, device.endpoint_hints().to_vec(), command);
        request.params = params;

        let delivery = self.send(&request).await?;
        Ok(CommandOutcome {
            command: command.name(),
            command_id: command.id(),
            channel: delivery.channel,
            attempts: delivery.attempts,
        })
    }

    async fn send(&self, request: &CommandRequest) -> Result<Delivery<()>, LockError> {
        let delivery = self.executor.execute(request).await?;

        // The transport does not confirm the new state
        let resulting = match request.command {
            DoorLockCommand::LockDoor => Some(LockState::Locked),
            DoorLockCommand::UnlockDoor => Some(LockState::Unlocked),
            _ => None,
        };
        if let Some(state) = resulting {
            self.store.set(
                &request.address,
                StateKey::LockState,
                StateValue::Int(state as i64),
                Utc::now(),
            );
        }
        tracing::info!(
            "{} sent to {} via {}",
            request.command.name(),
            request.address,
            delivery.channel
        );
        Ok(delivery)
    }

    pub async fn set_pin_code(
        &self,
        raw_address: &str,
        user_id: u16,
        pin: &str,
    ) -> Result<(), LockError> {
        if !PIN_LENGTH.contains(&pin.len()) || !pin.chars().all(|c| c.is_ascii_digit()) {
            return Err(LockError::InvalidValue(format!(
                "PIN code must be {} to {} digits",
                PIN_LENGTH.start(),
                PIN_LENGTH.end()
            )));
        }
        let device = self.device(raw_address)?;
        let request = CommandRequest::new(
            device.address,
            device.endpoint_hints().to_vec(),
            DoorLockCommand::SetPinCode,
        )
        .with_param("user_id", user_id)
        .with_param("user_status", 1)
        .with_param("user_type", 0)
        .with_param("pin_code", pin);

        self.executor.execute(&request).await?;
        tracing::info!("Set PIN code for user {} on {}", user_id, device.address);
        Ok(())
    }

    pub async fn clear_pin_code(&self, raw_address: &str, user_id: u16) -> Result<(), LockError> {
        let device = self.device(raw_address)?;
        let request = CommandRequest::new(
            device.address,
            device.endpoint_hints().to_vec(),
            DoorLockCommand::ClearPinCode,
        )
        .with_param("user_id", user_id);

        self.executor.execute(&request).await?;
        tracing::info!("Cleared PIN code for user {} on {}", user_id, device.address);
        Ok(())
    }

    pub async fn clear_all_pin_codes(&self, raw_address: &str) -> Result<(), LockError> {
        let device = self.device(raw_address)?;
        let request = CommandRequest::new(
            device.address,
            device.endpoint_hints().to_vec(),
            DoorLockCommand::ClearAllPinCodes,
        );

        self.executor.execute(&request).await?;
        tracing::info!("Cleared all PIN codes on {}", device.address);
        Ok(())
    }

    // ----- state -----

    pub fn get_state(
        &self,
        raw_address: &str,
        key: StateKey,
    ) -> Result<Option<StateEntry>, LockError> {
        let device = self.device(raw_address)?;
        Ok(self.store.get(&device.address, key))
    }

    /// Every known entry of a device
    pub fn state(&self, raw_address: &str) -> Result<BTreeMap<StateKey, StateEntry>, LockError> {
        let device = self.device(raw_address)?;
        Ok(self.store.snapshot(&device.address).unwrap_or_default())
    }

    /// Push ingress (host attribute report)
    pub fn on_attribute_report(&self, report: &AttributeReport) -> Result<usize, LockError> {
        self.listener.handle_report(report)
    }

    /// Read every polled attribute once
    pub async fn refresh(&self, raw_address: &str) -> Result<Vec<RefreshResult>, LockError> {
        let device = self.device(raw_address)?;
        let mut results = Vec::new();

        for group in PollGroup::ALL {
            for attribute in group.attributes() {
                let error = self
                    .read(&device, *attribute)
                    .await
                    .err()
                    .map(|e| e.to_string());
                results.push(RefreshResult {
                    attribute: attribute.name(),
                    error,
                });
            }
        }
        Ok(results)
    }

    async fn read(
        &self,
        device: &LockDevice,
        attribute: Attribute,
    ) -> Result<AttributeReading, LockError> {
        let request =
            AttributeRequest::new(device.address, device.endpoint_hints().to_vec(), attribute);
        self.reader.read(&request).await
    }

    async fn write(
        &self,
        device: &LockDevice,
        attribute: Attribute,
        value: Value,
    ) -> Result<(), LockError> {
        let request = WriteRequest {
            address: device.address,
            endpoint_hints: device.endpoint_hints().to_vec(),
            attribute,
            value: value.clone(),
        };
        self.executor.write(&request).await?;

        // Written values are applied like a fresh read
        let entries = attribute.decode(&value)?;
        self.store.apply(&device.address, entries, Utc::now());
        Ok(())
    }

    // ----- polling -----

    pub fn start_polling(
        &self,
        raw_address: &str,
        group: PollGroup,
        interval_secs: u64,
    ) -> Result<(), LockError> {
        let device = self.device(raw_address)?;
        self.scheduler.start(
            device.address,
            device.endpoint_hints().to_vec(),
            group,
            Duration::from_secs(interval_secs),
        )
    }

    /// Stop every poll group of a device; returns how many were running
    pub fn stop_polling(&self, raw_address: &str) -> Result<usize, LockError> {
        let device = self.device(raw_address)?;
        Ok(self.scheduler.stop(&device.address))
    }

    pub fn polling_groups(&self, raw_address: &str) -> Result<Vec<PollGroup>, LockError> {
        let device = self.device(raw_address)?;
        Ok(self.scheduler.active(&device.address))
    }

    // ----- configuration -----

    /// Auto relock time in seconds, read from the lock
    pub async fn auto_relock_time(&self, raw_address: &str) -> Result<u32, LockError> {
        let device = self.device(raw_address)?;
        let reading = self.read(&device, Attribute::AutoRelockTime).await?;
        reading
            .get(StateKey::AutoRelockTime)
            .and_then(StateValue::as_i64)
            .and_then(|secs| u32::try_from(secs).ok())
            .ok_or_else(|| LockError::InvalidValue("auto relock time missing".into()))
    }

    pub async fn set_auto_relock_time(
        &self,
        raw_address: &str,
        secs: u32,
    ) -> Result<(), LockError> {
        let device = self.device(raw_address)?;
        self.write(&device, Attribute::AutoRelockTime, Value::from(secs))
            .await?;
        tracing::info!("Auto relock time of {} set to {}s", device.address, secs);
        Ok(())
    }

    /// Sound volume, read from the lock
    pub async fn sound_volume(&self, raw_address: &str) -> Result<SoundVolume, LockError> {
        let device = self.device(raw_address)?;
        let reading = self.read(&device, Attribute::SoundVolume).await?;
        let raw = reading
            .get(StateKey::SoundVolume)
            .and_then(StateValue::as_i64)
            .ok_or_else(|| LockError::InvalidValue("sound volume missing".into()))?;
        Ok(SoundVolume::try_from(raw)?)
    }

    pub async fn set_sound_volume(
        &self,
        raw_address: &str,
        volume: SoundVolume,
    ) -> Result<(), LockError> {
        let device = self.device(raw_address)?;
        self.write(&device, Attribute::SoundVolume, Value::from(volume as u8))
            .await?;
        tracing::info!("Sound volume of {} set to {:?}", device.address, volume);
        Ok(())
    }

    // ----- diagnostics -----

    /// Learned channels and current candidate order per purpose
    pub async fn channel_report(&self, raw_address: &str) -> Result<ChannelReport, LockError> {
        let device = self.device(raw_address)?;
        let resolver = self.executor.resolver();
        let transport = self.executor.transport();

        let mut purposes = BTreeMap::new();
        for purpose in Purpose::ALL {
            let candidates = match resolver
                .resolve(transport.as_ref(), &device.address, device.endpoint_hints(), purpose)
                .await
            {
                Ok(candidates) => candidates,
                Err(LockError::NoChannelAvailable { .. }) => Vec::new(),
                Err(e) => return Err(e),
            };
            purposes.insert(
                purpose,
                PurposeChannels {
                    learned: self.cache.get(&device.address, purpose),
                    candidates,
                },
            );
        }

        Ok(ChannelReport {
            address: device.address,
            purposes,
        })
    }

    /// Stop all polling
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}
