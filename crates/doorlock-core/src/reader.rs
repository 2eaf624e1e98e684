//! Attribute reads with validation
//!
//! A read goes through the same retry and fallback loop as a command. A
//! value that fails validation counts as a failed attempt and never reaches
//! the store.

use crate::error::{AttemptError, LockError};
use crate::executor::{CommandExecutor, Delivery};
use crate::store::DeviceStateStore;
use chrono::{DateTime, Utc};
use doorlock_protocol::{Attribute, AttributeDescriptor, DeviceAddress, StateKey, StateValue};
use std::sync::Arc;

/// One attribute read request
#[derive(Debug, Clone)]
pub struct AttributeRequest {
    pub address: DeviceAddress,
    pub endpoint_hints: Vec<u8>,
    pub attribute: Attribute,
}

impl AttributeRequest {
    #[must_use]
    pub fn new(address: DeviceAddress, endpoint_hints: Vec<u8>, attribute: Attribute) -> Self {
        Self {
            address,
            endpoint_hints,
            attribute,
        }
    }
}

/// Decoded entries of a successful read
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeReading {
    pub entries: Vec<(StateKey, StateValue)>,
    /// When the transport returned the value
    pub observed_at: DateTime<Utc>,
}

impl AttributeReading {
    #[must_use]
    pub fn get(&self, key: StateKey) -> Option<&StateValue> {
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }
}

/// Reads attributes and records them in the state store
pub struct AttributeReader {
    executor: Arc<CommandExecutor>,
    store: Arc<DeviceStateStore>,
}

impl AttributeReader {
    #[must_use]
    pub fn new(executor: Arc<CommandExecutor>, store: Arc<DeviceStateStore>) -> Self {
        Self { executor, store }
    }

    pub async fn read(&self, request: &AttributeRequest) -> Result<AttributeReading, LockError> {
        let transport = Arc::clone(self.executor.transport());
        let address = request.address;
        let attribute = request.attribute;

        let Delivery { value: reading, .. } = self
            .executor
            .deliver(
                &address,
                &request.endpoint_hints,
                attribute.read_purpose(),
                |channel| {
                    let transport = Arc::clone(&transport);
                    let descriptor =
                        AttributeDescriptor::new(address, &channel, attribute.attribute_id());
                    async move {
                        let raw = transport
                            .read_attribute(&channel, &descriptor)
                            .await
                            .map_err(AttemptError::from)?;
                        let observed_at = Utc::now();
                        let entries = attribute.decode(&raw).map_err(|e| {
                            tracing::debug!("Rejected {} from {}: {}", attribute, channel, e);
                            AttemptError::InvalidValue(e)
                        })?;
                        Ok(AttributeReading {
                            entries,
                            observed_at,
                        })
                    }
                },
            )
            .await?;

        let applied = self
            .store
            .apply(&address, reading.entries.clone(), reading.observed_at);
        tracing::debug!(
            "Read {} for {}: {} entr(y/ies) stored",
            attribute,
            address,
            applied
        );
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ChannelCache;
    use crate::config::RetryPolicy;
    use crate::resolver::TransportResolver;
    use crate::testing::FakeTransport;
    use doorlock_protocol::{ProtocolError, Purpose};
    use serde_json::json;
    use std::time::Duration;

    fn addr() -> DeviceAddress {
        DeviceAddress::normalize("aa:bb:cc:dd:ee:ff:00:11").unwrap()
    }

    fn reader(
        transport: Arc<FakeTransport>,
    ) -> (AttributeReader, Arc<DeviceStateStore>, Arc<ChannelCache>) {
        let cache = Arc::new(ChannelCache::new());
        cache.track(addr());
        let resolver =
            TransportResolver::new(Arc::clone(&cache), vec![11], Duration::from_secs(10));
        let executor = Arc::new(CommandExecutor::new(
            transport,
            resolver,
            Arc::clone(&cache),
            RetryPolicy::default(),
        ));
        let store = Arc::new(DeviceStateStore::new());
        store.track(addr());
        (AttributeReader::new(executor, Arc::clone(&store)), store, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_battery_is_not_stored() {
        let transport = Arc::new(
            FakeTransport::new()
                .succeed_on(11, "zha")
                .succeed_on(11, "zigbee")
                .with_value(Attribute::BatteryPercentage, json!(150)),
        );
        let (reader, store, cache) = reader(Arc::clone(&transport));

        let request = AttributeRequest::new(addr(), vec![], Attribute::BatteryPercentage);
        let err = reader.read(&request).await.unwrap_err();
        match err {
            LockError::AllChannelsExhausted { failures, .. } => {
                assert!(matches!(
                    &failures[0].error,
                    AttemptError::InvalidValue(ProtocolError::InvalidValue {
                        attribute: "battery",
                        ..
                    })
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Each rejected value was a failed attempt on both channels
        assert_eq!(transport.attempt_count(), 10);
        assert!(store.get(&addr(), StateKey::Battery).is_none());
        assert!(cache.get(&addr(), Purpose::PowerAttribute).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_battery_is_stored() {
        let transport = Arc::new(
            FakeTransport::new()
                .succeed_on(11, "zha")
                .with_value(Attribute::BatteryPercentage, json!(42)),
        );
        let (reader, store, cache) = reader(Arc::clone(&transport));

        let request = AttributeRequest::new(addr(), vec![], Attribute::BatteryPercentage);
        let reading = reader.read(&request).await.unwrap();
        assert_eq!(reading.get(StateKey::Battery), Some(&StateValue::Int(42)));

        let entry = store.get(&addr(), StateKey::Battery).unwrap();
        assert_eq!(entry.value, StateValue::Int(42));
        assert_eq!(entry.updated_at, reading.observed_at);
        assert_eq!(store.value(&addr(), StateKey::BatteryLow), Some(StateValue::Bool(false)));
        assert_eq!(
            cache.get(&addr(), Purpose::PowerAttribute).unwrap().channel.cluster_id,
            0x0001
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_diagnostics_fan_out_into_store() {
        let transport = Arc::new(
            FakeTransport::new()
                .succeed_on(11, "zha")
                .with_value(Attribute::Diagnostics, json!(0x1234_5678u32)),
        );
        let (reader, store, _) = reader(transport);

        let request = AttributeRequest::new(addr(), vec![], Attribute::Diagnostics);
        reader.read(&request).await.unwrap();
        assert_eq!(store.value(&addr(), StateKey::NetworkAddress), Some(StateValue::Int(0x5678)));
        assert_eq!(store.value(&addr(), StateKey::Rssi), Some(StateValue::Int(52)));
        assert_eq!(store.value(&addr(), StateKey::RssiDbm), Some(StateValue::Int(18)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_value_then_valid_value_on_retry() {
        let transport = Arc::new(
            FakeTransport::new()
                .succeed_on(11, "zha")
                .with_value(Attribute::LockState, json!(7)),
        );
        let (reader, store, _) = reader(Arc::clone(&transport));

        let request = AttributeRequest::new(addr(), vec![], Attribute::LockState);
        let read = reader.read(&request);
        tokio::pin!(read);

        // The first attempt sees an out of range state, the retry a valid one
        tokio::select! {
            _ = &mut read => panic!("read finished before the retry"),
            () = tokio::time::sleep(Duration::from_millis(500)) => {}
        }
        transport.set_value(Attribute::LockState, json!(1));

        let reading = read.await.unwrap();
        assert_eq!(reading.get(StateKey::LockState), Some(&StateValue::Int(1)));
        assert_eq!(store.value(&addr(), StateKey::LockState), Some(StateValue::Int(1)));
        assert_eq!(transport.attempt_count(), 2);
    }
}
