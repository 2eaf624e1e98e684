//! Delivery with retry, backoff and channel fallback
//!
//! Every candidate gets `attempts` tries, separated by exponential backoff.
//! The next candidate starts immediately. The first success is learned in
//! the channel cache; a cached channel that fails all of its tries is
//! forgotten.

use crate::cache::ChannelCache;
use crate::config::RetryPolicy;
use crate::error::{AttemptError, AttemptFailure, LockError};
use crate::resolver::TransportResolver;
use crate::transport::TransportClient;
use doorlock_protocol::{
    Attribute, Channel, CommandDescriptor, DeviceAddress, DoorLockCommand, Purpose,
    WriteDescriptor,
};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

/// A side-effecting cluster command
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub address: DeviceAddress,
    /// Endpoints to try before the fallback set
    pub endpoint_hints: Vec<u8>,
    pub command: DoorLockCommand,
    pub params: Map<String, Value>,
}

impl CommandRequest {
    #[must_use]
    pub fn new(address: DeviceAddress, endpoint_hints: Vec<u8>, command: DoorLockCommand) -> Self {
        Self {
            address,
            endpoint_hints,
            command,
            params: Map::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }
}

/// A configuration attribute write
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub address: DeviceAddress,
    pub endpoint_hints: Vec<u8>,
    pub attribute: Attribute,
    pub value: Value,
}

/// Result of a successful delivery
#[derive(Debug, Clone)]
pub struct Delivery<T> {
    pub channel: Channel,
    pub value: T,
    /// Transport calls made, failed ones included
    pub attempts: u32,
}

/// Runs operations against the candidate channels of a purpose
pub struct CommandExecutor {
    transport: Arc<dyn TransportClient>,
    resolver: TransportResolver,
    cache: Arc<ChannelCache>,
    policy: RetryPolicy,
}

impl CommandExecutor {
    #[must_use]
    pub fn new(
        transport: Arc<dyn TransportClient>,
        resolver: TransportResolver,
        cache: Arc<ChannelCache>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            resolver,
            cache,
            policy,
        }
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn TransportClient> {
        &self.transport
    }

    #[must_use]
    pub fn resolver(&self) -> &TransportResolver {
        &self.resolver
    }

    /// Send a Door Lock command
    pub async fn execute(&self, request: &CommandRequest) -> Result<Delivery<()>, LockError> {
        let transport = Arc::clone(&self.transport);
        let address = request.address;

        self.deliver(
            &address,
            &request.endpoint_hints,
            Purpose::LockCommand,
            |channel| {
                let transport = Arc::clone(&transport);
                let descriptor = CommandDescriptor::new(
                    address,
                    &channel,
                    request.command,
                    request.params.clone(),
                );
                async move {
                    transport
                        .send_command(&channel, &descriptor)
                        .await
                        .map_err(AttemptError::from)
                }
            },
        )
        .await
    }

    /// Write a configuration attribute
    pub async fn write(&self, request: &WriteRequest) -> Result<Delivery<()>, LockError> {
        let transport = Arc::clone(&self.transport);
        let address = request.address;
        let attribute_id = request.attribute.attribute_id();

        self.deliver(
            &address,
            &request.endpoint_hints,
            Purpose::LockAttributeWrite,
            |channel| {
                let transport = Arc::clone(&transport);
                let descriptor =
                    WriteDescriptor::new(address, &channel, attribute_id, request.value.clone());
                async move {
                    transport
                        .write_attribute(&channel, &descriptor)
                        .await
                        .map_err(AttemptError::from)
                }
            },
        )
        .await
    }

    /// Try `op` on every candidate channel until one succeeds.
    ///
    /// `op` performs one attempt. A call outliving the attempt timeout is
    /// classified as [`AttemptError::Timeout`].
    pub(crate) async fn deliver<T, F, Fut>(
        &self,
        address: &DeviceAddress,
        hints: &[u8],
        purpose: Purpose,
        op: F,
    ) -> Result<Delivery<T>, LockError>
    where
        F: Fn(Channel) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let candidates = self
            .resolver
            .resolve(self.transport.as_ref(), address, hints, purpose)
            .await?;
        let cached = self.cache.get(address, purpose).map(|r| r.channel);
        let attempts = self.policy.attempts();

        let mut failures = Vec::new();
        let mut total = 0u32;

        for channel in candidates {
            let mut last_error = None;

            for attempt in 1..=attempts {
                total += 1;
                let outcome = match tokio::time::timeout(
                    self.policy.attempt_timeout,
                    op(channel.clone()),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AttemptError::Timeout(self.policy.attempt_timeout)),
                };

                match outcome {
                    Ok(value) => {
                        self.cache.learn(address, purpose, &channel);
                        tracing::debug!(
                            "{} on {} succeeded via {} (attempt {})",
                            purpose,
                            address,
                            channel,
                            attempt
                        );
                        return Ok(Delivery {
                            channel,
                            value,
                            attempts: total,
                        });
                    }
                    Err(e) => {
                        tracing::debug!(
                            "{} on {} via {} failed (attempt {}/{}): {}",
                            purpose,
                            address,
                            channel,
                            attempt,
                            attempts,
                            e
                        );
                        last_error = Some(e);
                        if attempt < attempts {
                            tokio::time::sleep(self.policy.backoff(attempt)).await;
                        }
                    }
                }
            }

            if cached.as_ref() == Some(&channel) {
                self.cache.invalidate(address, purpose, &channel);
            }
            // attempts() is at least one, so every candidate has an error
            if let Some(error) = last_error {
                failures.push(AttemptFailure {
                    channel,
                    attempts,
                    error,
                });
            }
        }

        tracing::warn!(
            "{} on {} failed on all {} candidate(s) after {} attempt(s)",
            purpose,
            address,
            failures.len(),
            total
        );
        Err(LockError::AllChannelsExhausted {
            address: *address,
            purpose,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{AttemptKind, FakeTransport};
    use crate::transport::TransportError;
    use doorlock_protocol::channel::ISSUE_COMMAND;
    use doorlock_protocol::cluster::{id, FALLBACK_ENDPOINTS};
    use doorlock_protocol::ServiceId;
    use std::time::Duration;

    fn addr() -> DeviceAddress {
        DeviceAddress::normalize("AA:BB:CC:DD:EE:FF:00:11").unwrap()
    }

    fn executor(
        transport: Arc<FakeTransport>,
        endpoints: Vec<u8>,
    ) -> (CommandExecutor, Arc<ChannelCache>) {
        let cache = Arc::new(ChannelCache::new());
        cache.track(addr());
        let resolver =
            TransportResolver::new(Arc::clone(&cache), endpoints, Duration::from_secs(10));
        let exec = CommandExecutor::new(
            transport,
            resolver,
            Arc::clone(&cache),
            RetryPolicy::default(),
        );
        (exec, cache)
    }

    fn lock_request(hints: Vec<u8>) -> CommandRequest {
        CommandRequest::new(addr(), hints, DoorLockCommand::LockDoor)
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_candidates() {
        let transport = Arc::new(FakeTransport::new().with_services(Vec::new()));
        let (exec, _) = executor(Arc::clone(&transport), FALLBACK_ENDPOINTS.to_vec());

        let err = exec.execute(&lock_request(vec![])).await.unwrap_err();
        assert!(matches!(
            err,
            LockError::NoChannelAvailable {
                purpose: Purpose::LockCommand,
                ..
            }
        ));
        assert_eq!(transport.attempt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_candidate_success() {
        let transport = Arc::new(FakeTransport::new().succeed_on(11, "zha"));
        let (exec, cache) = executor(Arc::clone(&transport), FALLBACK_ENDPOINTS.to_vec());

        let delivery = exec.execute(&lock_request(vec![])).await.unwrap();
        assert_eq!(delivery.attempts, 1);
        assert_eq!(delivery.channel.endpoint, 11);
        assert_eq!(transport.channels_tried(), vec![(11, "zha".to_string())]);
        assert_eq!(transport.attempts()[0].kind, AttemptKind::Command(0x00));
        assert_eq!(
            cache.get(&addr(), Purpose::LockCommand).unwrap().channel,
            Channel::new(11, id::DOOR_LOCK, ServiceId::new("zha", ISSUE_COMMAND))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_third_candidate() {
        // Candidates: 11/zha, 11/zigbee, 1/zha, ...
        let transport = Arc::new(FakeTransport::new().succeed_on(1, "zha"));
        let (exec, cache) = executor(Arc::clone(&transport), FALLBACK_ENDPOINTS.to_vec());

        let delivery = exec.execute(&lock_request(vec![])).await.unwrap();
        assert_eq!(delivery.attempts, 11);
        assert_eq!(
            cache.get(&addr(), Purpose::LockCommand).unwrap().channel.endpoint,
            1
        );

        // The learned channel is tried first from now on
        transport.clear_attempts();
        let delivery = exec.execute(&lock_request(vec![])).await.unwrap();
        assert_eq!(delivery.attempts, 1);
        assert_eq!(transport.channels_tried(), vec![(1, "zha".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_nth_retry() {
        let transport = Arc::new(FakeTransport::new().succeed_after(11, "zha", 3));
        let (exec, _) = executor(Arc::clone(&transport), FALLBACK_ENDPOINTS.to_vec());

        let start = tokio::time::Instant::now();
        let delivery = exec.execute(&lock_request(vec![])).await.unwrap();
        assert_eq!(delivery.attempts, 4);
        assert_eq!(delivery.channel.endpoint, 11);
        // 1s + 2s + 4s of backoff before the fourth attempt
        assert_eq!(start.elapsed(), Duration::from_secs(7));
        assert!(transport
            .channels_tried()
            .iter()
            .all(|c| *c == (11, "zha".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_attempt_count_and_backoff() {
        let transport = Arc::new(FakeTransport::new());
        let (exec, _) = executor(Arc::clone(&transport), vec![11]);

        let start = tokio::time::Instant::now();
        let err = exec.execute(&lock_request(vec![])).await.unwrap_err();

        // One endpoint crossed with two services, five attempts each
        assert_eq!(transport.attempt_count(), 10);
        match err {
            LockError::AllChannelsExhausted { failures, .. } => {
                assert_eq!(failures.len(), 2);
                assert!(failures.iter().all(|f| f.attempts == 5));
                assert_eq!(
                    failures[0].error,
                    AttemptError::Transport(TransportError::Rejected("scripted failure".into()))
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let times: Vec<Duration> = transport
            .attempts()
            .iter()
            .map(|a| a.at.duration_since(start))
            .collect();
        let secs: Vec<u64> = times.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![0, 1, 3, 7, 15, 15, 16, 18, 22, 30]);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_times_out() {
        let transport = Arc::new(FakeTransport::new().hang_on(11, "zha").succeed_on(11, "zigbee"));
        let (exec, _) = executor(Arc::clone(&transport), vec![11]);

        let start = tokio::time::Instant::now();
        let delivery = exec.execute(&lock_request(vec![])).await.unwrap();
        assert_eq!(delivery.channel.service.domain(), "zigbee");
        assert_eq!(delivery.attempts, 6);
        // Five 10s timeouts plus 15s of backoff
        assert_eq!(start.elapsed(), Duration::from_secs(65));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_channel_failure_is_a_timeout() {
        let transport = Arc::new(FakeTransport::new().hang_on(11, "zha"));
        let (exec, _) = executor(Arc::clone(&transport), vec![11]);

        let err = exec.execute(&lock_request(vec![])).await.unwrap_err();
        let LockError::AllChannelsExhausted { failures, .. } = err else {
            panic!("expected exhaustion, got {err:?}");
        };
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].channel.service.domain(), "zha");
        assert_eq!(
            failures[0].error,
            AttemptError::Timeout(Duration::from_secs(10))
        );
        // The channel without a rule is rejected, not timed out
        assert_eq!(failures[1].error.kind(), "transport");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cached_channel_is_invalidated() {
        let transport = Arc::new(
            FakeTransport::new()
                .succeed_on(11, "zha")
                .succeed_on(11, "zigbee"),
        );
        let (exec, cache) = executor(Arc::clone(&transport), vec![11]);

        exec.execute(&lock_request(vec![])).await.unwrap();
        assert_eq!(
            cache.get(&addr(), Purpose::LockCommand).unwrap().channel.service.domain(),
            "zha"
        );

        transport.fail_on(11, "zha");
        let delivery = exec.execute(&lock_request(vec![])).await.unwrap();
        assert_eq!(delivery.channel.service.domain(), "zigbee");
        assert_eq!(
            cache.get(&addr(), Purpose::LockCommand).unwrap().channel.service.domain(),
            "zigbee"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_uses_write_purpose() {
        let transport = Arc::new(FakeTransport::new().succeed_on(11, "zigbee"));
        let (exec, cache) = executor(Arc::clone(&transport), vec![11]);

        let request = WriteRequest {
            address: addr(),
            endpoint_hints: vec![],
            attribute: Attribute::SoundVolume,
            value: Value::from(1),
        };
        let delivery = exec.write(&request).await.unwrap();
        assert_eq!(delivery.channel.service.service(), "set_zigbee_cluster_attribute");
        assert!(cache.get(&addr(), Purpose::LockAttributeWrite).is_some());
        assert!(cache.get(&addr(), Purpose::LockCommand).is_none());
        assert_eq!(transport.attempts().last().unwrap().kind, AttemptKind::Write(0x0024));
    }
}
