//! Candidate channel resolution
//!
//! Resolution performs no delivery. It orders every (endpoint, service)
//! pair that could carry a purpose: the learned channel first, then the
//! device's endpoint hints followed by the fallback endpoints, each crossed
//! with the services of the purpose in domain priority order.

use crate::cache::ChannelCache;
use crate::error::LockError;
use crate::transport::TransportClient;
use doorlock_protocol::cluster::{FALLBACK_ENDPOINTS, ZDO_ENDPOINT};
use doorlock_protocol::{Channel, DeviceAddress, Purpose, ServiceId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Builds ordered candidate lists
pub struct TransportResolver {
    cache: Arc<ChannelCache>,
    fallback_endpoints: Vec<u8>,
    /// Bound on the service listing call
    query_timeout: Duration,
}

impl TransportResolver {
    #[must_use]
    pub fn new(
        cache: Arc<ChannelCache>,
        fallback_endpoints: Vec<u8>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            fallback_endpoints,
            query_timeout,
        }
    }

    /// Endpoint priority: hints first, then fallbacks, without duplicates or ZDO
    #[must_use]
    pub fn endpoint_order(&self, hints: &[u8]) -> Vec<u8> {
        let mut order = Vec::with_capacity(hints.len() + self.fallback_endpoints.len());
        for ep in hints.iter().chain(self.fallback_endpoints.iter()) {
            if *ep != ZDO_ENDPOINT && !order.contains(ep) {
                order.push(*ep);
            }
        }
        order
    }

    /// Deterministic candidate list for a purpose.
    ///
    /// `available` prunes services the host does not currently offer;
    /// `None` keeps every known service.
    #[must_use]
    pub fn candidates(
        &self,
        address: &DeviceAddress,
        hints: &[u8],
        purpose: Purpose,
        available: Option<&HashSet<ServiceId>>,
    ) -> Vec<Channel> {
        let offered = |service: &ServiceId| available.map_or(true, |set| set.contains(service));

        let services: Vec<ServiceId> = purpose
            .candidate_services()
            .into_iter()
            .filter(|s| offered(s))
            .collect();

        let mut channels = Vec::new();
        if let Some(cached) = self.cache.get(address, purpose) {
            if offered(&cached.channel.service) {
                channels.push(cached.channel);
            }
        }

        for endpoint in self.endpoint_order(hints) {
            for service in &services {
                let channel = Channel::new(endpoint, purpose.cluster_id(), service.clone());
                if !channels.contains(&channel) {
                    channels.push(channel);
                }
            }
        }
        channels
    }

    /// Query the host once for its services and build the candidate list
    pub async fn resolve(
        &self,
        transport: &dyn TransportClient,
        address: &DeviceAddress,
        hints: &[u8],
        purpose: Purpose,
    ) -> Result<Vec<Channel>, LockError> {
        let listing = transport.list_available_services();
        let available = match tokio::time::timeout(self.query_timeout, listing).await {
            Ok(Ok(services)) => Some(services),
            Ok(Err(e)) => {
                tracing::warn!("Failed to list host services, using all known: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    "Listing host services timed out after {:?}, using all known",
                    self.query_timeout
                );
                None
            }
        };

        let channels = self.candidates(address, hints, purpose, available.as_ref());
        if channels.is_empty() {
            return Err(LockError::NoChannelAvailable {
                address: *address,
                purpose,
            });
        }

        tracing::debug!(
            "Resolved {} candidate(s) for {} on {}",
            channels.len(),
            purpose,
            address
        );
        Ok(channels)
    }
}

impl Default for TransportResolver {
    fn default() -> Self {
        Self::new(
            Arc::new(ChannelCache::new()),
            FALLBACK_ENDPOINTS.to_vec(),
            Duration::from_secs(10),
        )
    }
}
