//! Scriptable in-memory transport for tests

use crate::transport::{TransportClient, TransportError};
use async_trait::async_trait;
use doorlock_protocol::{
    Attribute, AttributeDescriptor, Channel, CommandDescriptor, Purpose, ServiceId,
    WriteDescriptor,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptKind {
    Command(u8),
    Read(u16),
    Write(u16),
}

/// One recorded transport call
#[derive(Debug, Clone)]
pub(crate) struct Attempt {
    pub endpoint: u8,
    pub service: ServiceId,
    pub kind: AttemptKind,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Succeed,
    Fail,
    Hang,
}

#[derive(Debug)]
struct Rule {
    fail_first: u32,
    then: Outcome,
    seen: u32,
}

/// Fails every channel unless told otherwise.
///
/// Rules are keyed by (endpoint, service domain); attempt numbers count
/// every call that reached the channel.
pub(crate) struct FakeTransport {
    services: Option<HashSet<ServiceId>>,
    listing_error: bool,
    rules: Mutex<HashMap<(u8, String), Rule>>,
    values: Mutex<HashMap<(u16, u16), Value>>,
    attempts: Mutex<Vec<Attempt>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            services: None,
            listing_error: false,
            rules: Mutex::new(HashMap::new()),
            values: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Restrict the advertised services
    pub fn with_services(mut self, services: Vec<ServiceId>) -> Self {
        self.services = Some(services.into_iter().collect());
        self
    }

    pub fn with_listing_error(mut self) -> Self {
        self.listing_error = true;
        self
    }

    pub fn succeed_on(self, endpoint: u8, domain: &str) -> Self {
        self.succeed_after(endpoint, domain, 0)
    }

    /// Fail the first `failures` attempts on the channel, then succeed
    pub fn succeed_after(self, endpoint: u8, domain: &str, failures: u32) -> Self {
        self.rule(endpoint, domain, failures, Outcome::Succeed);
        self
    }

    /// Calls on the channel never complete
    pub fn hang_on(self, endpoint: u8, domain: &str) -> Self {
        self.rule(endpoint, domain, 0, Outcome::Hang);
        self
    }

    pub fn with_value(self, attribute: Attribute, value: Value) -> Self {
        self.set_value(attribute, value);
        self
    }

    pub fn set_value(&self, attribute: Attribute, value: Value) {
        self.values
            .lock()
            .unwrap()
            .insert((attribute.cluster_id(), attribute.attribute_id()), value);
    }

    /// Make a channel fail from now on
    pub fn fail_on(&self, endpoint: u8, domain: &str) {
        self.rule(endpoint, domain, 0, Outcome::Fail);
    }

    fn rule(&self, endpoint: u8, domain: &str, fail_first: u32, then: Outcome) {
        self.rules.lock().unwrap().insert(
            (endpoint, domain.to_string()),
            Rule {
                fail_first,
                then,
                seen: 0,
            },
        );
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// (endpoint, domain) of every attempt, in order
    pub fn channels_tried(&self) -> Vec<(u8, String)> {
        self.attempts()
            .into_iter()
            .map(|a| (a.endpoint, a.service.domain().to_string()))
            .collect()
    }

    pub fn clear_attempts(&self) {
        self.attempts.lock().unwrap().clear();
    }

    fn record(&self, channel: &Channel, kind: AttemptKind) -> Outcome {
        self.attempts.lock().unwrap().push(Attempt {
            endpoint: channel.endpoint,
            service: channel.service.clone(),
            kind,
            at: Instant::now(),
        });

        let mut rules = self.rules.lock().unwrap();
        match rules.get_mut(&(channel.endpoint, channel.service.domain().to_string())) {
            Some(rule) => {
                rule.seen += 1;
                if rule.seen <= rule.fail_first {
                    Outcome::Fail
                } else {
                    rule.then
                }
            }
            None => Outcome::Fail,
        }
    }
}

async fn settle(outcome: Outcome) -> Result<(), TransportError> {
    match outcome {
        Outcome::Succeed => Ok(()),
        Outcome::Fail => Err(TransportError::Rejected("scripted failure".into())),
        Outcome::Hang => std::future::pending().await,
    }
}

#[async_trait]
impl TransportClient for FakeTransport {
    async fn send_command(
        &self,
        channel: &Channel,
        descriptor: &CommandDescriptor,
    ) -> Result<(), TransportError> {
        let outcome = self.record(channel, AttemptKind::Command(descriptor.command));
        settle(outcome).await
    }

    async fn read_attribute(
        &self,
        channel: &Channel,
        descriptor: &AttributeDescriptor,
    ) -> Result<Value, TransportError> {
        let outcome = self.record(channel, AttemptKind::Read(descriptor.attribute));
        settle(outcome).await?;
        self.values
            .lock()
            .unwrap()
            .get(&(descriptor.cluster_id, descriptor.attribute))
            .cloned()
            .ok_or_else(|| TransportError::Decode("no value".into()))
    }

    async fn write_attribute(
        &self,
        channel: &Channel,
        descriptor: &WriteDescriptor,
    ) -> Result<(), TransportError> {
        let outcome = self.record(channel, AttemptKind::Write(descriptor.attribute));
        settle(outcome).await?;
        self.values.lock().unwrap().insert(
            (descriptor.cluster_id, descriptor.attribute),
            descriptor.value.clone(),
        );
        Ok(())
    }

    async fn list_available_services(&self) -> Result<HashSet<ServiceId>, TransportError> {
        if self.listing_error {
            return Err(TransportError::Http("listing unavailable".into()));
        }
        Ok(self.services.clone().unwrap_or_else(|| {
            Purpose::ALL
                .iter()
                .flat_map(|p| p.candidate_services())
                .collect()
        }))
    }
}
