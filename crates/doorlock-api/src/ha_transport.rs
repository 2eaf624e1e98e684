//! Home Assistant REST transport
//!
//! Cluster commands and attribute access go through the host's Zigbee
//! services (`POST /api/services/<domain>/<service>`), authenticated with a
//! long-lived access token.

use async_trait::async_trait;
use doorlock_core::{TransportClient, TransportError};
use doorlock_protocol::{
    AttributeDescriptor, Channel, CommandDescriptor, ServiceId, WriteDescriptor,
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

/// One entry of `GET /api/services`
#[derive(Debug, Deserialize)]
struct ServiceDomain {
    domain: String,
    #[serde(default)]
    services: Map<String, Value>,
}

/// Transport backed by the Home Assistant REST API
pub struct HaTransport {
    client: reqwest::Client,
    base: Url,
    token: String,
}

impl HaTransport {
    pub fn new(base: Url, token: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base,
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        self.base
            .join(path)
            .map_err(|e| TransportError::Http(format!("invalid URL for {path}: {e}")))
    }

    /// Call a service and return its JSON response
    async fn call<B: Serialize + Sync>(
        &self,
        service: &ServiceId,
        body: &B,
        return_response: bool,
    ) -> Result<Value, TransportError> {
        let mut url = self.url(&format!(
            "api/services/{}/{}",
            service.domain(),
            service.service()
        ))?;
        if return_response {
            url.set_query(Some("return_response"));
        }

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::NOT_FOUND => TransportError::ServiceUnavailable(service.to_string()),
                StatusCode::BAD_REQUEST => TransportError::Rejected(text),
                _ => TransportError::Http(format!("{status}: {text}")),
            });
        }

        let text = response.text().await.map_err(classify)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Http(err.to_string())
    }
}

/// Pull the attribute value out of a service response.
///
/// Accepts a bare value, `{"value": v}`, or an object keyed by the attribute
/// id (decimal or `0x` hex), optionally wrapped in `service_response`.
fn extract_value(response: Value, attribute: u16) -> Result<Value, TransportError> {
    let payload = match response {
        Value::Object(mut map) => match map.remove("service_response") {
            Some(inner) => inner,
            None => Value::Object(map),
        },
        other => other,
    };

    match payload {
        Value::Number(_) | Value::Bool(_) | Value::String(_) => Ok(payload),
        Value::Object(mut map) => {
            let keys = [
                "value".to_string(),
                attribute.to_string(),
                format!("{attribute:#06x}"),
            ];
            keys.iter()
                .find_map(|k| map.remove(k))
                .ok_or_else(|| {
                    TransportError::Decode(format!("no value for attribute {attribute:#06x}"))
                })
        }
        other => Err(TransportError::Decode(format!(
            "unexpected response for attribute {attribute:#06x}: {other}"
        ))),
    }
}

#[async_trait]
impl TransportClient for HaTransport {
    async fn send_command(
        &self,
        channel: &Channel,
        descriptor: &CommandDescriptor,
    ) -> Result<(), TransportError> {
        self.call(&channel.service, descriptor, false).await?;
        Ok(())
    }

    async fn read_attribute(
        &self,
        channel: &Channel,
        descriptor: &AttributeDescriptor,
    ) -> Result<Value, TransportError> {
        let response = self.call(&channel.service, descriptor, true).await?;
        extract_value(response, descriptor.attribute)
    }

    async fn write_attribute(
        &self,
        channel: &Channel,
        descriptor: &WriteDescriptor,
    ) -> Result<(), TransportError> {
        self.call(&channel.service, descriptor, false).await?;
        Ok(())
    }

    async fn list_available_services(&self) -> Result<HashSet<ServiceId>, TransportError> {
        let response = self
            .client
            .get(self.url("api/services")?)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http(format!("listing services: {status}")));
        }

        let domains: Vec<ServiceDomain> = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        Ok(domains
            .into_iter()
            .flat_map(|d| {
                let domain = d.domain;
                d.services
                    .into_iter()
                    .map(move |(name, _)| ServiceId::new(domain.clone(), name))
            })
            .collect())
    }
}
