//! Server configuration from environment variables

use anyhow::{bail, Context};
use doorlock_core::{DeviceHints, ManagerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Resolved server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Home Assistant base URL, always ending in `/`
    pub ha_url: Url,
    pub ha_token: String,
    pub listen_addr: SocketAddr,
    pub manager: ManagerConfig,
    /// Locks to register at startup (raw address and hints)
    pub devices: Vec<(String, DeviceHints)>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let raw_url = get("HA_URL").unwrap_or_else(|| "http://localhost:8123".to_string());
        let mut ha_url =
            Url::parse(&raw_url).with_context(|| format!("Invalid HA_URL: {raw_url}"))?;
        if !ha_url.path().ends_with('/') {
            let path = format!("{}/", ha_url.path());
            ha_url.set_path(&path);
        }

        let Some(ha_token) = get("HA_TOKEN") else {
            bail!("HA_TOKEN must be set to a Home Assistant long-lived access token");
        };

        let listen_addr = get("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let listen_addr: SocketAddr = listen_addr
            .parse()
            .with_context(|| format!("Invalid LISTEN_ADDR: {listen_addr}"))?;

        let data_dir = PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "./data".to_string()));

        let mut manager = ManagerConfig {
            data_path: Some(data_dir.join("locks.json")),
            ..ManagerConfig::default()
        };
        if let Some(n) = parse::<u32>(&get, "LOCK_RETRY_ATTEMPTS")? {
            manager.retry.attempts = n;
        }
        if let Some(ms) = parse::<u64>(&get, "LOCK_RETRY_BASE_MS")? {
            manager.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_secs(&get, "LOCK_POLL_LOCK_SECS")? {
            manager.poll.lock_state = secs;
        }
        if let Some(secs) = parse_secs(&get, "LOCK_POLL_BATTERY_SECS")? {
            manager.poll.battery = secs;
        }
        if let Some(secs) = parse_secs(&get, "LOCK_POLL_DIAGNOSTIC_SECS")? {
            manager.poll.diagnostics = secs;
        }
        if let Some(auto) = parse::<bool>(&get, "LOCK_AUTO_POLL")? {
            manager.auto_poll = auto;
        }

        let devices = match get("LOCK_DEVICES") {
            Some(list) => parse_devices(&list)?,
            None => Vec::new(),
        };

        Ok(Self {
            ha_url,
            ha_token,
            listen_addr,
            manager,
            devices,
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(key)
        .map(|v| v.trim().parse::<T>().with_context(|| format!("Invalid {key}: {v}")))
        .transpose()
}

fn parse_secs(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> anyhow::Result<Option<Duration>> {
    match parse::<u64>(get, key)? {
        Some(0) => bail!("{key} must be greater than zero"),
        other => Ok(other.map(Duration::from_secs)),
    }
}

/// Parse `ieee[@endpoint]` entries separated by commas
fn parse_devices(list: &str) -> anyhow::Result<Vec<(String, DeviceHints)>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('@') {
            Some((ieee, endpoint)) => {
                let endpoint: u8 = endpoint
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid endpoint in LOCK_DEVICES entry {entry}"))?;
                Ok((ieee.trim().to_string(), DeviceHints::with_primary(endpoint)))
            }
            None => Ok((entry.to_string(), DeviceHints::default())),
        })
        .collect()
}
