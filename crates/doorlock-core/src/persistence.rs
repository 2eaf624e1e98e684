//! Lock persistence using JSON file storage

use crate::cache::LearnedChannel;
use crate::device::LockDevice;
use crate::error::LockError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// Everything kept across restarts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLocks {
    #[serde(default)]
    pub devices: Vec<LockDevice>,
    #[serde(default)]
    pub channels: Vec<LearnedChannel>,
}

/// Load locks from a JSON file. Missing or unreadable files start fresh.
pub async fn load_locks(path: &Path) -> StoredLocks {
    match fs::read_to_string(path).await {
        Ok(contents) => match serde_json::from_str::<StoredLocks>(&contents) {
            Ok(stored) => {
                tracing::info!(
                    "Loaded {} locks and {} learned channels from {:?}",
                    stored.devices.len(),
                    stored.channels.len(),
                    path
                );
                stored
            }
            Err(e) => {
                tracing::warn!("Failed to parse locks file {:?}: {}", path, e);
                StoredLocks::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No locks file found at {:?}, starting fresh", path);
            StoredLocks::default()
        }
        Err(e) => {
            tracing::warn!("Failed to read locks file {:?}: {}", path, e);
            StoredLocks::default()
        }
    }
}

/// Save locks to a JSON file atomically
pub async fn save_locks(path: &Path, stored: &StoredLocks) -> Result<(), LockError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_string_pretty(stored)?;

    // Write to a temp file, then rename over the target
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &json).await?;
    fs::rename(&tmp_path, path).await?;

    tracing::debug!(
        "Saved {} locks and {} learned channels to {:?}",
        stored.devices.len(),
        stored.channels.len(),
        path
    );
    Ok(())
}
