use crate::provision::descriptor::Generation;
use crate::provision::fsutil;
use crate::provision::inventory::InventoryRecord;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

/// Idempotency key for one configuration run.
///
/// Hex SHA-256 over the generation and the inventory bytes, each prefixed with
/// its length so that moving bytes between the two parts changes the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunTrigger(String);

impl RunTrigger {
    pub fn compute(generation: &Generation, inventory: &InventoryRecord) -> Self {
        let mut hasher = Sha256::new();
        for part in [generation.as_str().as_bytes(), inventory.as_bytes()] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What gets persisted after a successful configuration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub resource_id: String,
    pub generation: Generation,
    pub trigger: RunTrigger,
    pub inventory_sha256: String,
    pub applied_at_unix: u64,
}

impl TriggerRecord {
    pub fn new(
        resource_id: &str,
        generation: &Generation,
        trigger: &RunTrigger,
        inventory: &InventoryRecord,
    ) -> Self {
        let applied_at_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_secs();
        Self {
            resource_id: resource_id.to_string(),
            generation: generation.clone(),
            trigger: trigger.clone(),
            inventory_sha256: inventory.sha256().to_string(),
            applied_at_unix,
        }
    }
}

#[derive(Debug, Error)]
pub enum TriggerStoreError {
    #[error("failed to access trigger record {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("trigger record {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Single-record store for the last applied trigger of one resource.
#[derive(Debug, Clone)]
pub struct TriggerStore {
    path: PathBuf,
}

impl TriggerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<TriggerRecord>, TriggerStoreError> {
        let bytes = fsutil::read_optional(&self.path)
            .await
            .map_err(|source| TriggerStoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| TriggerStoreError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    /// Whether `trigger` was already applied. A corrupt record counts as "no".
    pub async fn matches(&self, trigger: &RunTrigger) -> Result<bool, TriggerStoreError> {
        match self.load().await {
            Ok(Some(record)) => Ok(&record.trigger == trigger),
            Ok(None) => Ok(false),
            Err(TriggerStoreError::Corrupt { path, source }) => {
                tracing::warn!(
                    target: "handoff::trigger",
                    path = %path.display(),
                    error = %source,
                    "ignoring unreadable trigger record; configuration will be re-applied"
                );
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn persist(&self, record: &TriggerRecord) -> Result<(), TriggerStoreError> {
        let mut payload =
            serde_json::to_vec_pretty(record).map_err(|source| TriggerStoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        payload.push(b'\n');
        fsutil::write_atomic(&self.path, &payload)
            .await
            .map_err(|source| TriggerStoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        debug!(
            target: "handoff::trigger",
            path = %self.path.display(),
            trigger = %record.trigger.short(),
            "persisted run trigger"
        );
        Ok(())
    }
}
