//! JSON file mapping backend.
//!
//! The whole mapping is a flat JSON object of key to snowflake string:
//!
//! ```json
//! {
//!   "group:123": "456",
//!   "trigger:123": "789",
//!   "owner:123:42": "1011"
//! }
//! ```
//!
//! Every mutation rewrites the file through a temporary sibling followed by a
//! rename, so a crash mid-write leaves the previous committed version intact.

use super::store::{MappingBackend, MappingKey};
use crate::errors::RcError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Mapping backend persisted to a JSON file.
pub struct JsonFileBackend {
    path: PathBuf,
    contents: Mutex<BTreeMap<String, String>>,
}

impl JsonFileBackend {
    /// Create a backend for the given path. Nothing is read until `load_all`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            contents: Mutex::new(BTreeMap::new()),
        }
    }

    /// Path of the mapping file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_all(&self, contents: &BTreeMap<String, String>) -> Result<(), RcError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RcError::Persistence(format!("create {}: {e}", parent.display())))?;
        }

        let encoded = serde_json::to_vec_pretty(contents)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &encoded)
            .await
            .map_err(|e| RcError::Persistence(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| RcError::Persistence(format!("rename {}: {e}", self.path.display())))?;

        debug!(
            target: "rc.mapping.file",
            path = %self.path.display(),
            entries = contents.len(),
            "Mapping file written"
        );
        Ok(())
    }
}

#[async_trait]
impl MappingBackend for JsonFileBackend {
    async fn load_all(&self) -> Result<HashMap<MappingKey, u64>, RcError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(
                    target: "rc.mapping.file",
                    path = %self.path.display(),
                    "No mapping file yet, starting empty"
                );
                return Ok(HashMap::new());
            }
            Err(e) => {
                return Err(RcError::Persistence(format!(
                    "read {}: {e}",
                    self.path.display()
                )))
            }
        };

        let stored: BTreeMap<String, String> = serde_json::from_slice(&raw)?;
        let mut entries = HashMap::with_capacity(stored.len());
        for (key, value) in &stored {
            match (key.parse::<MappingKey>(), value.parse::<u64>()) {
                (Ok(key), Ok(value)) => {
                    entries.insert(key, value);
                }
                _ => warn!(
                    target: "rc.mapping.file",
                    key = %key,
                    "Skipping malformed mapping entry"
                ),
            }
        }

        *self.contents.lock().await = stored;
        Ok(entries)
    }

    async fn put(&self, key: MappingKey, value: u64) -> Result<(), RcError> {
        let mut contents = self.contents.lock().await;
        contents.insert(key.to_string(), value.to_string());
        self.write_all(&contents).await
    }

    async fn remove(&self, key: MappingKey) -> Result<(), RcError> {
        let mut contents = self.contents.lock().await;
        if contents.remove(&key.to_string()).is_none() {
            return Ok(());
        }
        self.write_all(&contents).await
    }
}
