//! In-memory mapping backend.
//!
//! Clones share the same entries, so dropping a `MappingStore` and opening a
//! new one on a clone simulates a process restart.

use async_trait::async_trait;
use room_controller::errors::RcError;
use room_controller::mapping::{MappingBackend, MappingKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory [`MappingBackend`].
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<HashMap<MappingKey, u64>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry, as if committed by an earlier process.
    #[must_use]
    pub fn with_entry(self, key: MappingKey, value: u64) -> Self {
        self.entries.lock().unwrap().insert(key, value);
        self
    }

    /// Committed entries.
    #[must_use]
    pub fn entries(&self) -> HashMap<MappingKey, u64> {
        self.entries.lock().unwrap().clone()
    }

    /// Committed value of a key.
    #[must_use]
    pub fn get(&self, key: &MappingKey) -> Option<u64> {
        self.entries.lock().unwrap().get(key).copied()
    }

    /// Make every `put`/`remove` fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), RcError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(RcError::Persistence("memory backend: writes disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MappingBackend for MemoryBackend {
    async fn load_all(&self) -> Result<HashMap<MappingKey, u64>, RcError> {
        Ok(self.entries())
    }

    async fn put(&self, key: MappingKey, value: u64) -> Result<(), RcError> {
        self.check_writable()?;
        self.entries.lock().unwrap().insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: MappingKey) -> Result<(), RcError> {
        self.check_writable()?;
        self.entries.lock().unwrap().remove(&key);
        Ok(())
    }
}
