//! Redis mapping backend.
//!
//! All entries live in one hash, `rc:room_mappings`, with the same field
//! names and values as the JSON file backend.
//!
//! The redis-rs `MultiplexedConnection` is cheap to clone and safe to use
//! concurrently, so each operation clones it instead of locking.

use super::store::{MappingBackend, MappingKey};
use crate::errors::RcError;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use tracing::{error, warn};

/// Hash holding every mapping entry.
pub const MAPPINGS_HASH_KEY: &str = "rc:room_mappings";

/// Mapping backend persisted to a Redis hash.
#[derive(Clone)]
pub struct RedisBackend {
    connection: MultiplexedConnection,
}

impl RedisBackend {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `RcError::Persistence` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, RcError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Note: Do NOT log redis_url as it may contain credentials
            error!(target: "rc.mapping.redis", error = %e, "Failed to open Redis client");
            RcError::Persistence(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "rc.mapping.redis", error = %e, "Failed to connect to Redis");
                RcError::Persistence(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self { connection })
    }
}

#[async_trait]
impl MappingBackend for RedisBackend {
    async fn load_all(&self) -> Result<HashMap<MappingKey, u64>, RcError> {
        let mut conn = self.connection.clone();
        let stored: HashMap<String, String> = conn.hgetall(MAPPINGS_HASH_KEY).await?;

        let mut entries = HashMap::with_capacity(stored.len());
        for (key, value) in stored {
            match (key.parse::<MappingKey>(), value.parse::<u64>()) {
                (Ok(key), Ok(value)) => {
                    entries.insert(key, value);
                }
                _ => warn!(
                    target: "rc.mapping.redis",
                    key = %key,
                    "Skipping malformed mapping entry"
                ),
            }
        }
        Ok(entries)
    }

    async fn put(&self, key: MappingKey, value: u64) -> Result<(), RcError> {
        let mut conn = self.connection.clone();
        conn.hset::<_, _, _, ()>(MAPPINGS_HASH_KEY, key.to_string(), value.to_string())
            .await?;
        Ok(())
    }

    async fn remove(&self, key: MappingKey) -> Result<(), RcError> {
        let mut conn = self.connection.clone();
        conn.hdel::<_, _, ()>(MAPPINGS_HASH_KEY, key.to_string())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_key_is_namespaced() {
        assert!(MAPPINGS_HASH_KEY.starts_with("rc:"));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let result = RedisBackend::connect("not-a-redis-url").await;
        assert!(matches!(result, Err(RcError::Persistence(_))));
    }
}
