use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{debug, info, warn};

use super::StorageBackend;
use crate::config::StorageConfig;
use crate::errors::{RelationError, Result};

/// Networked cache backend.
///
/// Records expire after the configured TTL (0 disables expiry), so a
/// long-running deployment sheds stale content without a separate
/// cleanup job. The connection manager reconnects on its own; callers
/// only see `Storage` errors while the server is unreachable.
pub struct RedisBackend {
    connection: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisBackend {
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        info!("Connecting to redis at {}", config.redis_uri);

        let client = Client::open(config.redis_uri.as_str())
            .map_err(|e| RelationError::Storage(format!("invalid redis uri: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| RelationError::Storage(format!("redis connection failed: {}", e)))?;

        Ok(Self {
            connection,
            ttl_seconds: config.ttl_seconds,
        })
    }
}

#[async_trait]
impl StorageBackend for RedisBackend {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection.clone();

        if self.ttl_seconds > 0 {
            let _: () = conn
                .set_ex(key, value, self.ttl_seconds as u64)
                .await
                .map_err(|e| RelationError::Storage(format!("set {} failed: {}", key, e)))?;
        } else {
            let _: () = conn
                .set(key, value)
                .await
                .map_err(|e| RelationError::Storage(format!("set {} failed: {}", key, e)))?;
        }

        debug!("Stored {}", key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        conn.get(key)
            .await
            .map_err(|e| RelationError::Storage(format!("get {} failed: {}", key, e)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| RelationError::Storage(format!("del {} failed: {}", key, e)))?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        conn.keys(format!("{}*", prefix))
            .await
            .map_err(|e| RelationError::Storage(format!("keys {}* failed: {}", prefix, e)))
    }

    async fn ping(&self) -> bool {
        let mut conn = self.connection.clone();
        match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Redis ping failed: {}", e);
                false
            }
        }
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
