pub mod memory_backend;
pub mod redis_backend;

pub use memory_backend::MemoryBackend;
pub use redis_backend::RedisBackend;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::StorageConfig;
use crate::errors::Result;

/// Key prefixes for the persisted record layout.
pub const CONTENT_PREFIX: &str = "content:";
pub const EMBEDDING_PREFIX: &str = "embedding:";
pub const RELATIONSHIPS_FROM_PREFIX: &str = "relationships:from:";
pub const RELATIONSHIPS_TO_PREFIX: &str = "relationships:to:";

/// Key/value storage abstraction shared by every component.
///
/// Two implementations exist: [`RedisBackend`] (networked cache with
/// TTL-based expiry) and [`MemoryBackend`] (in-process map, process
/// lifetime only). Callers see only this trait; which backend is in
/// use is decided once at construction.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store a serialized record under `key`, overwriting any
    /// previous value.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Fetch the record stored under `key`, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove the record stored under `key`. Removing a missing key
    /// is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Whether the backend is currently reachable.
    async fn ping(&self) -> bool;

    /// Backend name for health and statistics reporting.
    fn name(&self) -> &'static str;
}

/// Build the configured backend.
pub async fn create_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    match config.backend.as_str() {
        "redis" => {
            let backend = RedisBackend::new(config).await?;
            info!("Storage backend: redis ({})", config.redis_uri);
            Ok(Arc::new(backend))
        }
        _ => {
            info!("Storage backend: in-process memory");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}
