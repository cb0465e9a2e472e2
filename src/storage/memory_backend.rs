use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::StorageBackend;
use crate::errors::Result;

/// In-process map backend for development and tests.
///
/// Unbounded, process lifetime only. The map sits behind a lock so
/// concurrent callers cannot interleave read-modify-write sequences.
pub struct MemoryBackend {
    records: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut records = self.records.write().unwrap();
        records.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let records = self.records.read().unwrap();
        Ok(records.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut records = self.records.write().unwrap();
        records.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let records = self.records.read().unwrap();
        Ok(records
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
