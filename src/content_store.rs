use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::categorizer::{Categorization, ContentCategorizer};
use crate::errors::{RelationError, Result};
use crate::storage::{StorageBackend, CONTENT_PREFIX, EMBEDDING_PREFIX};
use crate::vector_search::EmbeddingProvider;

/// A unit of knowledge: a doc page, backlog entry, source file, or
/// customer conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    pub id: String,
    pub text: String,
    pub source: String,
    pub category: String,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// None until an embedding exists; cleared whenever the text
    /// changes, so an un-embedded item never shows up in search.
    pub embedded_at: Option<DateTime<Utc>>,
}

/// Stored vector for one content item, keyed 1:1 by item id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub item_id: String,
    pub vector: Vec<f32>,
    /// Model name, or "mock" for fallback vectors.
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// Owns ContentItem and Embedding records.
///
/// All multi-step sequences (categorize-then-store, embed-invalidate-
/// restore) run under one lock so concurrent writers cannot interleave
/// them; reads go straight to the backend.
pub struct ContentStore {
    backend: Arc<dyn StorageBackend>,
    categorizer: Arc<ContentCategorizer>,
    provider: Arc<EmbeddingProvider>,
    write_lock: Mutex<()>,
}

impl ContentStore {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        categorizer: Arc<ContentCategorizer>,
        provider: Arc<EmbeddingProvider>,
    ) -> Self {
        Self {
            backend,
            categorizer,
            provider,
            write_lock: Mutex::new(()),
        }
    }

    /// Validate, categorize, persist, and embed a new item.
    ///
    /// With an explicit `category` the item must pass the full rule
    /// check (rejected with every violation listed); without one the
    /// categorizer assigns a category and never fails. Required
    /// metadata fields are backfilled with configured defaults either
    /// way.
    pub async fn put(
        &self,
        text: String,
        source: String,
        metadata: HashMap<String, String>,
        category: Option<String>,
    ) -> Result<(ContentItem, Categorization)> {
        let _guard = self.write_lock.lock().await;

        let categorization = match category {
            Some(requested) => {
                let rule = self
                    .categorizer
                    .rule(&requested)
                    .ok_or_else(|| {
                        RelationError::Validation(vec![format!(
                            "unknown category '{}'",
                            requested
                        )])
                    })?;
                let enriched = self.categorizer.backfill_metadata(rule, &metadata);
                let errors = self
                    .categorizer
                    .validate(&text, &requested, &source, &enriched);
                if !errors.is_empty() {
                    return Err(RelationError::Validation(errors));
                }
                Categorization {
                    category: requested,
                    confidence: 1.0,
                    metadata: enriched,
                }
            }
            None => {
                if text.len() > self.categorizer.max_text_length() {
                    return Err(RelationError::Validation(vec![format!(
                        "text length {} exceeds maximum {}",
                        text.len(),
                        self.categorizer.max_text_length()
                    )]));
                }
                self.categorizer.categorize(&text, &source, &metadata)
            }
        };

        let now = Utc::now();
        let mut item = ContentItem {
            id: Uuid::new_v4().to_string(),
            text,
            source,
            category: categorization.category.clone(),
            metadata: categorization.metadata.clone(),
            created_at: now,
            updated_at: now,
            embedded_at: None,
        };

        self.persist_item(&item).await?;
        self.embed_item(&mut item).await?;

        debug!("Stored content {} ({})", item.id, item.category);
        Ok((item, categorization))
    }

    /// `None` for missing ids, never an error.
    pub async fn get(&self, id: &str) -> Result<Option<ContentItem>> {
        match self.backend.get(&content_key(id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Apply a text and/or metadata change.
    ///
    /// A text change invalidates the stored embedding and regenerates
    /// it before returning, so an updated item is never invisible to
    /// search.
    pub async fn update(
        &self,
        id: &str,
        new_text: Option<String>,
        new_metadata: Option<HashMap<String, String>>,
    ) -> Result<ContentItem> {
        let _guard = self.write_lock.lock().await;

        let mut item = self
            .get(id)
            .await?
            .ok_or_else(|| RelationError::NotFound(id.to_string()))?;

        let text_changed = matches!(&new_text, Some(text) if *text != item.text);

        if let Some(text) = new_text {
            item.text = text;
        }
        if let Some(metadata) = new_metadata {
            item.metadata.extend(metadata);
        }
        if let Some(rule) = self.categorizer.rule(&item.category) {
            item.metadata = self.categorizer.backfill_metadata(rule, &item.metadata);
        }

        if item.text.len() > self.categorizer.max_text_length() {
            return Err(RelationError::Validation(vec![format!(
                "text length {} exceeds maximum {}",
                item.text.len(),
                self.categorizer.max_text_length()
            )]));
        }

        item.updated_at = Utc::now();

        if text_changed {
            // Delete first so a failed regeneration leaves the item
            // observably un-embedded rather than searchable with a
            // stale vector.
            self.backend.delete(&embedding_key(id)).await?;
            item.embedded_at = None;
            self.persist_item(&item).await?;
            self.embed_item(&mut item).await?;
        } else {
            self.persist_item(&item).await?;
        }

        debug!("Updated content {} (text_changed={})", id, text_changed);
        Ok(item)
    }

    /// Remove the item and its embedding. Relationship edges are
    /// cleaned up by the service layer so no dangling references
    /// survive.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if self.backend.get(&content_key(id)).await?.is_none() {
            return Err(RelationError::NotFound(id.to_string()));
        }

        self.backend.delete(&content_key(id)).await?;
        self.backend.delete(&embedding_key(id)).await?;
        debug!("Deleted content {}", id);
        Ok(())
    }

    pub async fn get_embedding(&self, id: &str) -> Result<Option<StoredEmbedding>> {
        match self.backend.get(&embedding_key(id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Every item that currently has an embedding, paired with its
    /// vector. Items whose content record went missing are skipped
    /// with a warning rather than failing the whole scan.
    pub async fn embedded_items(&self) -> Result<Vec<(ContentItem, StoredEmbedding)>> {
        let keys = self.backend.keys_with_prefix(EMBEDDING_PREFIX).await?;
        let mut pairs = Vec::with_capacity(keys.len());

        for key in keys {
            let id = &key[EMBEDDING_PREFIX.len()..];
            let embedding = match self.get_embedding(id).await? {
                Some(embedding) => embedding,
                None => continue,
            };
            match self.get(id).await? {
                Some(item) => pairs.push((item, embedding)),
                None => warn!("Embedding {} has no content record, skipping", id),
            }
        }

        Ok(pairs)
    }

    /// All stored items.
    pub async fn items(&self) -> Result<Vec<ContentItem>> {
        let keys = self.backend.keys_with_prefix(CONTENT_PREFIX).await?;
        let mut items = Vec::with_capacity(keys.len());

        for key in keys {
            if let Some(json) = self.backend.get(&key).await? {
                match serde_json::from_str(&json) {
                    Ok(item) => items.push(item),
                    Err(e) => warn!("Skipping malformed record {}: {}", key, e),
                }
            }
        }

        Ok(items)
    }

    pub fn provider(&self) -> &Arc<EmbeddingProvider> {
        &self.provider
    }

    pub fn categorizer(&self) -> &Arc<ContentCategorizer> {
        &self.categorizer
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    async fn embed_item(&self, item: &mut ContentItem) -> Result<()> {
        let vector = self.provider.embed(&item.text).await;
        let embedding = StoredEmbedding {
            item_id: item.id.clone(),
            vector,
            model: self.provider.model_label().await,
            created_at: Utc::now(),
        };

        self.backend
            .put(&embedding_key(&item.id), &serde_json::to_string(&embedding)?)
            .await?;

        item.embedded_at = Some(Utc::now());
        self.persist_item(item).await
    }

    async fn persist_item(&self, item: &ContentItem) -> Result<()> {
        self.backend
            .put(&content_key(&item.id), &serde_json::to_string(item)?)
            .await
    }
}

pub fn content_key(id: &str) -> String {
    format!("{}{}", CONTENT_PREFIX, id)
}

pub fn embedding_key(id: &str) -> String {
    format!("{}{}", EMBEDDING_PREFIX, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::MemoryBackend;

    fn store() -> ContentStore {
        let mut config = Config::default();
        config.embedding.api_key_env = "EMBEDDING_TEST_KEY_UNSET".to_string();
        config.embedding.dimensions = 128;

        ContentStore::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(ContentCategorizer::new(&config)),
            Arc::new(EmbeddingProvider::new(&config.embedding).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let store = store();

        let (item, categorization) = store
            .put(
                "A setup guide covering the documentation workflow".to_string(),
                "confluence".to_string(),
                HashMap::new(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(categorization.category, "knowledge");
        assert!(item.embedded_at.is_some());

        let loaded = store.get(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded, item);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        assert!(store().get("no-such-id").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_stores_embedding() {
        let store = store();
        let (item, _) = store
            .put(
                "An overview guide".to_string(),
                "confluence".to_string(),
                HashMap::new(),
                None,
            )
            .await
            .unwrap();

        let embedding = store.get_embedding(&item.id).await.unwrap().unwrap();
        assert_eq!(embedding.item_id, item.id);
        assert_eq!(embedding.vector.len(), 128);
        assert_eq!(embedding.model, "mock");
    }

    #[tokio::test]
    async fn test_put_rejects_invalid_explicit_category() {
        let store = store();

        let err = store
            .put(
                "ticket text".to_string(),
                "jira".to_string(),
                HashMap::new(),
                Some("blog".to_string()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RelationError::Validation(_)));
    }

    #[tokio::test]
    async fn test_put_lists_all_violations() {
        let store = store();

        let err = store
            .put(
                "completely unrelated text".to_string(),
                "confluence".to_string(),
                HashMap::new(),
                Some("backlog".to_string()),
            )
            .await
            .unwrap_err();

        let violations = err.violations();
        assert!(violations.len() >= 2);
        assert!(violations.iter().any(|v| v.contains("not valid")));
        assert!(violations.iter().any(|v| v.contains("indicator")));
    }

    #[tokio::test]
    async fn test_put_rejects_oversized_text_without_category() {
        let mut config = Config::default();
        config.embedding.api_key_env = "EMBEDDING_TEST_KEY_UNSET".to_string();
        config.embedding.dimensions = 128;
        config.content.max_text_length = 20;

        let store = ContentStore::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(ContentCategorizer::new(&config)),
            Arc::new(EmbeddingProvider::new(&config.embedding).unwrap()),
        );

        let err = store
            .put(
                "a guide that runs well past the configured bound".to_string(),
                "confluence".to_string(),
                HashMap::new(),
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RelationError::Validation(_)));
        assert!(err.violations()[0].contains("exceeds maximum"));
    }

    #[tokio::test]
    async fn test_update_text_regenerates_embedding() {
        let store = store();
        let (item, _) = store
            .put(
                "The original setup guide".to_string(),
                "confluence".to_string(),
                HashMap::new(),
                None,
            )
            .await
            .unwrap();
        let original = store.get_embedding(&item.id).await.unwrap().unwrap();

        let updated = store
            .update(
                &item.id,
                Some("A completely rewritten deployment guide".to_string()),
                None,
            )
            .await
            .unwrap();

        assert_eq!(updated.text, "A completely rewritten deployment guide");
        assert!(updated.embedded_at.is_some());
        assert!(updated.updated_at > item.updated_at);

        let regenerated = store.get_embedding(&item.id).await.unwrap().unwrap();
        assert_ne!(original.vector, regenerated.vector);
    }

    #[tokio::test]
    async fn test_update_metadata_keeps_embedding() {
        let store = store();
        let (item, _) = store
            .put(
                "An overview guide".to_string(),
                "confluence".to_string(),
                HashMap::new(),
                None,
            )
            .await
            .unwrap();
        let original = store.get_embedding(&item.id).await.unwrap().unwrap();

        let updated = store
            .update(
                &item.id,
                None,
                Some(HashMap::from([("space".to_string(), "sso".to_string())])),
            )
            .await
            .unwrap();

        assert_eq!(updated.metadata["space"], "sso");
        let unchanged = store.get_embedding(&item.id).await.unwrap().unwrap();
        assert_eq!(original.vector, unchanged.vector);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let err = store()
            .update("ghost", Some("text".to_string()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RelationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_content_and_embedding() {
        let store = store();
        let (item, _) = store
            .put(
                "An overview guide".to_string(),
                "confluence".to_string(),
                HashMap::new(),
                None,
            )
            .await
            .unwrap();

        store.delete(&item.id).await.unwrap();

        assert!(store.get(&item.id).await.unwrap().is_none());
        assert!(store.get_embedding(&item.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let err = store().delete("ghost").await.unwrap_err();
        assert!(matches!(err, RelationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_embedded_items_pairs_vectors_with_content() {
        let store = store();
        store
            .put(
                "First setup guide".to_string(),
                "confluence".to_string(),
                HashMap::new(),
                None,
            )
            .await
            .unwrap();
        store
            .put(
                "Story: export ticket sprint work".to_string(),
                "jira".to_string(),
                HashMap::new(),
                None,
            )
            .await
            .unwrap();

        let pairs = store.embedded_items().await.unwrap();
        assert_eq!(pairs.len(), 2);
        for (item, embedding) in pairs {
            assert_eq!(item.id, embedding.item_id);
        }
    }
}
