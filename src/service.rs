use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::categorizer::{Categorization, CategorySuggestion, ContentCategorizer};
use crate::config::Config;
use crate::conflict_detector::{ConflictDetector, ContentConflict, GraphConflict};
use crate::content_store::{ContentItem, ContentStore};
use crate::errors::{RelationError, Result};
use crate::impact_analyzer::{ImpactAnalyzer, ImpactedItem};
use crate::metrics::{MetricsCollector, OperationStats, OperationTimer};
use crate::relationship_analyzer::{Relationship, RelationshipAnalyzer, RelationshipType};
use crate::storage::{create_backend, StorageBackend};
use crate::vector_search::{EmbeddingHealth, EmbeddingProvider, SearchResults, SimilarityIndex};

/// Structural and content-level conflicts in one report.
#[derive(Debug, Serialize)]
pub struct ConflictReport {
    pub graph_conflicts: Vec<GraphConflict>,
    pub content_conflicts: Vec<ContentConflict>,
}

/// Counts and health surfaced through the statistics operation.
#[derive(Debug, Serialize)]
pub struct Statistics {
    pub total_items: usize,
    pub items_by_category: HashMap<String, usize>,
    pub items_by_source: HashMap<String, usize>,
    pub total_edges: usize,
    pub edges_by_type: HashMap<String, usize>,
    pub storage_backend: String,
    pub storage_connected: bool,
    pub embedding: EmbeddingHealth,
    pub operations: OperationStats,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    /// "healthy", "degraded" (mock embeddings active), or "unhealthy"
    /// (storage unreachable).
    pub status: String,
    pub storage_backend: String,
    pub storage_connected: bool,
    pub embedding: EmbeddingHealth,
    pub version: String,
}

/// Facade wiring every component of the vector relationship system.
///
/// Construction builds the configured storage backend once and injects
/// it everywhere; no component reaches for ambient global state. The
/// facade also owns the cross-component cascades: deleting content
/// removes its embedding and every edge referencing it, and a text
/// update recomputes the item's relationships.
pub struct RelationService {
    config: Config,
    store: Arc<ContentStore>,
    index: Arc<SimilarityIndex>,
    analyzer: Arc<RelationshipAnalyzer>,
    impact: ImpactAnalyzer,
    conflicts: ConflictDetector,
    metrics: Arc<MetricsCollector>,
}

impl RelationService {
    pub async fn new(config: Config) -> Result<Self> {
        let backend: Arc<dyn StorageBackend> = create_backend(&config.storage).await?;
        let categorizer = Arc::new(ContentCategorizer::new(&config));
        let provider = Arc::new(EmbeddingProvider::new(&config.embedding)?);

        let store = Arc::new(ContentStore::new(
            backend.clone(),
            categorizer,
            provider,
        ));
        let index = Arc::new(SimilarityIndex::new(store.clone(), config.search.clone()));
        let analyzer = Arc::new(RelationshipAnalyzer::new(
            backend,
            store.clone(),
            index.clone(),
            config.relationships.clone(),
        ));
        let impact = ImpactAnalyzer::new(
            store.clone(),
            index.clone(),
            analyzer.clone(),
            config.impact.clone(),
        );
        let conflicts = ConflictDetector::new(
            store.clone(),
            analyzer.clone(),
            config.conflicts.clone(),
        );

        info!("Relation service ready: {}", config.summary());

        Ok(Self {
            config,
            store,
            index,
            analyzer,
            impact,
            conflicts,
            metrics: Arc::new(MetricsCollector::new()),
        })
    }

    pub async fn store_content(
        &self,
        text: String,
        source: String,
        metadata: HashMap<String, String>,
        category: Option<String>,
    ) -> Result<(ContentItem, Categorization)> {
        let timer = OperationTimer::new(self.metrics.clone(), "store_content");
        let stored = self.store.put(text, source, metadata, category).await?;
        timer.finish(1).await;
        Ok(stored)
    }

    pub async fn get_content(&self, id: &str) -> Result<Option<ContentItem>> {
        self.store.get(id).await
    }

    /// Apply a content change. A text change re-embeds the item and
    /// recomputes its relationships, since edges are derived from the
    /// text they were discovered on.
    pub async fn update_content(
        &self,
        id: &str,
        new_text: Option<String>,
        new_metadata: Option<HashMap<String, String>>,
    ) -> Result<ContentItem> {
        let timer = OperationTimer::new(self.metrics.clone(), "update_content");
        let text_changed = new_text.is_some();

        let item = self.store.update(id, new_text, new_metadata).await?;

        if text_changed {
            self.analyzer.remove(id).await?;
            let edges = self.analyzer.analyze(&item, None).await?;
            debug!("Recomputed {} edges for updated content {}", edges.len(), id);
        }

        timer.finish(1).await;
        Ok(item)
    }

    /// Delete content with full cascade: embedding and every edge
    /// referencing the item go with it. Returns the number of edges
    /// removed.
    pub async fn delete_content(&self, id: &str) -> Result<usize> {
        let timer = OperationTimer::new(self.metrics.clone(), "delete_content");

        let edges_removed = self.analyzer.remove(id).await?;
        self.store.delete(id).await?;

        timer.finish(edges_removed).await;
        Ok(edges_removed)
    }

    pub async fn search(
        &self,
        query: &str,
        category: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> Result<SearchResults> {
        if let Some(key) = category {
            if self.config.category(key).is_none() {
                return Err(RelationError::Validation(vec![format!(
                    "unknown category '{}'",
                    key
                )]));
            }
        }

        let timer = OperationTimer::new(self.metrics.clone(), "search_content");
        let results = self.index.search(query, category, page, page_size).await?;
        timer.finish(results.results.len()).await;
        Ok(results)
    }

    pub fn suggest_category(&self, text: &str, source: &str) -> Vec<CategorySuggestion> {
        self.store.categorizer().suggest(text, source)
    }

    pub async fn analyze_relationships(
        &self,
        content_id: &str,
        rel_type: Option<RelationshipType>,
    ) -> Result<Vec<Relationship>> {
        let item = self
            .get_content(content_id)
            .await?
            .ok_or_else(|| RelationError::NotFound(content_id.to_string()))?;

        let timer = OperationTimer::new(self.metrics.clone(), "analyze_relationships");
        let edges = self.analyzer.analyze(&item, rel_type).await?;
        timer.finish(edges.len()).await;
        Ok(edges)
    }

    pub async fn impact_analysis(
        &self,
        change_description: &str,
        categories: Option<&[String]>,
        max_depth: Option<usize>,
    ) -> Result<Vec<ImpactedItem>> {
        if let Some(keys) = categories {
            let unknown: Vec<String> = keys
                .iter()
                .filter(|k| self.config.category(k).is_none())
                .map(|k| format!("unknown category '{}'", k))
                .collect();
            if !unknown.is_empty() {
                return Err(RelationError::Validation(unknown));
            }
        }

        let timer = OperationTimer::new(self.metrics.clone(), "impact_analysis");
        let impacted = self
            .impact
            .analyze_change(change_description, categories, max_depth)
            .await?;
        timer.finish(impacted.len()).await;
        Ok(impacted)
    }

    pub async fn detect_conflicts(&self) -> Result<ConflictReport> {
        let timer = OperationTimer::new(self.metrics.clone(), "detect_conflicts");

        let graph_conflicts = self.conflicts.detect_conflicts().await?;
        let content_conflicts = self.conflicts.scan_content_conflicts().await?;

        timer
            .finish(graph_conflicts.len() + content_conflicts.len())
            .await;
        Ok(ConflictReport {
            graph_conflicts,
            content_conflicts,
        })
    }

    pub async fn statistics(&self) -> Result<Statistics> {
        let items = self.store.items().await?;
        let mut items_by_category: HashMap<String, usize> = HashMap::new();
        let mut items_by_source: HashMap<String, usize> = HashMap::new();
        for item in &items {
            *items_by_category.entry(item.category.clone()).or_default() += 1;
            *items_by_source.entry(item.source.clone()).or_default() += 1;
        }

        let edges = self.analyzer.all_edges().await?;
        let mut edges_by_type: HashMap<String, usize> = HashMap::new();
        for edge in &edges {
            *edges_by_type
                .entry(edge.rel_type.as_str().to_string())
                .or_default() += 1;
        }

        Ok(Statistics {
            total_items: items.len(),
            items_by_category,
            items_by_source,
            total_edges: edges.len(),
            edges_by_type,
            storage_backend: self.store.backend().name().to_string(),
            storage_connected: self.store.backend().ping().await,
            embedding: self.store.provider().health().await,
            operations: self.metrics.stats().await,
            uptime_seconds: self.metrics.uptime_seconds(),
        })
    }

    pub async fn health(&self) -> Result<HealthReport> {
        let storage_connected = self.store.backend().ping().await;
        let embedding = self.store.provider().health().await;

        let status = if !storage_connected {
            "unhealthy"
        } else if embedding.mock_active {
            "degraded"
        } else {
            "healthy"
        };

        Ok(HealthReport {
            status: status.to_string(),
            storage_backend: self.store.backend().name().to_string(),
            storage_connected,
            embedding,
            version: self.config.server.version.clone(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
