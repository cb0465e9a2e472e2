use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RelationshipRule;
use crate::content_store::{ContentItem, ContentStore};
use crate::errors::Result;
use crate::storage::{StorageBackend, RELATIONSHIPS_FROM_PREFIX, RELATIONSHIPS_TO_PREFIX};
use crate::vector_search::SimilarityIndex;

/// Closed set of typed connections between content items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Implements,
    Documents,
    Requires,
    Affects,
    Depends,
    Conflicts,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Implements => "implements",
            RelationshipType::Documents => "documents",
            RelationshipType::Requires => "requires",
            RelationshipType::Affects => "affects",
            RelationshipType::Depends => "depends",
            RelationshipType::Conflicts => "conflicts",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "implements" => Some(RelationshipType::Implements),
            "documents" => Some(RelationshipType::Documents),
            "requires" => Some(RelationshipType::Requires),
            "affects" => Some(RelationshipType::Affects),
            "depends" => Some(RelationshipType::Depends),
            "conflicts" => Some(RelationshipType::Conflicts),
            _ => None,
        }
    }
}

/// A directed, scored edge between two content items.
///
/// Edges are derived data: they can always be recomputed from current
/// content and embeddings, so re-analysis replaces them wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    pub rel_type: RelationshipType,
    /// Similarity score at creation time, in [0, 1].
    pub strength: f32,
    pub created_at: DateTime<Utc>,
}

/// One traversed edge of an impact chain.
#[derive(Debug, Clone, Serialize)]
pub struct ImpactLink {
    pub depth: usize,
    pub from_id: String,
    pub to_id: String,
    pub rel_type: RelationshipType,
    pub strength: f32,
}

/// Keyword families for classifying a discovered similarity when no
/// configured rule names the type. First family with a hit wins.
const TYPE_KEYWORDS: &[(RelationshipType, &[&str])] = &[
    (RelationshipType::Implements, &["implement", "code", "source"]),
    (RelationshipType::Documents, &["document", "guide", "manual"]),
    (RelationshipType::Requires, &["require", "need", "dependency"]),
    (RelationshipType::Affects, &["affect", "impact", "change"]),
    (RelationshipType::Depends, &["depend", "rely", "build"]),
    (RelationshipType::Conflicts, &["conflict", "contradict", "oppose"]),
];

/// Discovers and owns the relationship edge set.
///
/// Edges are persisted under `relationships:from:{id}` and
/// `relationships:to:{id}` so both directions can be looked up without a
/// scan. The two indices are updated together under a mutex; concurrent
/// `analyze`/`remove` calls cannot interleave the read-modify-write.
pub struct RelationshipAnalyzer {
    backend: Arc<dyn StorageBackend>,
    store: Arc<ContentStore>,
    index: Arc<SimilarityIndex>,
    rules: Vec<RelationshipRule>,
    edge_lock: Mutex<()>,
}

impl RelationshipAnalyzer {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        store: Arc<ContentStore>,
        index: Arc<SimilarityIndex>,
        rules: Vec<RelationshipRule>,
    ) -> Self {
        Self {
            backend,
            store,
            index,
            rules,
            edge_lock: Mutex::new(()),
        }
    }

    /// Discover typed relationships from `item` to similar items in
    /// other categories.
    ///
    /// Every configured rule whose source category matches the item (or
    /// target category, for bidirectional rules) is evaluated: the
    /// opposite category is searched above the rule's threshold, and
    /// each candidate becomes an edge unless the rule also requires a
    /// lexical indicator that neither text contains. Self-pairs and
    /// already-persisted `(from, to, type)` edges are skipped.
    pub async fn analyze(
        &self,
        item: &ContentItem,
        only_type: Option<RelationshipType>,
    ) -> Result<Vec<Relationship>> {
        let _guard = self.edge_lock.lock().await;

        let embedding = match self.store.get_embedding(&item.id).await? {
            Some(embedding) => embedding,
            None => {
                warn!("Content {} has no embedding, skipping analysis", item.id);
                return Ok(Vec::new());
            }
        };

        let existing = self.load_edges(&from_key(&item.id)).await?;
        let mut created = Vec::new();

        for rule in &self.rules {
            if only_type.is_some_and(|t| t != rule.rel_type) {
                continue;
            }

            let opposite = if rule.source_category == item.category {
                &rule.target_category
            } else if rule.bidirectional && rule.target_category == item.category {
                &rule.source_category
            } else {
                continue;
            };

            let candidates = self
                .index
                .find_similar(
                    &embedding.vector,
                    self.index.config().max_results,
                    Some(opposite.as_str()),
                    Some(rule.threshold),
                )
                .await?;

            for candidate in candidates {
                if candidate.item.id == item.id {
                    continue;
                }
                if existing
                    .iter()
                    .chain(created.iter())
                    .any(|e: &Relationship| {
                        e.to_id == candidate.item.id && e.rel_type == rule.rel_type
                    })
                {
                    continue;
                }
                if rule.require_indicators {
                    let combined =
                        format!("{} {}", item.text, candidate.item.text).to_lowercase();
                    if !rule
                        .indicators
                        .iter()
                        .any(|w| combined.contains(&w.to_lowercase()))
                    {
                        continue;
                    }
                }

                let edge = self
                    .persist_edge(
                        &item.id,
                        &candidate.item.id,
                        rule.rel_type,
                        candidate.similarity,
                    )
                    .await?;
                created.push(edge);
            }
        }

        debug!(
            "Analysis of {} created {} edges",
            item.id,
            created.len()
        );
        Ok(created)
    }

    /// Persist a single edge, updating both direction indices.
    pub async fn add_edge(
        &self,
        from_id: &str,
        to_id: &str,
        rel_type: RelationshipType,
        strength: f32,
    ) -> Result<Relationship> {
        let _guard = self.edge_lock.lock().await;
        self.persist_edge(from_id, to_id, rel_type, strength).await
    }

    /// Classify the relation between two texts from their combined
    /// vocabulary. Defaults to `Documents` when no family matches.
    pub fn infer_type(text_a: &str, text_b: &str) -> RelationshipType {
        let combined = format!("{} {}", text_a, text_b).to_lowercase();
        for (rel_type, keywords) in TYPE_KEYWORDS {
            if keywords.iter().any(|w| combined.contains(w)) {
                return *rel_type;
            }
        }
        RelationshipType::Documents
    }

    /// Outgoing edges of `item_id`.
    pub async fn edges_from(&self, item_id: &str) -> Result<Vec<Relationship>> {
        self.load_edges(&from_key(item_id)).await
    }

    /// Incoming edges of `item_id`.
    pub async fn edges_to(&self, item_id: &str) -> Result<Vec<Relationship>> {
        self.load_edges(&to_key(item_id)).await
    }

    /// Every persisted edge, each exactly once (read from the
    /// from-index only).
    pub async fn all_edges(&self) -> Result<Vec<Relationship>> {
        let keys = self
            .backend
            .keys_with_prefix(RELATIONSHIPS_FROM_PREFIX)
            .await?;
        let mut edges = Vec::new();
        for key in keys {
            edges.extend(self.load_edges(&key).await?);
        }
        Ok(edges)
    }

    /// Delete every edge where `item_id` is source or target, fixing up
    /// the opposite-direction index of each counterparty. Returns the
    /// number of edges removed.
    pub async fn remove(&self, item_id: &str) -> Result<usize> {
        let _guard = self.edge_lock.lock().await;

        let outgoing = self.load_edges(&from_key(item_id)).await?;
        for edge in &outgoing {
            self.drop_from_index(&to_key(&edge.to_id), &edge.id).await?;
        }

        let incoming = self.load_edges(&to_key(item_id)).await?;
        for edge in &incoming {
            self.drop_from_index(&from_key(&edge.from_id), &edge.id)
                .await?;
        }

        self.backend.delete(&from_key(item_id)).await?;
        self.backend.delete(&to_key(item_id)).await?;

        let removed = outgoing.len() + incoming.len();
        if removed > 0 {
            debug!("Removed {} edges referencing {}", removed, item_id);
        }
        Ok(removed)
    }

    /// Transitively affected items, bounded by depth.
    ///
    /// Breadth-first along outgoing edges; each node is visited at most
    /// once no matter how many paths reach it, and no link is recorded
    /// at `depth >= max_depth`.
    pub async fn impact_chain(
        &self,
        item_id: &str,
        max_depth: usize,
    ) -> Result<Vec<ImpactLink>> {
        let mut links = Vec::new();
        let mut visited: HashSet<String> = HashSet::from([item_id.to_string()]);
        let mut frontier = VecDeque::from([(item_id.to_string(), 0usize)]);

        while let Some((current, depth)) = frontier.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for edge in self.load_edges(&from_key(&current)).await? {
                if !visited.insert(edge.to_id.clone()) {
                    continue;
                }
                links.push(ImpactLink {
                    depth,
                    from_id: edge.from_id.clone(),
                    to_id: edge.to_id.clone(),
                    rel_type: edge.rel_type,
                    strength: edge.strength,
                });
                frontier.push_back((edge.to_id, depth + 1));
            }
        }

        Ok(links)
    }

    async fn persist_edge(
        &self,
        from_id: &str,
        to_id: &str,
        rel_type: RelationshipType,
        strength: f32,
    ) -> Result<Relationship> {
        let edge = Relationship {
            id: Uuid::new_v4().to_string(),
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            rel_type,
            strength: strength.clamp(0.0, 1.0),
            created_at: Utc::now(),
        };

        self.append_to_index(&from_key(from_id), &edge).await?;
        self.append_to_index(&to_key(to_id), &edge).await?;

        debug!(
            "Edge {} --{}--> {} ({:.2})",
            from_id,
            rel_type.as_str(),
            to_id,
            edge.strength
        );
        Ok(edge)
    }

    async fn load_edges(&self, key: &str) -> Result<Vec<Relationship>> {
        match self.backend.get(key).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn append_to_index(&self, key: &str, edge: &Relationship) -> Result<()> {
        let mut edges = self.load_edges(key).await?;
        edges.push(edge.clone());
        self.backend
            .put(key, &serde_json::to_string(&edges)?)
            .await
    }

    async fn drop_from_index(&self, key: &str, edge_id: &str) -> Result<()> {
        let mut edges = self.load_edges(key).await?;
        edges.retain(|e| e.id != edge_id);
        if edges.is_empty() {
            self.backend.delete(key).await
        } else {
            self.backend
                .put(key, &serde_json::to_string(&edges)?)
                .await
        }
    }
}

pub fn from_key(id: &str) -> String {
    format!("{}{}", RELATIONSHIPS_FROM_PREFIX, id)
}

pub fn to_key(id: &str) -> String {
    format!("{}{}", RELATIONSHIPS_TO_PREFIX, id)
}
