use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ImpactConfig;
use crate::content_store::{ContentItem, ContentStore};
use crate::errors::Result;
use crate::relationship_analyzer::{RelationshipAnalyzer, RelationshipType};
use crate::vector_search::SimilarityIndex;

/// One item affected by a proposed change, with a ranked score.
#[derive(Debug, Clone, Serialize)]
pub struct ImpactedItem {
    pub item: ContentItem,
    /// Seed similarity for directly matched items; decayed
    /// `seed × strength × decay^hops` for transitively reached ones.
    pub score: f32,
    /// 0 for direct matches, hop count otherwise.
    pub depth: usize,
    /// The edge type that reached this item, None for direct matches.
    pub via: Option<RelationshipType>,
}

/// Ranks the items a change description would touch.
///
/// The description is embedded and matched against stored content to
/// find seed items; each seed's impact chain is then expanded through
/// the relationship graph, with scores decaying per hop so nearby items
/// outrank distant ones.
pub struct ImpactAnalyzer {
    store: Arc<ContentStore>,
    index: Arc<SimilarityIndex>,
    analyzer: Arc<RelationshipAnalyzer>,
    config: ImpactConfig,
}

impl ImpactAnalyzer {
    pub fn new(
        store: Arc<ContentStore>,
        index: Arc<SimilarityIndex>,
        analyzer: Arc<RelationshipAnalyzer>,
        config: ImpactConfig,
    ) -> Self {
        Self {
            store,
            index,
            analyzer,
            config,
        }
    }

    /// Items impacted by `description`, best score first.
    ///
    /// `categories` restricts where seeds are searched, not what the
    /// chains may reach. An empty store yields an empty list, not an
    /// error.
    pub async fn analyze_change(
        &self,
        description: &str,
        categories: Option<&[String]>,
        max_depth: Option<usize>,
    ) -> Result<Vec<ImpactedItem>> {
        let max_depth = max_depth.unwrap_or(self.config.max_depth);
        let query = self.store.provider().embed(description).await;

        let mut seeds = Vec::new();
        match categories {
            Some(keys) => {
                for key in keys {
                    seeds.extend(
                        self.index
                            .find_similar(
                                &query,
                                self.index.config().max_results,
                                Some(key.as_str()),
                                Some(self.config.seed_threshold),
                            )
                            .await?,
                    );
                }
            }
            None => {
                seeds = self
                    .index
                    .find_similar(
                        &query,
                        self.index.config().max_results,
                        None,
                        Some(self.config.seed_threshold),
                    )
                    .await?;
            }
        }

        if seeds.is_empty() {
            debug!("No seed items matched the change description");
            return Ok(Vec::new());
        }

        // Best score wins when several seeds or paths reach one item.
        let mut ranked: HashMap<String, ImpactedItem> = HashMap::new();
        for seed in seeds {
            let seed_score = seed.similarity;
            let seed_id = seed.item.id.clone();

            merge(
                &mut ranked,
                ImpactedItem {
                    item: seed.item,
                    score: seed_score,
                    depth: 0,
                    via: None,
                },
            );

            for link in self.analyzer.impact_chain(&seed_id, max_depth).await? {
                let hops = link.depth + 1;
                let score = seed_score
                    * link.strength
                    * self.config.depth_decay.powi(hops as i32);

                let item = match self.store.get(&link.to_id).await? {
                    Some(item) => item,
                    None => {
                        warn!("Impact chain references missing content {}", link.to_id);
                        continue;
                    }
                };

                merge(
                    &mut ranked,
                    ImpactedItem {
                        item,
                        score,
                        depth: hops,
                        via: Some(link.rel_type),
                    },
                );
            }
        }

        let mut impacted: Vec<ImpactedItem> = ranked.into_values().collect();
        impacted.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(
            "Change description impacts {} items (max_depth={})",
            impacted.len(),
            max_depth
        );
        Ok(impacted)
    }
}

fn merge(ranked: &mut HashMap<String, ImpactedItem>, candidate: ImpactedItem) {
    match ranked.get_mut(&candidate.item.id) {
        Some(existing) if existing.score >= candidate.score => {}
        Some(existing) => *existing = candidate,
        None => {
            ranked.insert(candidate.item.id.clone(), candidate);
        }
    }
}
