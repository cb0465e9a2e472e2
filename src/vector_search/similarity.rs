use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

use crate::config::SearchConfig;
use crate::content_store::{ContentItem, ContentStore};
use crate::errors::Result;

/// Cosine similarity between two vectors, clamped to [-1, 1].
///
/// Zero-magnitude or mismatched-length vectors yield 0.0 rather than a
/// division error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

/// One item ranked against a query vector.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityMatch {
    pub item: ContentItem,
    pub similarity: f32,
}

/// One page of ranked search results.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub results: Vec<SimilarityMatch>,
    pub total_results: usize,
    pub total_pages: usize,
    pub page: usize,
    pub page_size: usize,
}

impl SearchResults {
    pub fn empty(page: usize, page_size: usize) -> Self {
        Self {
            results: Vec::new(),
            total_results: 0,
            total_pages: 0,
            page,
            page_size,
        }
    }
}

/// Brute-force cosine ranking over every stored embedding.
pub struct SimilarityIndex {
    store: Arc<ContentStore>,
    config: SearchConfig,
}

impl SimilarityIndex {
    pub fn new(store: Arc<ContentStore>, config: SearchConfig) -> Self {
        Self { store, config }
    }

    /// The stored items most similar to `query`, above `threshold`
    /// (default from configuration), sorted by similarity descending
    /// with ties broken by most-recently-updated first.
    pub async fn find_similar(
        &self,
        query: &[f32],
        limit: usize,
        category: Option<&str>,
        threshold: Option<f32>,
    ) -> Result<Vec<SimilarityMatch>> {
        let threshold = threshold.unwrap_or(self.config.similarity_threshold);

        let mut matches: Vec<SimilarityMatch> = self
            .store
            .embedded_items()
            .await?
            .into_iter()
            .filter(|(item, _)| category.map_or(true, |c| item.category == c))
            .filter_map(|(item, embedding)| {
                let similarity = cosine_similarity(query, &embedding.vector);
                if similarity >= threshold {
                    Some(SimilarityMatch { item, similarity })
                } else {
                    None
                }
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.item.updated_at.cmp(&a.item.updated_at))
        });
        matches.truncate(limit);

        debug!(
            "find_similar: {} matches above {:.2} (category: {:?})",
            matches.len(),
            threshold,
            category
        );
        Ok(matches)
    }

    /// Embed the query text and return one page of ranked results.
    ///
    /// The full candidate set is ranked before paginating, so page
    /// boundaries stay stable regardless of page size. No qualifying
    /// content yields an empty result set, not an error.
    pub async fn search(
        &self,
        query_text: &str,
        category: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> Result<SearchResults> {
        let page = page.max(1);
        let page_size = if page_size == 0 {
            self.config.default_page_size
        } else {
            page_size
        };

        let query = self.store.provider().embed(query_text).await;
        let matches = self
            .find_similar(&query, self.config.candidate_limit, category, None)
            .await?;

        if matches.is_empty() {
            return Ok(SearchResults::empty(page, page_size));
        }

        let total_results = matches.len();
        let total_pages = total_results.div_ceil(page_size);
        let results = matches
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();

        Ok(SearchResults {
            results,
            total_results,
            total_pages,
            page,
            page_size,
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorizer::ContentCategorizer;
    use crate::config::Config;
    use crate::storage::MemoryBackend;
    use crate::vector_search::EmbeddingProvider;
    use std::collections::HashMap;

    #[test]
    fn test_cosine_bounds_and_symmetry() {
        let a = vec![0.3, -0.7, 0.2, 0.9];
        let b = vec![-0.5, 0.1, 0.8, -0.2];

        let ab = cosine_similarity(&a, &b);
        let ba = cosine_similarity(&b, &a);

        assert!((-1.0..=1.0).contains(&ab));
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_identical_vector_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite_is_minus_one() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_magnitude_is_zero() {
        let zero = vec![0.0, 0.0, 0.0];
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&zero, &v), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn test_cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    fn fixture() -> (Arc<ContentStore>, SimilarityIndex) {
        let mut config = Config::default();
        config.embedding.api_key_env = "EMBEDDING_TEST_KEY_UNSET".to_string();
        config.embedding.dimensions = 128;

        let store = Arc::new(ContentStore::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(ContentCategorizer::new(&config)),
            Arc::new(EmbeddingProvider::new(&config.embedding).unwrap()),
        ));
        let index = SimilarityIndex::new(store.clone(), config.search);
        (store, index)
    }

    async fn seed(store: &ContentStore, text: &str, source: &str) -> ContentItem {
        let (item, _) = store
            .put(text.to_string(), source.to_string(), HashMap::new(), None)
            .await
            .unwrap();
        item
    }

    #[tokio::test]
    async fn test_find_similar_respects_threshold_and_category() {
        let (store, index) = fixture();
        let guide = seed(
            &store,
            "Single sign-on saml azure integration guide",
            "confluence",
        )
        .await;
        seed(&store, "Quarterly roadmap planning ticket sprint", "jira").await;

        let query = store.provider().embed(&guide.text).await;
        let matches = index
            .find_similar(&query, 10, Some("knowledge"), Some(0.9))
            .await
            .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].item.id, guide.id);
        assert!(matches[0].similarity > 0.99);

        let wrong_category = index
            .find_similar(&query, 10, Some("backlog"), Some(0.9))
            .await
            .unwrap();
        assert!(wrong_category.is_empty());
    }

    #[tokio::test]
    async fn test_ties_broken_by_most_recently_updated() {
        let (store, index) = fixture();
        let older = seed(&store, "Identical guide text", "confluence").await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = seed(&store, "Identical guide text", "confluence").await;

        let query = store.provider().embed("Identical guide text").await;
        let matches = index.find_similar(&query, 10, None, Some(0.9)).await.unwrap();

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].item.id, newer.id);
        assert_eq!(matches[1].item.id, older.id);
    }

    #[tokio::test]
    async fn test_search_empty_store_returns_zero_shape() {
        let (_, index) = fixture();

        let results = index.search("anything at all", None, 1, 10).await.unwrap();

        assert!(results.results.is_empty());
        assert_eq!(results.total_results, 0);
        assert_eq!(results.total_pages, 0);
    }

    #[tokio::test]
    async fn test_search_pagination_is_stable() {
        let (store, index) = fixture();
        for i in 0..5 {
            seed(
                &store,
                &format!("saml sso azure integration guide revision {}", i),
                "confluence",
            )
            .await;
        }

        let all = index
            .search("saml sso azure integration guide", None, 1, 10)
            .await
            .unwrap();
        assert_eq!(all.total_results, 5);
        assert_eq!(all.total_pages, 1);

        let page1 = index
            .search("saml sso azure integration guide", None, 1, 2)
            .await
            .unwrap();
        let page2 = index
            .search("saml sso azure integration guide", None, 2, 2)
            .await
            .unwrap();
        let page3 = index
            .search("saml sso azure integration guide", None, 3, 2)
            .await
            .unwrap();

        assert_eq!(page1.total_pages, 3);
        let paged: Vec<String> = page1
            .results
            .iter()
            .chain(&page2.results)
            .chain(&page3.results)
            .map(|m| m.item.id.clone())
            .collect();
        let full: Vec<String> = all.results.iter().map(|m| m.item.id.clone()).collect();
        assert_eq!(paged, full);
    }
}
