use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::config::EmbeddingConfig;
use crate::errors::{RelationError, Result};
use crate::retry::{presets, retry_with_backoff, RetryConfig};

lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(r"[a-z0-9]+").unwrap();
}

/// Counters for embedding operations.
#[derive(Debug, Clone, Serialize, Default)]
pub struct EmbeddingStats {
    pub real_embeddings: u64,
    pub mock_embeddings: u64,
    pub batch_operations: u64,
}

/// Health surface for the provider, exposed so callers can tell real
/// similarity results from degraded ones.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingHealth {
    pub backend_configured: bool,
    pub circuit: CircuitState,
    /// True when new embeddings are currently served from the
    /// deterministic fallback instead of the backend.
    pub mock_active: bool,
    pub model: String,
    pub dimensions: usize,
    pub real_embeddings: u64,
    pub mock_embeddings: u64,
}

/// Text-to-vector provider.
///
/// Calls an OpenAI-compatible embeddings API when an API key is
/// configured; otherwise, or whenever the backend fails, serves a
/// deterministic mock vector derived from token hashes. Mock vectors
/// keep the pipeline functional offline but carry no semantic meaning
/// beyond shared vocabulary; [`health`](Self::health) reports when
/// they are active.
pub struct EmbeddingProvider {
    config: EmbeddingConfig,
    client: reqwest::Client,
    api_key: Option<String>,
    breaker: CircuitBreaker,
    stats: Arc<RwLock<EmbeddingStats>>,
}

impl EmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());

        if api_key.is_some() {
            info!(
                "Embedding backend: {} ({}d) at {}",
                config.model, config.dimensions, config.api_base
            );
        } else {
            warn!(
                "{} not set, embedding provider starts in mock mode",
                config.api_key_env
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| RelationError::Embedding(format!("http client init failed: {}", e)))?;

        Ok(Self {
            config: config.clone(),
            client,
            api_key,
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            stats: Arc::new(RwLock::new(EmbeddingStats::default())),
        })
    }

    /// Embed a single text. Never fails: backend trouble degrades to a
    /// mock vector.
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        let truncated = self.truncate(text).to_string();

        match self.backend_vectors(std::slice::from_ref(&truncated)).await {
            Some(mut vectors) => match vectors.remove(0) {
                Some(vector) => {
                    self.note_real(1).await;
                    vector
                }
                None => {
                    self.note_mock(1).await;
                    self.mock_vector(&truncated)
                }
            },
            None => {
                self.note_mock(1).await;
                self.mock_vector(&truncated)
            }
        }
    }

    /// Embed many texts in fixed-size chunks.
    ///
    /// A backend failure degrades only the affected texts to mock
    /// vectors; the rest of the batch keeps real results.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let mut vectors = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.config.batch_size.max(1)) {
            let truncated: Vec<String> =
                chunk.iter().map(|t| self.truncate(t).to_string()).collect();

            match self.backend_vectors(&truncated).await {
                Some(results) => {
                    for (text, result) in truncated.iter().zip(results) {
                        match result {
                            Some(vector) => {
                                self.note_real(1).await;
                                vectors.push(vector);
                            }
                            None => {
                                self.note_mock(1).await;
                                vectors.push(self.mock_vector(text));
                            }
                        }
                    }
                }
                None => {
                    self.note_mock(truncated.len() as u64).await;
                    vectors.extend(truncated.iter().map(|t| self.mock_vector(t)));
                }
            }
        }

        let mut stats = self.stats.write().await;
        stats.batch_operations += 1;

        vectors
    }

    pub async fn health(&self) -> EmbeddingHealth {
        let stats = self.stats.read().await.clone();
        let circuit = self.breaker.state().await;

        EmbeddingHealth {
            backend_configured: self.api_key.is_some(),
            circuit,
            mock_active: self.api_key.is_none() || circuit == CircuitState::Open,
            model: if self.api_key.is_some() {
                self.config.model.clone()
            } else {
                "mock".to_string()
            },
            dimensions: self.config.dimensions,
            real_embeddings: stats.real_embeddings,
            mock_embeddings: stats.mock_embeddings,
        }
    }

    pub async fn stats(&self) -> EmbeddingStats {
        self.stats.read().await.clone()
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    /// The model label recorded on stored embeddings.
    pub async fn model_label(&self) -> String {
        if self.health().await.mock_active {
            "mock".to_string()
        } else {
            self.config.model.clone()
        }
    }

    /// One backend round-trip for a chunk of texts, gated by the
    /// circuit breaker and retried with backoff. `None` means the
    /// whole chunk must fall back; a `None` element means only that
    /// text came back unusable (missing or wrong dimension).
    async fn backend_vectors(&self, texts: &[String]) -> Option<Vec<Option<Vec<f32>>>> {
        let api_key = self.api_key.as_deref()?;

        if !self.breaker.allow_request().await {
            debug!("Embedding circuit open, skipping backend call");
            return None;
        }

        let retry_config = RetryConfig {
            max_retries: self.config.max_retries,
            ..presets::embedding()
        };

        let result = retry_with_backoff(
            || self.request_embeddings(texts, api_key),
            retry_config,
        )
        .await;

        match result {
            Ok(vectors) => {
                self.breaker.record_success().await;
                Some(
                    (0..texts.len())
                        .map(|i| {
                            vectors
                                .get(i)
                                .filter(|v| v.len() == self.config.dimensions)
                                .cloned()
                        })
                        .collect(),
                )
            }
            Err(e) => {
                warn!("Embedding backend failed, degrading to mock: {}", e);
                self.breaker.record_failure().await;
                None
            }
        }
    }

    async fn request_embeddings(&self, texts: &[String], api_key: &str) -> Result<Vec<Vec<f32>>> {
        let url = format!(
            "{}/embeddings",
            self.config.api_base.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": self.config.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| RelationError::Embedding(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RelationError::Embedding(format!(
                "backend returned {}: {}",
                status, detail
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RelationError::Embedding(format!("malformed response: {}", e)))?;

        parse_embedding_response(&json)
    }

    /// Deterministic fallback vector: each token hashes to a handful of
    /// dimensions that accumulate weight, then the vector is
    /// L2-normalized. Identical text gives an identical vector and
    /// shared vocabulary gives cosine overlap; nothing more.
    pub fn mock_vector(&self, text: &str) -> Vec<f32> {
        let dims = self.config.dimensions;
        let mut vector = vec![0.0f32; dims];
        let lower = text.to_lowercase();

        for token in TOKEN_RE.find_iter(&lower) {
            let digest = Sha256::digest(token.as_str().as_bytes());
            for chunk in digest.chunks_exact(8).take(3) {
                let raw = u64::from_le_bytes([
                    chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
                ]);
                vector[(raw % dims as u64) as usize] += 1.0;
            }
        }

        let magnitude = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }

    fn truncate<'a>(&self, text: &'a str) -> &'a str {
        match text.char_indices().nth(self.config.max_input_chars) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }

    async fn note_real(&self, count: u64) {
        let mut stats = self.stats.write().await;
        stats.real_embeddings += count;
    }

    async fn note_mock(&self, count: u64) {
        let mut stats = self.stats.write().await;
        stats.mock_embeddings += count;
    }
}

fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RelationError::Embedding("response missing data array".to_string()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let values = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| RelationError::Embedding("response item missing embedding".to_string()))?;
        embeddings.push(
            values
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }

    Ok(embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn provider() -> EmbeddingProvider {
        let mut config = Config::default().embedding;
        // Point at an env var that is never set so tests run in mock mode.
        config.api_key_env = "EMBEDDING_TEST_KEY_UNSET".to_string();
        config.dimensions = 256;
        EmbeddingProvider::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_mock_vector_is_deterministic() {
        let p = provider();
        let a = p.embed("single sign-on setup guide").await;
        let b = p.embed("single sign-on setup guide").await;

        assert_eq!(a.len(), 256);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_mock_vector_is_normalized() {
        let p = provider();
        let v = p.embed("some text to embed").await;
        let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_empty_text_yields_zero_vector() {
        let p = provider();
        let v = p.embed("").await;
        assert_eq!(v.len(), 256);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn test_shared_vocabulary_overlaps() {
        let p = provider();
        let a = p.embed("sso saml azure integration guide").await;
        let b = p.embed("sso saml azure integration code").await;
        let c = p.embed("quarterly revenue forecast spreadsheet").await;

        let close = crate::vector_search::cosine_similarity(&a, &b);
        let far = crate::vector_search::cosine_similarity(&a, &c);

        assert!(close > 0.7, "shared vocabulary similarity was {}", close);
        assert!(far < 0.3, "disjoint vocabulary similarity was {}", far);
    }

    #[tokio::test]
    async fn test_batch_returns_vector_per_text() {
        let p = provider();
        let texts = vec![
            "first document".to_string(),
            "second document".to_string(),
            "third document".to_string(),
        ];

        let vectors = p.embed_batch(&texts).await;

        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], p.embed("first document").await);

        let stats = p.stats().await;
        assert_eq!(stats.mock_embeddings, 4);
        assert_eq!(stats.batch_operations, 1);
    }

    #[tokio::test]
    async fn test_health_reports_mock_mode() {
        let p = provider();
        p.embed("anything").await;

        let health = p.health().await;
        assert!(!health.backend_configured);
        assert!(health.mock_active);
        assert_eq!(health.model, "mock");
        assert_eq!(health.mock_embeddings, 1);
        assert_eq!(health.real_embeddings, 0);
    }

    #[tokio::test]
    async fn test_truncation_is_char_boundary_safe() {
        let mut config = Config::default().embedding;
        config.api_key_env = "EMBEDDING_TEST_KEY_UNSET".to_string();
        config.dimensions = 64;
        config.max_input_chars = 3;
        let p = EmbeddingProvider::new(&config).unwrap();

        // Multi-byte characters must not split mid-codepoint.
        let v = p.embed("héllo wörld").await;
        assert_eq!(v.len(), 64);
    }
}
