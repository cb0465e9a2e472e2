use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use tracing::{debug, info};

use crate::errors::{RelationError, Result};
use crate::relationship_analyzer::RelationshipType;

/// Service configuration with environment variable support.
///
/// Category and relationship rules are strongly typed and validated
/// eagerly at startup; an unknown category reference or a threshold
/// outside [0,1] aborts initialization instead of surfacing at call time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub content: ContentConfig,
    pub search: SearchConfig,
    pub impact: ImpactConfig,
    pub conflicts: ConflictConfig,
    pub categories: Vec<CategoryRule>,
    pub relationships: Vec<RelationshipRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "redis" or "memory".
    pub backend: String,
    pub redis_uri: String,
    /// Seconds before a redis record expires; 0 disables expiry.
    pub ttl_seconds: u64,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible embeddings API.
    pub api_base: String,
    pub model: String,
    /// Environment variable holding the API key. An unset key means the
    /// provider starts in mock mode.
    pub api_key_env: String,
    pub dimensions: usize,
    /// Input is truncated to this many characters before embedding.
    pub max_input_chars: usize,
    pub batch_size: usize,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    pub max_text_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub similarity_threshold: f32,
    pub max_results: usize,
    /// Internal candidate limit used before pagination so page boundaries
    /// stay stable regardless of page size.
    pub candidate_limit: usize,
    pub default_page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactConfig {
    pub max_depth: usize,
    /// Seed items must match the change description at least this well.
    pub seed_threshold: f32,
    /// Per-hop score decay for transitively impacted items.
    pub depth_decay: f32,
}

/// Tunable conflict scoring. The multipliers are heuristics, not
/// calibrated constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictConfig {
    pub cross_category_boost: f32,
    pub contradiction_boost: f32,
    pub report_threshold: f32,
    /// Hard bound on cycle-detection work for pathological graphs.
    pub max_cycle_iterations: usize,
}

/// Classification rules for one content category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub key: String,
    /// Origin systems that map to this category.
    pub sources: Vec<String>,
    /// Lexical indicator words.
    pub indicators: Vec<String>,
    /// Metadata fields backfilled with these defaults when absent.
    pub required_metadata: HashMap<String, String>,
    pub min_text_length: usize,
    /// Structural pattern words worth a small confidence bonus.
    pub patterns: Vec<String>,
    /// Items from unmapped sources land in the category with this flag.
    #[serde(default)]
    pub fallback: bool,
}

/// Discovery rules for one relationship type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipRule {
    pub rel_type: RelationshipType,
    pub source_category: String,
    pub target_category: String,
    pub threshold: f32,
    pub bidirectional: bool,
    pub require_indicators: bool,
    pub indicators: Vec<String>,
}

impl Config {
    /// Load configuration: .env file, then TOML config file, then
    /// environment variable overrides, then eager validation.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like [`load`](Self::load) with an explicit config file path,
    /// taking precedence over `CONFIG_PATH`.
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        if Path::new(".env").exists() {
            dotenv::dotenv().ok();
            debug!("Loaded .env file");
        }

        let config_path = match path {
            Some(path) => path.to_string(),
            None => env::var("CONFIG_PATH").unwrap_or_else(|_| "config/relations.toml".to_string()),
        };

        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        config.override_from_env();
        config.validate()?;

        info!("Configuration loaded: {}", config.summary());
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RelationError::Config(format!("failed to read {}: {}", path, e)))?;
        toml::from_str(&content)
            .map_err(|e| RelationError::Config(format!("failed to parse {}: {}", path, e)))
    }

    pub fn override_from_env(&mut self) {
        if let Ok(val) = env::var("LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = env::var("STORAGE_BACKEND") {
            self.storage.backend = val;
        }
        if let Ok(val) = env::var("REDIS_URI") {
            self.storage.redis_uri = val;
        }
        if let Ok(val) = env::var("STORAGE_TTL_SECONDS") {
            if let Ok(num) = val.parse() {
                self.storage.ttl_seconds = num;
            }
        }
        if let Ok(val) = env::var("EMBEDDING_API_BASE") {
            self.embedding.api_base = val;
        }
        if let Ok(val) = env::var("EMBEDDING_MODEL") {
            self.embedding.model = val;
        }
        if let Ok(val) = env::var("EMBEDDING_DIMENSIONS") {
            if let Ok(num) = val.parse() {
                self.embedding.dimensions = num;
            }
        }
        if let Ok(val) = env::var("EMBEDDING_BATCH_SIZE") {
            if let Ok(num) = val.parse() {
                self.embedding.batch_size = num;
            }
        }
        if let Ok(val) = env::var("SIMILARITY_THRESHOLD") {
            if let Ok(num) = val.parse() {
                self.search.similarity_threshold = num;
            }
        }
        if let Ok(val) = env::var("MAX_TEXT_LENGTH") {
            if let Ok(num) = val.parse() {
                self.content.max_text_length = num;
            }
        }
    }

    /// Fail fast on rule mistakes that would otherwise only show up as
    /// wrong answers at query time.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        match self.storage.backend.as_str() {
            "redis" | "memory" => {}
            other => errors.push(format!(
                "unknown storage backend '{}' (expected 'redis' or 'memory')",
                other
            )),
        }

        if self.embedding.dimensions == 0 {
            errors.push("embedding.dimensions must be greater than 0".to_string());
        }
        if self.embedding.batch_size == 0 {
            errors.push("embedding.batch_size must be greater than 0".to_string());
        }
        if self.content.max_text_length == 0 {
            errors.push("content.max_text_length must be greater than 0".to_string());
        }

        if self.categories.is_empty() {
            errors.push("at least one category must be configured".to_string());
        }
        let mut keys = std::collections::HashSet::new();
        for rule in &self.categories {
            if !keys.insert(rule.key.as_str()) {
                errors.push(format!("duplicate category key '{}'", rule.key));
            }
        }
        if !self.categories.iter().any(|c| c.fallback) {
            errors.push("exactly one category must be marked as the fallback".to_string());
        }

        if !(0.0..=1.0).contains(&self.search.similarity_threshold) {
            errors.push(format!(
                "search.similarity_threshold {} outside [0, 1]",
                self.search.similarity_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.impact.seed_threshold) {
            errors.push(format!(
                "impact.seed_threshold {} outside [0, 1]",
                self.impact.seed_threshold
            ));
        }

        for rule in &self.relationships {
            if !keys.contains(rule.source_category.as_str()) {
                errors.push(format!(
                    "relationship '{}' references unknown source category '{}'",
                    rule.rel_type.as_str(),
                    rule.source_category
                ));
            }
            if !keys.contains(rule.target_category.as_str()) {
                errors.push(format!(
                    "relationship '{}' references unknown target category '{}'",
                    rule.rel_type.as_str(),
                    rule.target_category
                ));
            }
            if !(0.0..=1.0).contains(&rule.threshold) {
                errors.push(format!(
                    "relationship '{}' threshold {} outside [0, 1]",
                    rule.rel_type.as_str(),
                    rule.threshold
                ));
            }
            if rule.require_indicators && rule.indicators.is_empty() {
                errors.push(format!(
                    "relationship '{}' requires indicators but lists none",
                    rule.rel_type.as_str()
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RelationError::Config(errors.join("; ")))
        }
    }

    pub fn fallback_category(&self) -> &CategoryRule {
        self.categories
            .iter()
            .find(|c| c.fallback)
            .unwrap_or(&self.categories[0])
    }

    pub fn category(&self, key: &str) -> Option<&CategoryRule> {
        self.categories.iter().find(|c| c.key == key)
    }

    pub fn category_keys(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.key.clone()).collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "backend={}, embedding={}@{}d, categories={}, relationship_types={}",
            self.storage.backend,
            self.embedding.model,
            self.embedding.dimensions,
            self.categories.len(),
            self.relationships.len()
        )
    }
}

fn metadata_defaults(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                name: "vector-relations".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                log_level: "info".to_string(),
            },
            storage: StorageConfig {
                backend: "memory".to_string(),
                redis_uri: "redis://127.0.0.1:6379".to_string(),
                ttl_seconds: 0,
                connection_timeout: 10,
            },
            embedding: EmbeddingConfig {
                api_base: "https://api.openai.com/v1".to_string(),
                model: "text-embedding-3-small".to_string(),
                api_key_env: "EMBEDDING_API_KEY".to_string(),
                dimensions: 1536,
                max_input_chars: 8000,
                batch_size: 16,
                timeout_seconds: 30,
                max_retries: 3,
            },
            content: ContentConfig {
                max_text_length: 50_000,
            },
            search: SearchConfig {
                similarity_threshold: 0.7,
                max_results: 50,
                candidate_limit: 10_000,
                default_page_size: 10,
            },
            impact: ImpactConfig {
                max_depth: 3,
                seed_threshold: 0.6,
                depth_decay: 0.8,
            },
            conflicts: ConflictConfig {
                cross_category_boost: 1.2,
                contradiction_boost: 1.5,
                report_threshold: 0.5,
                max_cycle_iterations: 100_000,
            },
            categories: vec![
                CategoryRule {
                    key: "knowledge".to_string(),
                    sources: words(&["confluence", "wiki"]),
                    indicators: words(&[
                        "guide",
                        "documentation",
                        "how to",
                        "overview",
                        "setup",
                        "manual",
                    ]),
                    required_metadata: metadata_defaults(&[
                        ("space", "general"),
                        ("author", "unknown"),
                    ]),
                    min_text_length: 80,
                    patterns: words(&["guide", "documentation", "manual"]),
                    fallback: true,
                },
                CategoryRule {
                    key: "backlog".to_string(),
                    sources: words(&["jira"]),
                    indicators: words(&[
                        "story",
                        "epic",
                        "ticket",
                        "sprint",
                        "acceptance",
                        "priority",
                    ]),
                    required_metadata: metadata_defaults(&[
                        ("project", "unscoped"),
                        ("status", "open"),
                    ]),
                    min_text_length: 40,
                    patterns: words(&["as a", "acceptance criteria"]),
                    fallback: false,
                },
                CategoryRule {
                    key: "platform".to_string(),
                    sources: words(&["github"]),
                    indicators: words(&[
                        "implementation",
                        "module",
                        "function",
                        "class",
                        "endpoint",
                        "api",
                    ]),
                    required_metadata: metadata_defaults(&[
                        ("repository", "unknown"),
                        ("path", "unknown"),
                    ]),
                    min_text_length: 40,
                    patterns: words(&["implementation", "source"]),
                    fallback: false,
                },
                CategoryRule {
                    key: "insight".to_string(),
                    sources: words(&["intercom"]),
                    indicators: words(&[
                        "customer",
                        "feedback",
                        "request",
                        "issue",
                        "complaint",
                        "conversation",
                    ]),
                    required_metadata: metadata_defaults(&[("customer", "anonymous")]),
                    min_text_length: 20,
                    patterns: words(&["feedback", "request"]),
                    fallback: false,
                },
            ],
            relationships: vec![
                RelationshipRule {
                    rel_type: RelationshipType::Documents,
                    source_category: "knowledge".to_string(),
                    target_category: "platform".to_string(),
                    threshold: 0.7,
                    bidirectional: true,
                    require_indicators: false,
                    indicators: words(&["document", "guide", "manual"]),
                },
                RelationshipRule {
                    rel_type: RelationshipType::Implements,
                    source_category: "platform".to_string(),
                    target_category: "backlog".to_string(),
                    threshold: 0.75,
                    bidirectional: false,
                    require_indicators: true,
                    indicators: words(&["implement", "code", "source"]),
                },
                RelationshipRule {
                    rel_type: RelationshipType::Requires,
                    source_category: "backlog".to_string(),
                    target_category: "platform".to_string(),
                    threshold: 0.75,
                    bidirectional: false,
                    require_indicators: true,
                    indicators: words(&["require", "need", "dependency"]),
                },
                RelationshipRule {
                    rel_type: RelationshipType::Affects,
                    source_category: "insight".to_string(),
                    target_category: "backlog".to_string(),
                    threshold: 0.7,
                    bidirectional: true,
                    require_indicators: false,
                    indicators: words(&["affect", "impact", "change"]),
                },
                RelationshipRule {
                    rel_type: RelationshipType::Depends,
                    source_category: "platform".to_string(),
                    target_category: "platform".to_string(),
                    threshold: 0.8,
                    bidirectional: false,
                    require_indicators: true,
                    indicators: words(&["depend", "rely", "build"]),
                },
                RelationshipRule {
                    rel_type: RelationshipType::Conflicts,
                    source_category: "knowledge".to_string(),
                    target_category: "knowledge".to_string(),
                    threshold: 0.75,
                    bidirectional: true,
                    require_indicators: true,
                    indicators: words(&["conflict", "contradict", "oppose"]),
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fallback_category().key, "knowledge");
        assert_eq!(config.categories.len(), 4);
    }

    #[test]
    fn test_env_override() {
        env::set_var("STORAGE_BACKEND", "redis");
        env::set_var("SIMILARITY_THRESHOLD", "0.85");

        let mut config = Config::default();
        config.override_from_env();

        assert_eq!(config.storage.backend, "redis");
        assert!((config.search.similarity_threshold - 0.85).abs() < f32::EPSILON);

        env::remove_var("STORAGE_BACKEND");
        env::remove_var("SIMILARITY_THRESHOLD");
    }

    #[test]
    fn test_validation_rejects_unknown_category_reference() {
        let mut config = Config::default();
        config.relationships[0].source_category = "nonexistent".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown source category"));
    }

    #[test]
    fn test_validation_rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.relationships[0].threshold = 1.5;
        assert!(config.validate().is_err());

        config.relationships[0].threshold = 0.7;
        config.embedding.dimensions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unknown_backend() {
        let mut config = Config::default();
        config.storage.backend = "sqlite".to_string();
        assert!(config.validate().is_err());
    }
}
