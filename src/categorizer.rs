use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::{CategoryRule, Config};

/// Weighted confidence components. The weights sum to 1.0 so a perfect
/// match scores exactly 1.0 before clamping.
const SOURCE_WEIGHT: f32 = 0.4;
const INDICATOR_WEIGHT: f32 = 0.3;
const LENGTH_WEIGHT: f32 = 0.2;
const PATTERN_WEIGHT: f32 = 0.1;

/// Outcome of classifying one content item.
#[derive(Debug, Clone, Serialize)]
pub struct Categorization {
    pub category: String,
    pub confidence: f32,
    /// Input metadata plus defaults for missing required fields.
    pub metadata: HashMap<String, String>,
}

/// One row of the advisory ranking returned by [`ContentCategorizer::suggest`].
#[derive(Debug, Clone, Serialize)]
pub struct CategorySuggestion {
    pub category: String,
    pub score: f32,
}

/// Classifies raw content into the configured category set.
///
/// Pure over its inputs and the static rules: identical input always
/// yields identical category and confidence.
pub struct ContentCategorizer {
    categories: Vec<CategoryRule>,
    fallback_key: String,
    max_text_length: usize,
}

impl ContentCategorizer {
    pub fn new(config: &Config) -> Self {
        Self {
            categories: config.categories.clone(),
            fallback_key: config.fallback_category().key.clone(),
            max_text_length: config.content.max_text_length,
        }
    }

    /// Classify `(text, source)` into a category.
    ///
    /// An unmapped source falls back to the configured default category
    /// with a warning; this never fails.
    pub fn categorize(
        &self,
        text: &str,
        source: &str,
        metadata: &HashMap<String, String>,
    ) -> Categorization {
        let rule = match self.rule_for_source(source) {
            Some(rule) => rule,
            None => {
                warn!(
                    "No category maps source '{}', falling back to '{}'",
                    source, self.fallback_key
                );
                self.rule(&self.fallback_key)
                    .expect("fallback category is validated at startup")
            }
        };

        let confidence = self.score(rule, text, source);
        let metadata = self.backfill_metadata(rule, metadata);

        debug!(
            "Categorized {} chars from '{}' as '{}' ({:.2})",
            text.len(),
            source,
            rule.key,
            confidence
        );

        Categorization {
            category: rule.key.clone(),
            confidence,
            metadata,
        }
    }

    /// Score every configured category for `(text, source)`, sorted
    /// descending. Advisory only; storage decisions go through
    /// [`categorize`](Self::categorize).
    pub fn suggest(&self, text: &str, source: &str) -> Vec<CategorySuggestion> {
        let mut suggestions: Vec<CategorySuggestion> = self
            .categories
            .iter()
            .map(|rule| CategorySuggestion {
                category: rule.key.clone(),
                score: self.score(rule, text, source),
            })
            .collect();

        suggestions.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        suggestions
    }

    /// Check `(text, category, source, metadata)` against the rules,
    /// returning every violation instead of failing fast.
    pub fn validate(
        &self,
        text: &str,
        category: &str,
        source: &str,
        metadata: &HashMap<String, String>,
    ) -> Vec<String> {
        let mut errors = Vec::new();

        let rule = match self.rule(category) {
            Some(rule) => rule,
            None => {
                errors.push(format!("unknown category '{}'", category));
                return errors;
            }
        };

        if !rule.sources.iter().any(|s| s == source) {
            errors.push(format!(
                "source '{}' is not valid for category '{}'",
                source, category
            ));
        }

        if !self.contains_any(text, &rule.indicators) {
            errors.push(format!(
                "text contains none of the '{}' indicator words",
                category
            ));
        }

        for field in rule.required_metadata.keys() {
            if !metadata.contains_key(field) {
                errors.push(format!("missing required metadata field '{}'", field));
            }
        }

        if text.len() > self.max_text_length {
            errors.push(format!(
                "text length {} exceeds maximum {}",
                text.len(),
                self.max_text_length
            ));
        }

        errors
    }

    /// Input metadata plus configured defaults for missing required
    /// fields. Present fields are never overwritten.
    pub fn backfill_metadata(
        &self,
        rule: &CategoryRule,
        metadata: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut enriched = metadata.clone();
        for (field, default) in &rule.required_metadata {
            enriched
                .entry(field.clone())
                .or_insert_with(|| default.clone());
        }
        enriched
    }

    pub fn rule(&self, category: &str) -> Option<&CategoryRule> {
        self.categories.iter().find(|c| c.key == category)
    }

    pub fn max_text_length(&self) -> usize {
        self.max_text_length
    }

    fn rule_for_source(&self, source: &str) -> Option<&CategoryRule> {
        self.categories
            .iter()
            .find(|c| c.sources.iter().any(|s| s == source))
    }

    fn score(&self, rule: &CategoryRule, text: &str, source: &str) -> f32 {
        let mut confidence = 0.0;

        if rule.sources.iter().any(|s| s == source) {
            confidence += SOURCE_WEIGHT;
        }
        if self.contains_any(text, &rule.indicators) {
            confidence += INDICATOR_WEIGHT;
        }
        if text.len() >= rule.min_text_length {
            confidence += LENGTH_WEIGHT;
        }
        if self.contains_any(text, &rule.patterns) {
            confidence += PATTERN_WEIGHT;
        }

        confidence.clamp(0.0, 1.0)
    }

    fn contains_any(&self, text: &str, words: &[String]) -> bool {
        let lower = text.to_lowercase();
        words.iter().any(|w| lower.contains(&w.to_lowercase()))
    }
}
