use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ConflictConfig;
use crate::content_store::{ContentItem, ContentStore};
use crate::errors::Result;
use crate::relationship_analyzer::{Relationship, RelationshipAnalyzer, RelationshipType};

/// A structural anomaly in the relationship graph.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "conflict_type", rename_all = "snake_case")]
pub enum GraphConflict {
    /// Edges exist in both directions between a pair with different
    /// types; the same pair should not hold two semantically different
    /// relations.
    BidirectionalMismatch {
        from_id: String,
        to_id: String,
        forward: RelationshipType,
        backward: RelationshipType,
    },
    /// A dependency chain that loops back on itself.
    CircularDependency { cycle: Vec<String> },
}

/// A content-level contradiction between two similar items.
#[derive(Debug, Clone, Serialize)]
pub struct ContentConflict {
    pub a_id: String,
    pub b_id: String,
    pub score: f32,
    pub cross_category: bool,
    /// Matched contradiction pairs, e.g. "working/broken".
    pub contradictions: Vec<String>,
}

/// Textually contradictory indicator pairs. A pair fires when one text
/// contains the first member (and not the second) while the other text
/// contains the second.
const CONTRADICTION_PAIRS: &[(&str, &str)] = &[
    ("implemented", "not implemented"),
    ("working", "broken"),
    ("available", "unavailable"),
    ("supported", "unsupported"),
    ("enabled", "disabled"),
    ("deprecated", "current"),
];

/// Scans the edge set for structural anomalies and scores content-level
/// contradictions.
pub struct ConflictDetector {
    store: Arc<ContentStore>,
    analyzer: Arc<RelationshipAnalyzer>,
    config: ConflictConfig,
}

impl ConflictDetector {
    pub fn new(
        store: Arc<ContentStore>,
        analyzer: Arc<RelationshipAnalyzer>,
        config: ConflictConfig,
    ) -> Self {
        Self {
            store,
            analyzer,
            config,
        }
    }

    /// Bidirectional type mismatches and circular dependency chains
    /// over the full edge set.
    pub async fn detect_conflicts(&self) -> Result<Vec<GraphConflict>> {
        let edges = self.analyzer.all_edges().await?;
        let mut conflicts = self.bidirectional_mismatches(&edges);
        conflicts.extend(
            self.find_cycles(&edges)
                .into_iter()
                .map(|cycle| GraphConflict::CircularDependency { cycle }),
        );

        debug!(
            "Conflict scan over {} edges found {} conflicts",
            edges.len(),
            conflicts.len()
        );
        Ok(conflicts)
    }

    /// Content conflicts across every connected pair, using the edge
    /// strength as the similarity input.
    pub async fn scan_content_conflicts(&self) -> Result<Vec<ContentConflict>> {
        let edges = self.analyzer.all_edges().await?;
        let mut seen_pairs: HashSet<(String, String)> = HashSet::new();
        let mut conflicts = Vec::new();

        for edge in &edges {
            let pair = ordered_pair(&edge.from_id, &edge.to_id);
            if !seen_pairs.insert(pair) {
                continue;
            }

            let a = match self.store.get(&edge.from_id).await? {
                Some(item) => item,
                None => continue,
            };
            let b = match self.store.get(&edge.to_id).await? {
                Some(item) => item,
                None => continue,
            };

            if let Some(conflict) = self.detect_content_conflicts(&a, &b, edge.strength) {
                conflicts.push(conflict);
            }
        }

        Ok(conflicts)
    }

    /// Heuristic contradiction score for one pair.
    ///
    /// Starts from the pair's similarity, boosted when the items live
    /// in different categories and again when their texts contain
    /// opposite members of a contradiction pair. Reported above the
    /// configured threshold. The multipliers are tunable configuration,
    /// not calibrated constants.
    pub fn detect_content_conflicts(
        &self,
        a: &ContentItem,
        b: &ContentItem,
        similarity: f32,
    ) -> Option<ContentConflict> {
        let mut score = similarity;

        let cross_category = a.category != b.category;
        if cross_category {
            score *= self.config.cross_category_boost;
        }

        let contradictions = matched_contradictions(&a.text, &b.text);
        if !contradictions.is_empty() {
            score *= self.config.contradiction_boost;
        }

        if score > self.config.report_threshold {
            Some(ContentConflict {
                a_id: a.id.clone(),
                b_id: b.id.clone(),
                score,
                cross_category,
                contradictions,
            })
        } else {
            None
        }
    }

    fn bidirectional_mismatches(&self, edges: &[Relationship]) -> Vec<GraphConflict> {
        let mut by_pair: HashMap<(&str, &str), Vec<&Relationship>> = HashMap::new();
        for edge in edges {
            by_pair
                .entry((edge.from_id.as_str(), edge.to_id.as_str()))
                .or_default()
                .push(edge);
        }

        let mut reported: HashSet<(String, String)> = HashSet::new();
        let mut conflicts = Vec::new();

        for edge in edges {
            let Some(reverse) = by_pair.get(&(edge.to_id.as_str(), edge.from_id.as_str()))
            else {
                continue;
            };
            for back in reverse {
                if back.rel_type == edge.rel_type {
                    continue;
                }
                if !reported.insert(ordered_pair(&edge.from_id, &edge.to_id)) {
                    break;
                }
                conflicts.push(GraphConflict::BidirectionalMismatch {
                    from_id: edge.from_id.clone(),
                    to_id: edge.to_id.clone(),
                    forward: edge.rel_type,
                    backward: back.rel_type,
                });
                break;
            }
        }

        conflicts
    }

    /// Cycles in the directed graph formed by all edges.
    ///
    /// Iterative DFS with an explicit stack and recursion-stack marks;
    /// a back-edge to an active node yields the cycle path from its
    /// first occurrence. Work is bounded by `max_cycle_iterations` so a
    /// pathological graph cannot pin the scan.
    fn find_cycles(&self, edges: &[Relationship]) -> Vec<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in edges {
            adjacency
                .entry(edge.from_id.as_str())
                .or_default()
                .push(edge.to_id.as_str());
            adjacency.entry(edge.to_id.as_str()).or_default();
        }

        let mut nodes: Vec<&str> = adjacency.keys().copied().collect();
        nodes.sort_unstable();

        let mut marks: HashMap<&str, Mark> =
            nodes.iter().map(|n| (*n, Mark::New)).collect();
        let mut cycles = Vec::new();
        let mut seen: HashSet<Vec<String>> = HashSet::new();
        let mut iterations = 0usize;

        for start in nodes {
            if marks[start] != Mark::New {
                continue;
            }

            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            let mut path: Vec<&str> = vec![start];
            marks.insert(start, Mark::Active);

            while let Some(top) = stack.last_mut() {
                iterations += 1;
                if iterations > self.config.max_cycle_iterations {
                    warn!(
                        "Cycle detection stopped after {} iterations, reporting partial results",
                        iterations - 1
                    );
                    return cycles;
                }

                let (node, child_idx) = (top.0, top.1);
                top.1 += 1;

                let children = adjacency.get(node).map(|v| v.as_slice()).unwrap_or(&[]);
                if child_idx >= children.len() {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                    path.pop();
                    continue;
                }

                let child = children[child_idx];
                match marks[child] {
                    Mark::Active => {
                        if let Some(pos) = path.iter().position(|n| *n == child) {
                            let cycle: Vec<String> =
                                path[pos..].iter().map(|n| n.to_string()).collect();
                            if seen.insert(canonical_rotation(&cycle)) {
                                cycles.push(cycle);
                            }
                        }
                    }
                    Mark::New => {
                        marks.insert(child, Mark::Active);
                        stack.push((child, 0));
                        path.push(child);
                    }
                    Mark::Done => {}
                }
            }
        }

        cycles
    }
}

/// Rotate a cycle so its smallest node comes first; two discoveries of
/// the same loop from different entry points compare equal.
fn canonical_rotation(cycle: &[String]) -> Vec<String> {
    let min_pos = cycle
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0);
    cycle[min_pos..]
        .iter()
        .chain(cycle[..min_pos].iter())
        .cloned()
        .collect()
}

fn ordered_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn matched_contradictions(text_a: &str, text_b: &str) -> Vec<String> {
    let a = text_a.to_lowercase();
    let b = text_b.to_lowercase();

    CONTRADICTION_PAIRS
        .iter()
        .filter(|(positive, negative)| {
            let a_positive = a.contains(positive) && !a.contains(negative);
            let b_positive = b.contains(positive) && !b.contains(negative);
            (a_positive && b.contains(negative)) || (b_positive && a.contains(negative))
        })
        .map(|(positive, negative)| format!("{}/{}", positive, negative))
        .collect()
}
