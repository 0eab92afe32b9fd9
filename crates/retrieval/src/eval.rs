//! Golden-set retrieval evaluation.
//!
//! A golden set lists questions with the source files a good answer must draw
//! on. Metrics are computed over source paths, not fragment ids, so golden sets
//! survive re-chunking.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use scout_core::{AppError, AppResult};

use crate::controller::RetrieveOptions;
use crate::engine::Engine;
use crate::types::RetrievalStatus;

fn default_category() -> String {
    "general".to_string()
}

fn default_difficulty() -> String {
    "medium".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenQuery {
    pub query: String,

    /// Expected answer content, for the answer collaborator's own evaluation
    #[serde(default)]
    pub ground_truth: String,

    /// Source paths; `*` matches any run of characters
    #[serde(default)]
    pub expected_sources: Vec<String>,

    #[serde(default = "default_category")]
    pub category: String,

    #[serde(default = "default_difficulty")]
    pub difficulty: String,

    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoldenSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub queries: Vec<GoldenQuery>,
}

impl GoldenSet {
    pub fn from_json(path: &Path) -> AppResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read golden set at {:?}: {}", path, e))
        })?;
        let set: GoldenSet = serde_json::from_str(&content)?;
        tracing::debug!("Loaded {} golden queries from {:?}", set.queries.len(), path);
        Ok(set)
    }

    pub fn filter_by_category(&self, category: &str) -> Self {
        Self {
            description: self.description.clone(),
            queries: self
                .queries
                .iter()
                .filter(|q| q.category == category)
                .cloned()
                .collect(),
        }
    }

    pub fn filter_by_difficulty(&self, difficulty: &str) -> Self {
        Self {
            description: self.description.clone(),
            queries: self
                .queries
                .iter()
                .filter(|q| q.difficulty == difficulty)
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Query counts per category.
    pub fn categories(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for query in &self.queries {
            *counts.entry(query.category.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Metrics for one golden query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryEval {
    pub query: String,
    pub category: String,
    /// Share of expected sources present in the top k
    pub recall: f32,
    /// Share of the top k hits that come from an expected source
    pub precision: f32,
    /// 1 / rank of the first hit from an expected source, 0 if none
    pub reciprocal_rank: f32,
    pub confidence: f32,
    pub attempts: u32,
    pub status: RetrievalStatus,
    pub retrieved_sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalReport {
    pub k: usize,
    pub queries: Vec<QueryEval>,
    pub recall_at_k: f32,
    pub context_precision: f32,
    pub mrr: f32,
    pub mean_confidence: f32,
}

impl EvalReport {
    fn from_queries(k: usize, queries: Vec<QueryEval>) -> Self {
        let mean = |f: fn(&QueryEval) -> f32| {
            if queries.is_empty() {
                0.0
            } else {
                queries.iter().map(f).sum::<f32>() / queries.len() as f32
            }
        };

        Self {
            k,
            recall_at_k: mean(|q| q.recall),
            context_precision: mean(|q| q.precision),
            mrr: mean(|q| q.reciprocal_rank),
            mean_confidence: mean(|q| q.confidence),
            queries,
        }
    }
}

/// Whether `path` satisfies an expected-source pattern.
///
/// Patterns without `/` also match any path ending in `/<pattern>`.
pub fn source_matches(pattern: &str, path: &str) -> bool {
    if wildcard_match(pattern, path) {
        return true;
    }
    !pattern.contains('/')
        && path
            .rsplit_once('/')
            .is_some_and(|(_, file)| wildcard_match(pattern, file))
}

fn wildcard_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let (first, rest) = (parts[0], &parts[1..]);
    let Some(mut remaining) = text.strip_prefix(first) else {
        return false;
    };
    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return true,
    };

    for part in middle {
        match remaining.find(part) {
            Some(pos) => remaining = &remaining[pos + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}

fn score_query(golden: &GoldenQuery, sources: &[String]) -> (f32, f32, f32) {
    let expected = &golden.expected_sources;
    if expected.is_empty() {
        return (0.0, 0.0, 0.0);
    }

    let found = expected
        .iter()
        .filter(|pattern| sources.iter().any(|s| source_matches(pattern, s)))
        .count();
    let recall = found as f32 / expected.len() as f32;

    let relevant: Vec<bool> = sources
        .iter()
        .map(|s| expected.iter().any(|pattern| source_matches(pattern, s)))
        .collect();
    let precision = if sources.is_empty() {
        0.0
    } else {
        relevant.iter().filter(|r| **r).count() as f32 / sources.len() as f32
    };
    let reciprocal_rank = relevant
        .iter()
        .position(|r| *r)
        .map(|pos| 1.0 / (pos + 1) as f32)
        .unwrap_or(0.0);

    (recall, precision, reciprocal_rank)
}

/// Run every golden query through `engine` and score the top `k` hits.
pub async fn evaluate(engine: &Engine, set: &GoldenSet, k: usize) -> AppResult<EvalReport> {
    let k = k.max(1);
    let mut results = Vec::with_capacity(set.queries.len());

    for golden in &set.queries {
        let result = engine
            .retrieve(&golden.query, k, RetrieveOptions::default())
            .await?;
        let sources: Vec<String> = result
            .hits
            .iter()
            .take(k)
            .map(|h| h.fragment.source_path.clone())
            .collect();
        let (recall, precision, reciprocal_rank) = score_query(golden, &sources);

        tracing::debug!(
            query = %golden.query,
            recall,
            precision,
            reciprocal_rank,
            "Evaluated golden query"
        );

        results.push(QueryEval {
            query: golden.query.clone(),
            category: golden.category.clone(),
            recall,
            precision,
            reciprocal_rank,
            confidence: result.confidence,
            attempts: result.attempts,
            status: result.status,
            retrieved_sources: sources,
        });
    }

    Ok(EvalReport::from_queries(k, results))
}
