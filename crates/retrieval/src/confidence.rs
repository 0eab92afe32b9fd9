//! Confidence that a ranked result set is enough to answer a query.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::ConfidenceConfig;
use crate::text::{query_terms, tokenize};
use crate::types::{Fragment, Provenance, RetrievalHit};

/// The individual signals, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceSignals {
    /// Calibrated relevance of the top hit
    pub relevance: f32,
    /// Distinct source files among the hits
    pub diversity: f32,
    /// Share of query terms found in the top hits
    pub overlap: f32,
}

#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    config: ConfidenceConfig,
}

impl ConfidenceScorer {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConfidenceConfig {
        &self.config
    }

    /// Confidence for `hits` (best first) retrieved for `query`. Empty -> 0.
    pub fn score(&self, query: &str, hits: &[(&RetrievalHit, &Fragment)]) -> f32 {
        if hits.is_empty() {
            return 0.0;
        }
        self.combine(&self.signals(query, hits))
    }

    pub fn signals(&self, query: &str, hits: &[(&RetrievalHit, &Fragment)]) -> ConfidenceSignals {
        let Some((top, _)) = hits.first() else {
            return ConfidenceSignals::default();
        };

        ConfidenceSignals {
            relevance: self.relevance(top),
            diversity: self.diversity(hits),
            overlap: self.overlap(query, hits),
        }
    }

    /// Weighted average of the signals, clamped to [0, 1].
    ///
    /// Weights are non-negative, so the result never decreases when any single
    /// signal increases.
    pub fn combine(&self, signals: &ConfidenceSignals) -> f32 {
        let weights = [
            self.config.relevance_weight.max(0.0),
            self.config.diversity_weight.max(0.0),
            self.config.overlap_weight.max(0.0),
        ];
        let total: f32 = weights.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }

        let values = [signals.relevance, signals.diversity, signals.overlap];
        let weighted: f32 = weights
            .iter()
            .zip(values)
            .map(|(w, v)| w * clamp01(v))
            .sum();
        clamp01(weighted / total)
    }

    fn relevance(&self, hit: &RetrievalHit) -> f32 {
        if hit.provenance == Provenance::Graph
            || (hit.lexical_raw.is_none() && hit.semantic_raw.is_none())
        {
            return clamp01(hit.score);
        }

        let semantic = hit.semantic_raw.map(clamp01).unwrap_or(0.0);
        let lexical = hit
            .lexical_raw
            .map(|bm25| {
                let bm25 = bm25.max(0.0);
                bm25 / (bm25 + self.config.lexical_saturation)
            })
            .unwrap_or(0.0);
        semantic.max(lexical)
    }

    fn diversity(&self, hits: &[(&RetrievalHit, &Fragment)]) -> f32 {
        let target = self.config.diversity_target.max(1);
        let files: HashSet<&str> = hits
            .iter()
            .map(|(_, fragment)| fragment.source_path.as_str())
            .collect();
        files.len().min(target) as f32 / target as f32
    }

    fn overlap(&self, query: &str, hits: &[(&RetrievalHit, &Fragment)]) -> f32 {
        let mut terms = query_terms(query, true);
        if terms.is_empty() {
            terms = query_terms(query, false);
        }
        if terms.is_empty() {
            return 0.0;
        }

        let mut tokens: HashSet<String> = HashSet::new();
        for (_, fragment) in hits.iter().take(self.config.overlap_window.max(1)) {
            tokens.extend(tokenize(&fragment.text));
            if let Some(symbol) = &fragment.symbol {
                tokens.extend(tokenize(symbol));
            }
        }

        let matched = terms.iter().filter(|t| tokens.contains(*t)).count();
        matched as f32 / terms.len() as f32
    }
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new(ConfidenceConfig::default())
    }
}

fn clamp01(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
