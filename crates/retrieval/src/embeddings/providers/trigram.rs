//! Trigram embedding provider: deterministic, offline, content-aware vectors.

use crate::embeddings::provider::EmbeddingProvider;
use crate::text::{is_stop_word, tokenize};
use scout_core::AppResult;
use std::collections::BTreeMap;

/// Hashes character trigrams and whole terms into a fixed number of buckets.
///
/// Not semantically accurate like a neural model, but stable across runs and
/// machines, which keeps vectors reusable between generations. Terms shorter
/// than three characters carry no trigrams and are ignored, so a query made
/// only of short abbreviations embeds to the zero vector.
#[derive(Debug)]
pub struct TrigramProvider {
    dimensions: usize,
}

impl TrigramProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];
        if self.dimensions == 0 {
            return embedding;
        }

        // BTreeMap keeps float accumulation order stable
        let mut term_freq: BTreeMap<String, u32> = BTreeMap::new();
        for term in tokenize(text) {
            if term.chars().count() > 2 && !is_stop_word(&term) {
                *term_freq.entry(term).or_insert(0) += 1;
            }
        }

        for (term, freq) in &term_freq {
            let chars: Vec<char> = term.chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                let idx = bucket(&trigram, 37, self.dimensions);
                embedding[idx] += (*freq as f32).sqrt();
            }

            embedding[bucket(term, 31, self.dimensions)] += *freq as f32;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }

        embedding
    }
}

fn bucket(s: &str, multiplier: u64, dimensions: usize) -> usize {
    let hash = s
        .bytes()
        .fold(0u64, |acc, b| acc.wrapping_mul(multiplier).wrapping_add(b as u64));
    (hash % dimensions as u64) as usize
}

#[async_trait::async_trait]
impl EmbeddingProvider for TrigramProvider {
    fn provider_name(&self) -> &str {
        "trigram"
    }

    fn model_name(&self) -> &str {
        "trigram-v1"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}
