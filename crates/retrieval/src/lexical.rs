//! Inverted index with BM25 ranking.
//!
//! Postings are maintained per fragment so a rebuild only touches replaced
//! fragments. Corpus statistics (document count, average length) are
//! recomputed over the whole index after every update.

use std::collections::HashMap;

use crate::config::LexicalConfig;
use crate::store::FragmentStore;
use crate::text::{is_stop_word, query_terms, tokenize};
use crate::types::{Fragment, FragmentId, ScoredFragment};

#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
    pub drop_stop_words: bool,
}

impl From<&LexicalConfig> for Bm25Params {
    fn from(config: &LexicalConfig) -> Self {
        Self {
            k1: config.k1,
            b: config.b,
            drop_stop_words: config.drop_stop_words,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LexicalIndex {
    params: Bm25Params,
    /// term -> (fragment -> term frequency)
    postings: HashMap<String, HashMap<FragmentId, u32>>,
    /// fragment -> distinct terms, for removal
    doc_terms: HashMap<FragmentId, Vec<String>>,
    doc_lengths: HashMap<FragmentId, u32>,
    avg_doc_length: f32,
}

impl LexicalIndex {
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            postings: HashMap::new(),
            doc_terms: HashMap::new(),
            doc_lengths: HashMap::new(),
            avg_doc_length: 0.0,
        }
    }

    /// Index every fragment of a store from scratch.
    pub fn build(params: Bm25Params, store: &FragmentStore) -> Self {
        let mut index = Self::new(params);
        for fragment in store.iter() {
            index.insert(fragment);
        }
        index.recompute_stats();
        index
    }

    /// Rebuild from persisted postings. Every fragment id in `documents` counts
    /// toward the corpus even if it has no terms.
    pub fn from_postings(
        params: Bm25Params,
        documents: impl IntoIterator<Item = FragmentId>,
        postings: impl IntoIterator<Item = (String, FragmentId, u32)>,
    ) -> Self {
        let mut index = Self::new(params);
        for id in documents {
            index.doc_lengths.insert(id.clone(), 0);
            index.doc_terms.insert(id, Vec::new());
        }
        for (term, id, tf) in postings {
            *index.doc_lengths.entry(id.clone()).or_insert(0) += tf;
            index.doc_terms.entry(id.clone()).or_default().push(term.clone());
            index.postings.entry(term).or_default().insert(id, tf);
        }
        index.recompute_stats();
        index
    }

    pub fn params(&self) -> &Bm25Params {
        &self.params
    }

    /// Replace `removed` fragments and index the `added` ones, then refresh corpus stats.
    pub fn apply<'a>(
        &mut self,
        removed: &[FragmentId],
        added: impl IntoIterator<Item = &'a Fragment>,
    ) {
        for id in removed {
            self.remove(id);
        }
        for fragment in added {
            self.insert(fragment);
        }
        self.recompute_stats();
    }

    fn insert(&mut self, fragment: &Fragment) {
        self.remove(&fragment.id);

        let mut tf: HashMap<String, u32> = HashMap::new();
        let mut length = 0u32;
        for term in self.fragment_terms(fragment) {
            *tf.entry(term).or_insert(0) += 1;
            length += 1;
        }

        let mut terms = Vec::with_capacity(tf.len());
        for (term, count) in tf {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(fragment.id.clone(), count);
            terms.push(term);
        }

        self.doc_terms.insert(fragment.id.clone(), terms);
        self.doc_lengths.insert(fragment.id.clone(), length);
    }

    fn remove(&mut self, id: &FragmentId) {
        let Some(terms) = self.doc_terms.remove(id) else {
            return;
        };
        for term in terms {
            if let Some(docs) = self.postings.get_mut(&term) {
                docs.remove(id);
                if docs.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
        self.doc_lengths.remove(id);
    }

    fn fragment_terms(&self, fragment: &Fragment) -> Vec<String> {
        let mut terms = tokenize(&fragment.text);
        if let Some(symbol) = &fragment.symbol {
            terms.extend(tokenize(symbol));
        }
        if self.params.drop_stop_words {
            terms.retain(|t| !is_stop_word(t));
        }
        terms
    }

    fn recompute_stats(&mut self) {
        let total: u64 = self.doc_lengths.values().map(|&l| l as u64).sum();
        self.avg_doc_length = if self.doc_lengths.is_empty() {
            0.0
        } else {
            total as f32 / self.doc_lengths.len() as f32
        };
    }

    /// Top-K fragments by BM25. Empty or whitespace-only queries return nothing.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<ScoredFragment> {
        if top_k == 0 || query.trim().is_empty() {
            return Vec::new();
        }

        let terms = query_terms(query, self.params.drop_stop_words);
        let mut scores: HashMap<&FragmentId, f32> = HashMap::new();

        for term in &terms {
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            let idf = self.idf(docs.len());

            for (id, &tf) in docs {
                let doc_len = self.doc_lengths.get(id).copied().unwrap_or(0) as f32;
                *scores.entry(id).or_insert(0.0) += idf * self.term_weight(tf as f32, doc_len);
            }
        }

        let mut results: Vec<ScoredFragment> = scores
            .into_iter()
            .map(|(id, score)| ScoredFragment {
                id: id.clone(),
                score,
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        results.truncate(top_k);
        results
    }

    /// `ln((N - df + 0.5) / (df + 0.5) + 1)`, always positive.
    fn idf(&self, doc_freq: usize) -> f32 {
        let n = self.doc_lengths.len() as f32;
        let df = doc_freq as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn term_weight(&self, tf: f32, doc_len: f32) -> f32 {
        let (k1, b) = (self.params.k1, self.params.b);
        let length_ratio = if self.avg_doc_length > 0.0 {
            doc_len / self.avg_doc_length
        } else {
            1.0
        };
        (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * length_ratio))
    }

    pub fn document_count(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn document_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map(|d| d.len()).unwrap_or(0)
    }

    pub fn average_length(&self) -> f32 {
        self.avg_doc_length
    }

    /// All postings as (term, fragment, tf), sorted for stable persistence.
    pub fn postings(&self) -> Vec<(&str, &FragmentId, u32)> {
        let mut rows: Vec<(&str, &FragmentId, u32)> = self
            .postings
            .iter()
            .flat_map(|(term, docs)| docs.iter().map(move |(id, &tf)| (term.as_str(), id, tf)))
            .collect();
        rows.sort();
        rows
    }
}
