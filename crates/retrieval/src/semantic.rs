//! Exact nearest-neighbour search over fragment embeddings.
//!
//! Scores are cosine similarities in [-1, 1]. Every index carries the
//! fingerprint of the embedding method that built it; querying with another
//! method, or with a vector of the wrong size, is a `ConfigMismatch`.

use std::collections::BTreeMap;
use std::sync::Arc;

use scout_core::{AppError, AppResult};

use crate::embeddings::{EmbeddingFingerprint, EmbeddingProvider};
use crate::store::FragmentStore;
use crate::types::{FragmentId, ScoredFragment};

#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub content_hash: String,
    pub vector: Arc<[f32]>,
}

#[derive(Debug, Clone)]
pub struct SemanticIndex {
    fingerprint: EmbeddingFingerprint,
    entries: BTreeMap<FragmentId, VectorEntry>,
}

/// Counts reported by a build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SemanticBuildStats {
    pub reused: usize,
    pub embedded: usize,
}

impl SemanticIndex {
    pub fn empty(fingerprint: EmbeddingFingerprint) -> Self {
        Self {
            fingerprint,
            entries: BTreeMap::new(),
        }
    }

    /// Assemble an index from persisted vectors, checking every dimension.
    pub fn from_entries(
        fingerprint: EmbeddingFingerprint,
        entries: impl IntoIterator<Item = (FragmentId, VectorEntry)>,
    ) -> AppResult<Self> {
        let mut index = Self::empty(fingerprint);
        for (id, entry) in entries {
            index.check_dimensions(&id, &entry.vector)?;
            index.entries.insert(id, entry);
        }
        Ok(index)
    }

    /// Embed every fragment of `store`.
    ///
    /// Vectors from `previous` are reused when the fragment id and content hash
    /// are unchanged and the embedding method is the same. Any vector of the
    /// wrong size aborts the build.
    pub async fn build(
        previous: Option<&SemanticIndex>,
        store: &FragmentStore,
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> AppResult<(Self, SemanticBuildStats)> {
        let fingerprint = provider.fingerprint();
        let reusable = previous.filter(|p| p.fingerprint == fingerprint);
        if previous.is_some() && reusable.is_none() {
            tracing::warn!(
                "Embedding method changed to {}; re-embedding all fragments",
                fingerprint
            );
        }

        let mut index = Self::empty(fingerprint);
        let mut stats = SemanticBuildStats::default();
        let mut pending: Vec<(FragmentId, String, String)> = Vec::new();

        for fragment in store.iter() {
            let hash = fragment.content_hash();
            let reused = reusable
                .and_then(|p| p.entries.get(&fragment.id))
                .filter(|entry| entry.content_hash == hash);

            match reused {
                Some(entry) => {
                    index.entries.insert(fragment.id.clone(), entry.clone());
                    stats.reused += 1;
                }
                None => pending.push((fragment.id.clone(), hash, fragment.text.clone())),
            }
        }

        for batch in pending.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|(_, _, text)| text.clone()).collect();
            let vectors = provider.embed_batch(&texts).await?;

            if vectors.len() != batch.len() {
                return Err(AppError::Embedding(format!(
                    "Provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }

            for ((id, hash, _), vector) in batch.iter().zip(vectors) {
                index.check_dimensions(id, &vector)?;
                index.entries.insert(
                    id.clone(),
                    VectorEntry {
                        content_hash: hash.clone(),
                        vector: vector.into(),
                    },
                );
                stats.embedded += 1;
            }
        }

        tracing::debug!(
            reused = stats.reused,
            embedded = stats.embedded,
            "Semantic index built with {}",
            index.fingerprint
        );
        Ok((index, stats))
    }

    fn check_dimensions(&self, id: &FragmentId, vector: &[f32]) -> AppResult<()> {
        if vector.len() != self.fingerprint.dimensions {
            return Err(AppError::ConfigMismatch(format!(
                "Vector for fragment '{}' has {} dimensions, index expects {}",
                id,
                vector.len(),
                self.fingerprint.dimensions
            )));
        }
        Ok(())
    }

    pub fn fingerprint(&self) -> &EmbeddingFingerprint {
        &self.fingerprint
    }

    /// Embed `query` with `provider` and search. The provider must match the index.
    pub async fn search(
        &self,
        provider: &dyn EmbeddingProvider,
        query: &str,
        top_k: usize,
        min_similarity: f32,
    ) -> AppResult<Vec<ScoredFragment>> {
        self.fingerprint.ensure_matches(&provider.fingerprint())?;
        if top_k == 0 || query.trim().is_empty() || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = provider.embed(query).await?;
        self.search_vector(&query_vector, top_k, min_similarity)
    }

    /// Exact scan. Hits at or below `min_similarity` are dropped.
    pub fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> AppResult<Vec<ScoredFragment>> {
        if query_vector.len() != self.fingerprint.dimensions {
            return Err(AppError::ConfigMismatch(format!(
                "Query vector has {} dimensions, index expects {}",
                query_vector.len(),
                self.fingerprint.dimensions
            )));
        }

        let mut results: Vec<ScoredFragment> = self
            .entries
            .iter()
            .map(|(id, entry)| ScoredFragment {
                id: id.clone(),
                score: cosine_similarity(query_vector, &entry.vector),
            })
            .filter(|hit| hit.score > min_similarity)
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        results.truncate(top_k);
        Ok(results)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&FragmentId, &VectorEntry)> {
        self.entries.iter()
    }
}

/// Cosine similarity in [-1, 1]. Zero vectors and length mismatches score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Little-endian f32 encoding used for persisted vectors.
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn bytes_to_vector(bytes: &[u8]) -> AppResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(AppError::Index(format!(
            "Invalid vector blob length: {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::providers::trigram::TrigramProvider;
    use crate::types::{BuildDiagnostics, Fragment, FragmentKind};

    fn store(texts: &[(&str, &str)]) -> FragmentStore {
        let mut store = FragmentStore::new();
        store.apply(
            texts
                .iter()
                .map(|(id, text)| Fragment {
                    id: FragmentId::new(*id),
                    source_path: format!("{}.md", id),
                    start_line: 1,
                    end_line: 1,
                    kind: FragmentKind::ProseBlock,
                    text: text.to_string(),
                    symbol: None,
                })
                .collect(),
            &[],
            &mut BuildDiagnostics::default(),
        );
        store
    }

    /// Returns vectors of a fixed, wrong size.
    #[derive(Debug)]
    struct BrokenProvider;

    #[async_trait::async_trait]
    impl EmbeddingProvider for BrokenProvider {
        fn provider_name(&self) -> &str {
            "broken"
        }
        fn model_name(&self) -> &str {
            "broken-v1"
        }
        fn dimensions(&self) -> usize {
            8
        }
        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0; 4]).collect())
        }
    }

    #[test]
    fn test_cosine_similarity_range() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_vector_bytes_round_trip() {
        let v = vec![0.25, -1.5, 3.0];
        assert_eq!(bytes_to_vector(&vector_to_bytes(&v)).unwrap(), v);
        assert!(bytes_to_vector(&[0, 1, 2]).is_err());
    }

    #[tokio::test]
    async fn test_search_ranks_related_text_first() {
        let store = store(&[
            ("pool", "database connection pool with retry"),
            ("chart", "render the chart legend and axis labels"),
        ]);
        let provider = TrigramProvider::new(256);
        let (index, stats) = SemanticIndex::build(None, &store, &provider, 1).await.unwrap();
        assert_eq!(stats.embedded, 2);

        let hits = index
            .search(&provider, "database connection", 5, 0.0)
            .await
            .unwrap();
        assert_eq!(hits[0].id, FragmentId::new("pool"));
        assert!(hits.iter().all(|h| h.score > 0.0 && h.score <= 1.0));
    }

    #[tokio::test]
    async fn test_unchanged_fragments_reuse_vectors() {
        let provider = TrigramProvider::new(64);
        let first = store(&[("a", "alpha text"), ("b", "beta text")]);
        let (index, _) = SemanticIndex::build(None, &first, &provider, 10).await.unwrap();

        let second = store(&[("a", "alpha text"), ("b", "beta text changed")]);
        let (_, stats) = SemanticIndex::build(Some(&index), &second, &provider, 10)
            .await
            .unwrap();
        assert_eq!(stats, SemanticBuildStats { reused: 1, embedded: 1 });
    }

    #[tokio::test]
    async fn test_wrong_dimension_fails_build() {
        let store = store(&[("a", "alpha text")]);
        let err = SemanticIndex::build(None, &store, &BrokenProvider, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConfigMismatch(_)));
    }

    #[tokio::test]
    async fn test_query_with_other_method_is_rejected() {
        let store = store(&[("a", "alpha text")]);
        let (index, _) = SemanticIndex::build(None, &store, &TrigramProvider::new(64), 10)
            .await
            .unwrap();

        let err = index
            .search(&TrigramProvider::new(32), "alpha", 5, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConfigMismatch(_)));
        assert!(matches!(
            index.search_vector(&[1.0; 3], 5, 0.0),
            Err(AppError::ConfigMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_query_vector_returns_nothing() {
        let store = store(&[("a", "alpha text")]);
        let provider = TrigramProvider::new(64);
        let (index, _) = SemanticIndex::build(None, &store, &provider, 10).await.unwrap();
        assert!(index.search(&provider, "db", 5, 0.0).await.unwrap().is_empty());
    }
}
