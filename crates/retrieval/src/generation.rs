//! Immutable index generations and the handle that publishes them.
//!
//! A generation bundles the fragment store with every index derived from it.
//! Builds start from the previous generation, produce a new one off to the side
//! and publish it with a single pointer swap; readers holding the old `Arc`
//! are unaffected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use scout_core::AppResult;

use crate::config::RetrievalConfig;
use crate::embeddings::EmbeddingProvider;
use crate::graph::{DependencyGraph, ExtractorRegistry, FragmentFacts};
use crate::lexical::{Bm25Params, LexicalIndex};
use crate::semantic::SemanticIndex;
use crate::store::FragmentStore;
use crate::types::{BuildDiagnostics, Fragment, FragmentId, ParseFailure};

/// Monotonic generation number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(pub u64);

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extraction outcome for one code fragment, keyed by its content hash so
/// unchanged fragments are not parsed again.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFacts {
    pub content_hash: String,
    pub outcome: Result<FragmentFacts, String>,
}

#[derive(Debug)]
pub struct Generation {
    pub id: GenerationId,
    pub created_at: DateTime<Utc>,
    pub store: FragmentStore,
    pub lexical: LexicalIndex,
    pub semantic: SemanticIndex,
    pub graph: DependencyGraph,
    pub facts: HashMap<FragmentId, CachedFacts>,
}

impl Generation {
    pub fn fragment(&self, id: &FragmentId) -> Option<&Fragment> {
        self.store.get(id).map(|f| f.as_ref())
    }
}

/// Shared pointer to the active generation.
#[derive(Debug, Clone)]
pub struct GenerationHandle {
    current: Arc<RwLock<Option<Arc<Generation>>>>,
    next_id: Arc<AtomicU64>,
    build_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Default for GenerationHandle {
    fn default() -> Self {
        Self {
            current: Arc::new(RwLock::new(None)),
            next_id: Arc::new(AtomicU64::new(1)),
            build_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

impl GenerationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The active generation, if any. The lock is released before returning.
    pub fn current(&self) -> Option<Arc<Generation>> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }

    /// Make `generation` the active one.
    pub fn publish(&self, generation: Generation) -> Arc<Generation> {
        self.observe(generation.id);
        let generation = Arc::new(generation);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(generation.clone());
        generation
    }

    pub fn allocate_id(&self) -> GenerationId {
        GenerationId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Keep future ids above one that came from elsewhere (e.g. a loaded index).
    pub fn observe(&self, id: GenerationId) {
        self.next_id.fetch_max(id.0 + 1, Ordering::SeqCst);
    }

    /// Serializes builders. Readers never take this lock.
    pub async fn lock_builds(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.build_lock.lock().await
    }
}

/// Derive a new generation from `previous` plus a batch of changes.
///
/// Partial failures (rejected fragments, parse errors) end up in the returned
/// diagnostics. Embedding failures and dimension mismatches abort the build.
pub async fn build_generation(
    previous: Option<&Generation>,
    id: GenerationId,
    batch: Vec<Fragment>,
    removed_files: &[String],
    provider: &dyn EmbeddingProvider,
    config: &RetrievalConfig,
    registry: &ExtractorRegistry,
) -> AppResult<(Generation, BuildDiagnostics)> {
    let mut diagnostics = BuildDiagnostics::default();

    let mut store = previous.map(|p| p.store.clone()).unwrap_or_default();
    let delta = store.apply(batch, removed_files, &mut diagnostics);

    let params = Bm25Params::from(&config.lexical);
    let lexical = match previous {
        Some(prev) if prev.lexical.params() == &params => {
            let mut lexical = prev.lexical.clone();
            let added: Vec<&Fragment> = delta
                .added
                .iter()
                .filter_map(|id| store.get(id).map(|f| f.as_ref()))
                .collect();
            lexical.apply(&delta.removed, added);
            lexical
        }
        _ => LexicalIndex::build(params, &store),
    };

    let (semantic, semantic_stats) = SemanticIndex::build(
        previous.map(|p| &p.semantic),
        &store,
        provider,
        config.semantic.batch_size,
    )
    .await?;
    diagnostics.reused_embeddings = semantic_stats.reused;
    diagnostics.embedded_fragments = semantic_stats.embedded;

    let facts = extract_facts(previous, &store, registry, &mut diagnostics);

    let mut graph = DependencyGraph::build(&store, |fragment_id| {
        facts
            .get(fragment_id)
            .and_then(|cached| cached.outcome.as_ref().ok())
    });
    graph.prune(&store);
    diagnostics.unresolved_references = graph.unresolved();

    let generation = Generation {
        id,
        created_at: Utc::now(),
        store,
        lexical,
        semantic,
        graph,
        facts,
    };

    Ok((generation, diagnostics))
}

fn extract_facts(
    previous: Option<&Generation>,
    store: &FragmentStore,
    registry: &ExtractorRegistry,
    diagnostics: &mut BuildDiagnostics,
) -> HashMap<FragmentId, CachedFacts> {
    let mut facts = HashMap::new();

    for fragment in store.iter().filter(|f| f.is_code()) {
        let hash = fragment.content_hash();
        let cached = previous
            .and_then(|p| p.facts.get(&fragment.id))
            .filter(|cached| cached.content_hash == hash);

        let entry = match cached {
            Some(cached) => cached.clone(),
            None => match registry.extract(fragment) {
                None => {
                    diagnostics.unsupported_code_fragments += 1;
                    continue;
                }
                Some(outcome) => {
                    if let Err(reason) = &outcome {
                        tracing::warn!(
                            fragment = %fragment.id,
                            source = %fragment.source_path,
                            "Failed to parse fragment: {}",
                            reason
                        );
                        diagnostics.parse_failures.push(ParseFailure {
                            fragment_id: fragment.id.clone(),
                            source_path: fragment.source_path.clone(),
                            reason: reason.clone(),
                        });
                    }
                    CachedFacts {
                        content_hash: hash,
                        outcome,
                    }
                }
            },
        };
        facts.insert(fragment.id.clone(), entry);
    }

    facts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::providers::trigram::TrigramProvider;
    use crate::types::FragmentKind;

    fn code(id: &str, path: &str, text: &str) -> Fragment {
        Fragment {
            id: FragmentId::new(id),
            source_path: path.to_string(),
            start_line: 1,
            end_line: 3,
            kind: FragmentKind::CodeFunction,
            text: text.to_string(),
            symbol: None,
        }
    }

    async fn build(
        previous: Option<&Generation>,
        id: u64,
        batch: Vec<Fragment>,
    ) -> (Generation, BuildDiagnostics) {
        build_generation(
            previous,
            GenerationId(id),
            batch,
            &[],
            &TrigramProvider::new(64),
            &RetrievalConfig::default(),
            &ExtractorRegistry::with_defaults(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_parse_failures_are_recorded_and_skipped() {
        let (generation, diagnostics) = build(
            None,
            1,
            vec![
                code("ok", "a.py", "def ok():\n    return helper()\n"),
                code("bad", "b.py", "def broken(:\n    pass\n"),
                code("js", "c.js", "function f() { return 1 }"),
            ],
        )
        .await;

        assert_eq!(generation.store.len(), 3);
        assert_eq!(diagnostics.parse_failures.len(), 1);
        assert_eq!(diagnostics.parse_failures[0].fragment_id, FragmentId::new("bad"));
        assert_eq!(diagnostics.unsupported_code_fragments, 1);
        // helper() resolves nowhere
        assert_eq!(diagnostics.unresolved_references, 1);
        assert!(generation.lexical.search("broken", 5).iter().any(|h| h.id.as_str() == "bad"));
    }

    #[tokio::test]
    async fn test_incremental_build_reuses_work() {
        let (first, _) = build(
            None,
            1,
            vec![
                code("f", "a.py", "def f():\n    return g()\n"),
                code("g", "b.py", "def g():\n    return 1\n"),
            ],
        )
        .await;

        let (second, diagnostics) = build(
            Some(&first),
            2,
            vec![code("g", "b.py", "def g():\n    return 2\n")],
        )
        .await;

        assert_eq!(diagnostics.reused_embeddings, 1);
        assert_eq!(diagnostics.embedded_fragments, 1);
        assert_eq!(diagnostics.invalidated_fragments, 1);
        assert_eq!(
            second.facts.get(&FragmentId::new("f")),
            first.facts.get(&FragmentId::new("f"))
        );
        assert_eq!(second.graph.neighbors("f", crate::graph::Direction::Callees, 1).len(), 1);
        // The previous generation is untouched
        assert!(first.lexical.search("1", 5).iter().any(|h| h.id.as_str() == "g"));
        assert!(second.lexical.search("1", 5).is_empty());
    }

    #[test]
    fn test_handle_publishes_and_allocates_monotonic_ids() {
        let handle = GenerationHandle::new();
        assert!(handle.current().is_none());
        assert_eq!(handle.allocate_id(), GenerationId(1));

        handle.observe(GenerationId(7));
        assert_eq!(handle.allocate_id(), GenerationId(8));
    }
}
