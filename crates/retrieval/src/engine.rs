//! The engine facade: index builds, retrieval, graph queries and intent routing
//! over the active generation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use scout_core::{AppError, AppResult};

use crate::config::RetrievalConfig;
use crate::controller::{AdaptiveController, RetrieveOptions};
use crate::embeddings::{EmbeddingFingerprint, EmbeddingProvider};
use crate::fusion::{KeywordReranker, Reranker};
use crate::generation::{build_generation, Generation, GenerationHandle, GenerationId};
use crate::graph::{Direction, Entity, ExtractorRegistry};
use crate::persist;
use crate::router::{self, Domain, GroundingPolicy, RoutePlan};
use crate::session::Conversation;
use crate::types::{BuildDiagnostics, Fragment, RankedResult, RetrievalStatus};

/// Outcome of `build_index` / `remove_files`.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub generation: GenerationId,
    pub fragments: usize,
    pub diagnostics: BuildDiagnostics,
}

/// Snapshot of the active generation.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub generation: GenerationId,
    pub created_at: DateTime<Utc>,
    pub fragments: usize,
    pub files: usize,
    pub terms: usize,
    pub average_fragment_length: f32,
    pub vectors: usize,
    pub embedding: EmbeddingFingerprint,
    pub entities: BTreeMap<String, usize>,
    pub edges: BTreeMap<String, usize>,
    pub unresolved_references: usize,
    pub parse_failures: usize,
}

#[derive(Clone)]
pub struct Engine {
    config: Arc<RetrievalConfig>,
    provider: Arc<dyn EmbeddingProvider>,
    registry: Arc<ExtractorRegistry>,
    reranker: Option<Arc<dyn Reranker>>,
    generations: GenerationHandle,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("provider", &self.provider.fingerprint())
            .field("languages", &self.registry.languages())
            .field("reranker", &self.reranker.as_ref().map(|r| r.name()))
            .field("generation", &self.current_generation())
            .finish()
    }
}

impl Engine {
    /// Create an engine with no active generation.
    ///
    /// The keyword reranker is installed when `fusion.rerank` is set.
    pub fn new(config: RetrievalConfig, provider: Arc<dyn EmbeddingProvider>) -> AppResult<Self> {
        config.validate()?;
        let reranker: Option<Arc<dyn Reranker>> = if config.fusion.rerank {
            Some(Arc::new(KeywordReranker::default()))
        } else {
            None
        };

        Ok(Self {
            config: Arc::new(config),
            provider,
            registry: Arc::new(ExtractorRegistry::with_defaults()),
            reranker,
            generations: GenerationHandle::new(),
        })
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_registry(mut self, registry: ExtractorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Ingest fragments and publish a new generation.
    ///
    /// Files present in `fragments` replace their previous fragments. Bad
    /// fragments and parse failures are reported in the diagnostics; only
    /// embedding and configuration failures abort, leaving the previous
    /// generation active.
    pub async fn build_index(&self, fragments: Vec<Fragment>) -> AppResult<BuildReport> {
        self.update(fragments, &[]).await
    }

    /// Invalidate every fragment of `paths` and publish the result.
    pub async fn remove_files(&self, paths: &[String]) -> AppResult<BuildReport> {
        self.update(Vec::new(), paths).await
    }

    async fn update(&self, batch: Vec<Fragment>, removed: &[String]) -> AppResult<BuildReport> {
        let _guard = self.generations.lock_builds().await;

        let previous = self.generations.current();
        let id = self.generations.allocate_id();
        tracing::info!(
            "Building generation {} ({} fragments in, {} files removed)",
            id,
            batch.len(),
            removed.len()
        );

        let (generation, diagnostics) = build_generation(
            previous.as_deref(),
            id,
            batch,
            removed,
            self.provider.as_ref(),
            &self.config,
            &self.registry,
        )
        .await?;

        let fragments = generation.store.len();
        self.generations.publish(generation);

        if diagnostics.is_clean() {
            tracing::info!("Published generation {} with {} fragments", id, fragments);
        } else {
            tracing::warn!(
                "Published generation {} with {} fragments ({} rejected, {} parse failures)",
                id,
                fragments,
                diagnostics.rejected.len(),
                diagnostics.parse_failures.len()
            );
        }

        Ok(BuildReport {
            generation: id,
            fragments,
            diagnostics,
        })
    }

    /// Route and retrieve. `top_k == 0` uses `fusion.max_results`.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        options: RetrieveOptions,
    ) -> AppResult<RankedResult> {
        let plan = router::route(query);

        let Some(generation) = self.generations.current() else {
            tracing::warn!("Retrieval requested with no index available");
            return Ok(empty_result(query, RetrievalStatus::IndexUnavailable, &plan, None));
        };

        if query.trim().is_empty() {
            return Ok(empty_result(
                query,
                RetrievalStatus::Complete,
                &plan,
                Some(generation.id),
            ));
        }

        tracing::debug!(
            domain = %plan.domain,
            grounding = %plan.grounding,
            generation = %generation.id,
            "Retrieving"
        );

        let controller = AdaptiveController::new(
            &generation,
            self.provider.as_ref(),
            &self.config,
            self.reranker.as_deref(),
        );
        controller.run(query, top_k, plan, &options).await
    }

    /// Retrieve as the next turn of `conversation`.
    ///
    /// Earlier turns do not influence retrieval.
    pub async fn retrieve_in(
        &self,
        conversation: &mut Conversation,
        query: &str,
        top_k: usize,
        options: RetrieveOptions,
    ) -> AppResult<RankedResult> {
        let result = self.retrieve(query, top_k, options).await?;
        conversation.push(&result);
        Ok(result)
    }

    /// Entities reachable from `entity_name` over call edges, up to `depth` hops.
    pub fn graph_neighbors(
        &self,
        entity_name: &str,
        direction: Direction,
        depth: usize,
    ) -> Vec<Entity> {
        self.generations
            .current()
            .map(|generation| {
                generation
                    .graph
                    .neighbors(entity_name, direction, depth)
                    .into_iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn classify_intent(&self, query: &str) -> (Domain, GroundingPolicy) {
        router::classify_intent(query)
    }

    pub fn current_generation(&self) -> Option<GenerationId> {
        self.generations.current().map(|g| g.id)
    }

    /// The active generation itself, for callers that need several reads
    /// against the same snapshot.
    pub fn snapshot(&self) -> Option<Arc<Generation>> {
        self.generations.current()
    }

    pub fn stats(&self) -> Option<IndexStats> {
        let generation = self.generations.current()?;
        let parse_failures = generation
            .facts
            .values()
            .filter(|cached| cached.outcome.is_err())
            .count();

        Some(IndexStats {
            generation: generation.id,
            created_at: generation.created_at,
            fragments: generation.store.len(),
            files: generation.store.file_count(),
            terms: generation.lexical.term_count(),
            average_fragment_length: generation.lexical.average_length(),
            vectors: generation.semantic.len(),
            embedding: generation.semantic.fingerprint().clone(),
            entities: generation
                .graph
                .entity_counts()
                .into_iter()
                .map(|(kind, count)| (kind.as_str().to_string(), count))
                .collect(),
            edges: generation
                .graph
                .edge_counts()
                .into_iter()
                .map(|(kind, count)| (kind.as_str().to_string(), count))
                .collect(),
            unresolved_references: generation.graph.unresolved(),
            parse_failures,
        })
    }

    /// Persist the active generation.
    pub fn save(&self, path: &Path) -> AppResult<GenerationId> {
        let generation = self
            .generations
            .current()
            .ok_or_else(|| AppError::Index("No generation to save".to_string()))?;
        persist::save_generation(path, &generation)?;
        Ok(generation.id)
    }

    /// Number future builds after the generation stored at `path` without loading it.
    ///
    /// Used when rebuilding from scratch over an existing index, so the new generation
    /// never reuses the stored id.
    pub fn continue_numbering(&self, path: &Path) -> AppResult<Option<GenerationId>> {
        let stored = persist::stored_generation(path)?;
        if let Some(id) = stored {
            self.generations.observe(id);
            tracing::debug!("Continuing generation numbering after {}", id);
        }
        Ok(stored)
    }

    /// Load and publish the generation stored at `path`.
    ///
    /// The stored embedding fingerprint must match this engine's provider.
    pub async fn load(&self, path: &Path, expected: Option<GenerationId>) -> AppResult<GenerationId> {
        let _guard = self.generations.lock_builds().await;

        let generation = persist::load_generation(path, expected)?;
        generation
            .semantic
            .fingerprint()
            .ensure_matches(&self.provider.fingerprint())?;

        let id = generation.id;
        self.generations.publish(generation);
        Ok(id)
    }
}

fn empty_result(
    query: &str,
    status: RetrievalStatus,
    plan: &RoutePlan,
    generation: Option<GenerationId>,
) -> RankedResult {
    RankedResult::empty(query, status, plan.domain, plan.grounding, generation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::providers::trigram::TrigramProvider;
    use crate::types::{FragmentId, FragmentKind};

    fn engine() -> Engine {
        Engine::new(RetrievalConfig::default(), Arc::new(TrigramProvider::new(64))).unwrap()
    }

    fn prose(id: &str, path: &str, text: &str) -> Fragment {
        Fragment {
            id: FragmentId::new(id),
            source_path: path.to_string(),
            start_line: 1,
            end_line: 1,
            kind: FragmentKind::ProseBlock,
            text: text.to_string(),
            symbol: None,
        }
    }

    #[tokio::test]
    async fn test_retrieve_without_index() {
        let result = engine()
            .retrieve("where is density", 5, RetrieveOptions::default())
            .await
            .unwrap();

        assert_eq!(result.status, RetrievalStatus::IndexUnavailable);
        assert!(result.hits.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.domain, Domain::Code);
    }

    #[tokio::test]
    async fn test_empty_query() {
        let engine = engine();
        engine
            .build_index(vec![prose("a", "a.md", "some text")])
            .await
            .unwrap();

        let result = engine.retrieve("   ", 5, RetrieveOptions::default()).await.unwrap();
        assert_eq!(result.status, RetrievalStatus::Complete);
        assert!(result.hits.is_empty());
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test]
    async fn test_remove_files() {
        let engine = engine();
        engine
            .build_index(vec![
                prose("a", "a.md", "alpha notes"),
                prose("b", "b.md", "beta notes"),
            ])
            .await
            .unwrap();

        let report = engine.remove_files(&["a.md".to_string()]).await.unwrap();
        assert_eq!(report.generation, GenerationId(2));
        assert_eq!(report.fragments, 1);
        assert_eq!(report.diagnostics.invalidated_fragments, 1);

        let stats = engine.stats().unwrap();
        assert_eq!(stats.files, 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = RetrievalConfig::default();
        config.controller.max_attempts = 0;
        assert!(Engine::new(config, Arc::new(TrigramProvider::new(8))).is_err());
    }

    #[tokio::test]
    async fn test_conversation_records_turns() {
        let engine = engine();
        engine
            .build_index(vec![prose("a", "a.md", "alpha notes")])
            .await
            .unwrap();

        let mut conversation = Conversation::new();
        engine
            .retrieve_in(&mut conversation, "alpha", 3, RetrieveOptions::default())
            .await
            .unwrap();
        engine
            .retrieve_in(&mut conversation, "beta", 3, RetrieveOptions::default())
            .await
            .unwrap();

        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.turns()[0].fragment_ids, vec![FragmentId::new("a")]);
    }
}
