//! Retrieval, routing and build properties exercised end to end.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::fixtures::{corpus, engine_with, fragment, indexed_engine, ControlledProvider};
use crate::config::RetrievalConfig;
use crate::confidence::ConfidenceScorer;
use crate::controller::RetrieveOptions;
use crate::engine::Engine;
use crate::generation::{Generation, GenerationId};
use crate::graph::Direction;
use crate::lexical::{Bm25Params, LexicalIndex};
use crate::router::{Domain, GroundingPolicy};
use crate::types::{
    Fragment, FragmentId, FragmentKind, Provenance, RankedResult, RetrievalHit, RetrievalStatus,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(result: &RankedResult) -> Vec<&str> {
        result.hits.iter().map(|h| h.fragment.id.as_str()).collect()
    }

    fn pairs<'a>(
        generation: &'a Generation,
        hits: &'a [RetrievalHit],
    ) -> Vec<(&'a RetrievalHit, &'a Fragment)> {
        hits.iter()
            .map(|h| (h, generation.fragment(&h.fragment_id).unwrap()))
            .collect()
    }

    fn abbreviation_config(max_attempts: u32) -> RetrievalConfig {
        let mut config = RetrievalConfig::default();
        config.controller.max_attempts = max_attempts;
        config.controller.synonyms = BTreeMap::from([(
            "db".to_string(),
            vec![
                "database".to_string(),
                "connection".to_string(),
                "pool".to_string(),
            ],
        )]);
        config
    }

    #[tokio::test]
    async fn test_exact_text_is_in_top_three() {
        let engine = indexed_engine().await;
        let generation = engine.snapshot().unwrap();

        for fragment in corpus() {
            let lexical = generation.lexical.search(&fragment.text, 3);
            assert!(
                lexical.iter().any(|h| h.id == fragment.id),
                "{} missing from lexical top 3",
                fragment.id
            );

            let result = engine
                .retrieve(&fragment.text, 3, RetrieveOptions::default())
                .await
                .unwrap();
            assert!(ids(&result).contains(&fragment.id.as_str()));
        }
    }

    #[tokio::test]
    async fn test_retrieve_is_idempotent() {
        let engine = indexed_engine().await;

        for query in ["how is density computed", "db", "grid", "csv centrality"] {
            let first = engine.retrieve(query, 4, RetrieveOptions::default()).await.unwrap();
            let second = engine.retrieve(query, 4, RetrieveOptions::default()).await.unwrap();
            assert_eq!(first, second, "query {:?}", query);
        }
    }

    #[tokio::test]
    async fn test_second_pass_runs_when_first_is_weak() {
        let engine = engine_with(abbreviation_config(2));
        engine.build_index(corpus()).await.unwrap();

        // "db" is in no fragment and too short to embed, so the first pass is empty
        let result = engine.retrieve("db", 3, RetrieveOptions::default()).await.unwrap();

        assert_eq!(result.attempts, 2);
        assert_eq!(result.status, RetrievalStatus::Complete);
        assert_eq!(result.effective_query, "db database connection pool");
        assert!(result.confidence >= engine.config().controller.threshold);
        assert_eq!(result.hits[0].fragment.id.as_str(), "open_database_pool");
    }

    #[tokio::test]
    async fn test_expansion_that_succeeds_ends_the_session() {
        let engine = engine_with(abbreviation_config(3));
        engine.build_index(corpus()).await.unwrap();

        let result = engine.retrieve("db", 3, RetrieveOptions::default()).await.unwrap();

        // A third attempt is allowed but not needed once expansion is confident
        assert_eq!(result.attempts, 2);
        assert!(result.confidence >= engine.config().controller.threshold);
        assert_eq!(result.effective_query, "db database connection pool");
    }

    #[tokio::test]
    async fn test_no_second_pass_at_attempt_limit() {
        let engine = engine_with(abbreviation_config(1));
        engine.build_index(corpus()).await.unwrap();

        let result = engine.retrieve("db", 3, RetrieveOptions::default()).await.unwrap();

        assert_eq!(result.attempts, 1);
        assert_eq!(result.confidence, 0.0);
        assert!(result.hits.is_empty());
        assert_eq!(result.effective_query, "db");
    }

    #[tokio::test]
    async fn test_no_second_pass_when_confident() {
        let engine = engine_with(abbreviation_config(3));
        engine.build_index(corpus()).await.unwrap();

        let result = engine
            .retrieve("open_database_pool", 3, RetrieveOptions::default())
            .await
            .unwrap();

        assert!(result.confidence >= engine.config().controller.threshold);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.hits[0].fragment.id.as_str(), "open_database_pool");
    }

    #[tokio::test]
    async fn test_confidence_grows_with_each_signal() {
        let engine = indexed_engine().await;
        let generation = engine.snapshot().unwrap();
        let scorer = ConfidenceScorer::new(engine.config().confidence.clone());

        let hit = |id: &str, raw: f32| RetrievalHit {
            fragment_id: FragmentId::new(id),
            score: 1.0,
            provenance: Provenance::Both,
            lexical_raw: Some(raw),
            semantic_raw: Some(0.1),
        };
        let weak = [hit("compute_density", 0.5)];
        let stronger = [hit("compute_density", 5.0)];
        let diverse = [hit("compute_density", 5.0), hit("readme", 0.1)];

        let query = "compute density";
        let base = scorer.score(query, &pairs(&generation, &weak));
        let relevant = scorer.score(query, &pairs(&generation, &stronger));
        let spread = scorer.score(query, &pairs(&generation, &diverse));
        let overlapping =
            scorer.score("compute density mass", &pairs(&generation, &stronger));

        assert!(relevant > base);
        assert!(spread > relevant);
        // More matched terms over more terms: overlap 1.0 either way
        assert_eq!(overlapping, relevant);
        assert!(scorer.score("compute unrelated", &pairs(&generation, &stronger)) < relevant);
    }

    #[tokio::test]
    async fn test_graph_callers_and_callees() {
        let engine = indexed_engine().await;

        let callees = engine.graph_neighbors("build_grid", Direction::Callees, 1);
        assert!(callees.iter().any(|e| e.name == "compute_density"));

        let callers = engine.graph_neighbors("compute_density", Direction::Callers, 1);
        assert!(callers.iter().any(|e| e.name == "build_grid"));

        let callers = engine.graph_neighbors("connect", Direction::Callers, 2);
        assert_eq!(
            callers.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["open_database_pool"]
        );

        assert!(engine
            .graph_neighbors("no_such_entity", Direction::Callees, 3)
            .is_empty());
    }

    #[tokio::test]
    async fn test_fusion_tie_is_deterministic() {
        let engine = engine_with(RetrievalConfig::default());
        engine
            .build_index(vec![
                fragment("beta", "b.md", FragmentKind::ProseBlock, "identical tie text"),
                fragment("alpha", "a.md", FragmentKind::ProseBlock, "identical tie text"),
            ])
            .await
            .unwrap();

        for _ in 0..3 {
            let result = engine
                .retrieve("identical tie text", 2, RetrieveOptions::default())
                .await
                .unwrap();
            assert_eq!(ids(&result), vec!["alpha", "beta"]);
            assert!(result.hits.iter().all(|h| h.provenance == Provenance::Both));
        }
    }

    #[tokio::test]
    async fn test_router_tie_prefers_code() {
        let engine = engine_with(RetrievalConfig::default());
        assert_eq!(
            engine.classify_intent("compute the integral"),
            (Domain::Code, GroundingPolicy::KnowledgeBaseOnly)
        );

        let result = engine
            .retrieve("compute the integral", 3, RetrieveOptions::default())
            .await
            .unwrap();
        assert_eq!(result.domain, Domain::Code);
        assert_eq!(result.grounding, GroundingPolicy::KnowledgeBaseOnly);
    }

    #[tokio::test]
    async fn test_partial_build_failure() {
        let engine = engine_with(RetrievalConfig::default());
        let mut batch: Vec<_> = (0..9)
            .map(|i| {
                fragment(
                    &format!("func_{}", i),
                    &format!("pkg/mod{}.py", i),
                    FragmentKind::CodeFunction,
                    &format!("def func_{}():\n    return {}\n", i, i),
                )
            })
            .collect();
        batch.push(fragment(
            "broken",
            "pkg/broken.py",
            FragmentKind::CodeFunction,
            "def broken(:\n    pass\n",
        ));

        let report = engine.build_index(batch).await.unwrap();
        assert_eq!(report.generation, GenerationId(1));
        assert_eq!(report.diagnostics.parse_failures.len(), 1);
        assert_eq!(report.diagnostics.parse_failures[0].source_path, "pkg/broken.py");

        let generation = engine.snapshot().unwrap();
        for i in 0..9 {
            let id = FragmentId::new(format!("func_{}", i));
            assert!(generation.store.contains(&id));
            assert_eq!(generation.graph.lookup(&format!("func_{}", i)).len(), 1);
        }
        assert!(generation.graph.lookup("broken").is_empty());
        assert_eq!(engine.stats().unwrap().parse_failures, 1);
    }

    #[tokio::test]
    async fn test_generations_are_published_atomically() {
        let provider = ControlledProvider::new();
        let engine = Engine::new(RetrievalConfig::default(), provider.clone()).unwrap();
        engine.build_index(corpus()).await.unwrap();

        let before = engine.snapshot().unwrap();
        let report = engine
            .build_index(vec![fragment(
                "notes",
                "NOTES.md",
                FragmentKind::ProseBlock,
                "release notes for the density solver",
            )])
            .await
            .unwrap();

        assert_eq!(before.id, GenerationId(1));
        assert_eq!(report.generation, GenerationId(2));
        assert_eq!(before.store.len(), 6);
        assert!(before.lexical.search("release notes", 3).is_empty());
        assert_eq!(engine.snapshot().unwrap().store.len(), 7);

        // A failed build leaves the active generation in place
        provider.set_failing(true);
        let failed = engine
            .build_index(vec![fragment(
                "todo",
                "TODO.md",
                FragmentKind::ProseBlock,
                "pending work items",
            )])
            .await;
        assert!(failed.is_err());
        assert_eq!(engine.current_generation(), Some(GenerationId(2)));
        assert!(!engine
            .snapshot()
            .unwrap()
            .store
            .contains(&FragmentId::new("todo")));

        provider.set_failing(false);
        let report = engine.remove_files(&["NOTES.md".to_string()]).await.unwrap();
        assert!(report.generation > GenerationId(2));
    }

    #[tokio::test]
    async fn test_incremental_lexical_stats_match_full_rebuild() {
        let engine = indexed_engine().await;
        engine
            .build_index(vec![fragment(
                "compute_density",
                "physics/density.py",
                FragmentKind::CodeFunction,
                "def compute_density(m, v):\n    return m / v\n",
            )])
            .await
            .unwrap();

        let generation = engine.snapshot().unwrap();
        let rebuilt = LexicalIndex::build(
            Bm25Params::from(&engine.config().lexical),
            &generation.store,
        );

        assert_eq!(generation.lexical.document_count(), rebuilt.document_count());
        assert_eq!(generation.lexical.term_count(), rebuilt.term_count());
        assert_eq!(generation.lexical.average_length(), rebuilt.average_length());
        assert_eq!(generation.lexical.document_frequency("mass"), 0);
        assert_eq!(
            generation.lexical.search("compute density volume", 5),
            rebuilt.search("compute density volume", 5)
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_first_pass() {
        let engine = indexed_engine().await;
        let token = CancellationToken::new();
        token.cancel();

        let result = engine
            .retrieve(
                "compute_density",
                3,
                RetrieveOptions {
                    cancel: Some(token),
                    ..RetrieveOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.status, RetrievalStatus::Cancelled);
        assert_eq!(result.attempts, 0);
        assert!(result.hits.is_empty());
    }

    #[tokio::test]
    async fn test_expired_deadline_truncates() {
        let engine = indexed_engine().await;

        let result = engine
            .retrieve(
                "compute_density",
                3,
                RetrieveOptions {
                    deadline: Some(Instant::now()),
                    ..RetrieveOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.status, RetrievalStatus::Truncated);
        assert_eq!(result.attempts, 0);
        assert!(result.hits.is_empty());
    }

    #[tokio::test]
    async fn test_slow_semantic_search_falls_back_to_lexical() {
        let provider = ControlledProvider::new();
        let engine = Engine::new(RetrievalConfig::default(), provider.clone()).unwrap();
        engine.build_index(corpus()).await.unwrap();
        provider.set_slow(true);

        let result = engine
            .retrieve(
                "compute_density",
                3,
                RetrieveOptions {
                    deadline: Some(Instant::now() + Duration::from_millis(100)),
                    ..RetrieveOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.status, RetrievalStatus::Truncated);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.hits[0].fragment.id.as_str(), "compute_density");
        assert!(result.hits.iter().all(|h| h.provenance == Provenance::Lexical));
    }

    #[tokio::test]
    async fn test_provider_mismatch_is_fatal_at_query_time() {
        let engine = indexed_engine().await;
        let generation = engine.snapshot().unwrap();
        let other = crate::embeddings::providers::trigram::TrigramProvider::new(32);

        let err = generation
            .semantic
            .search(&other, "density", 3, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, scout_core::AppError::ConfigMismatch(_)));
    }

    #[tokio::test]
    async fn test_provider_change_reembeds_everything() {
        let engine = indexed_engine().await;
        let previous = engine.snapshot().unwrap();

        let other = Engine::new(
            RetrievalConfig::default(),
            Arc::new(crate::embeddings::providers::trigram::TrigramProvider::new(32)),
        )
        .unwrap();
        let (_, diagnostics) = crate::generation::build_generation(
            Some(&previous),
            GenerationId(2),
            Vec::new(),
            &[],
            other.provider().as_ref(),
            other.config(),
            &crate::graph::ExtractorRegistry::with_defaults(),
        )
        .await
        .unwrap();

        assert_eq!(diagnostics.reused_embeddings, 0);
        assert_eq!(diagnostics.embedded_fragments, previous.store.len());
    }
}
