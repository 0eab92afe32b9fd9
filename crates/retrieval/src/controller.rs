//! Adaptive retrieval: a first pass, a confidence check, and wider passes when
//! the first one looks weak.

use std::collections::{BTreeMap, HashSet};

use scout_core::AppResult;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RetrievalConfig;
use crate::confidence::ConfidenceScorer;
use crate::embeddings::EmbeddingProvider;
use crate::fusion::{apply_rerank, dedup_by_id, expand_with_graph, fuse, Reranker};
use crate::generation::Generation;
use crate::router::RoutePlan;
use crate::session::QuerySession;
use crate::text::query_terms;
use crate::types::{Fragment, RankedHit, RankedResult, RetrievalHit, RetrievalStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    FirstPass,
    Scored,
    SecondPass,
    Scored2,
    Done,
}

/// Per-call knobs for `retrieve`.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    /// Passes that have not started by this instant are skipped; the semantic
    /// sub-step of a running pass is cut off at it.
    pub deadline: Option<Instant>,
    /// Checked before every pass. A pass in flight always completes.
    pub cancel: Option<CancellationToken>,
    /// Override the route plan's graph expansion on later passes
    pub graph_expansion: Option<bool>,
}

impl RetrieveOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Outcome of one pass.
#[derive(Debug, Clone)]
struct Attempt {
    query: String,
    hits: Vec<RetrievalHit>,
    confidence: f32,
    /// The semantic sub-step ran out of time; `hits` are lexical only
    truncated: bool,
}

pub struct AdaptiveController<'a> {
    generation: &'a Generation,
    provider: &'a dyn EmbeddingProvider,
    config: &'a RetrievalConfig,
    reranker: Option<&'a dyn Reranker>,
    scorer: ConfidenceScorer,
}

impl<'a> AdaptiveController<'a> {
    pub fn new(
        generation: &'a Generation,
        provider: &'a dyn EmbeddingProvider,
        config: &'a RetrievalConfig,
        reranker: Option<&'a dyn Reranker>,
    ) -> Self {
        Self {
            generation,
            provider,
            config,
            reranker,
            scorer: ConfidenceScorer::new(config.confidence.clone()),
        }
    }

    /// Run the state machine for `query` and return the best attempt.
    pub async fn run(
        &self,
        query: &str,
        top_k: usize,
        plan: RoutePlan,
        options: &RetrieveOptions,
    ) -> AppResult<RankedResult> {
        let limit = if top_k == 0 {
            self.config.fusion.max_results
        } else {
            top_k
        };
        let threshold = self.config.controller.threshold;
        let max_attempts = self.config.controller.max_attempts.max(1);
        let growth = self.config.controller.k_growth.max(1);

        let mut session = QuerySession::new(query, &plan);
        let mut lexical_k = self.config.lexical.top_k.max(limit);
        let mut semantic_k = self.config.semantic.top_k.max(limit);

        let mut state = ControllerState::Idle;
        let mut status = RetrievalStatus::Complete;
        let mut best: Option<Attempt> = None;
        let mut last_confidence = 0.0;

        loop {
            let next = match state {
                ControllerState::Idle => ControllerState::FirstPass,
                ControllerState::FirstPass | ControllerState::SecondPass => {
                    if options.is_cancelled() {
                        status = RetrievalStatus::Cancelled;
                        ControllerState::Done
                    } else if options.deadline_passed() {
                        status = RetrievalStatus::Truncated;
                        ControllerState::Done
                    } else {
                        let later = state == ControllerState::SecondPass;
                        let attempt_no = session.begin_attempt();
                        let effective = if later {
                            expand_query(query, &self.config.controller.synonyms)
                        } else {
                            query.to_string()
                        };
                        let use_graph =
                            later && options.graph_expansion.unwrap_or(plan.graph_expansion);

                        let attempt = self
                            .pass(&effective, lexical_k, semantic_k, limit, use_graph, options)
                            .await?;
                        tracing::debug!(
                            session = %session.id,
                            attempt = attempt_no,
                            query = %attempt.query,
                            hits = attempt.hits.len(),
                            confidence = attempt.confidence,
                            "Pass completed"
                        );

                        session.record(&attempt.hits);
                        last_confidence = attempt.confidence;
                        let truncated = attempt.truncated;
                        if best
                            .as_ref()
                            .map_or(true, |b| attempt.confidence > b.confidence)
                        {
                            best = Some(attempt);
                        }

                        if truncated {
                            status = RetrievalStatus::Truncated;
                            ControllerState::Done
                        } else if later {
                            ControllerState::Scored2
                        } else {
                            ControllerState::Scored
                        }
                    }
                }
                ControllerState::Scored | ControllerState::Scored2 => {
                    if last_confidence >= threshold || session.attempts >= max_attempts {
                        ControllerState::Done
                    } else {
                        lexical_k = lexical_k.saturating_mul(growth);
                        semantic_k = semantic_k.saturating_mul(growth);
                        ControllerState::SecondPass
                    }
                }
                ControllerState::Done => break,
            };

            tracing::debug!(from = ?state, to = ?next, "Controller transition");
            state = next;
        }

        tracing::debug!(
            session = %session.id,
            attempts = session.attempts,
            candidates = session.candidate_count(),
            elapsed_ms = session.elapsed_ms(),
            "Retrieval finished"
        );

        let generation = Some(self.generation.id);
        let Some(best) = best else {
            return Ok(RankedResult::empty(
                query,
                status,
                plan.domain,
                plan.grounding,
                generation,
            ));
        };

        let hits = best
            .hits
            .iter()
            .filter_map(|hit| {
                self.generation.fragment(&hit.fragment_id).map(|fragment| RankedHit {
                    fragment: fragment.clone(),
                    score: hit.score,
                    provenance: hit.provenance,
                })
            })
            .collect();

        Ok(RankedResult {
            query: query.to_string(),
            effective_query: best.query,
            hits,
            confidence: best.confidence,
            attempts: session.attempts,
            status,
            domain: plan.domain,
            grounding: plan.grounding,
            generation,
        })
    }

    /// One pass: lexical and semantic concurrently, then fuse, expand and score.
    async fn pass(
        &self,
        query: &str,
        lexical_k: usize,
        semantic_k: usize,
        limit: usize,
        use_graph: bool,
        options: &RetrieveOptions,
    ) -> AppResult<Attempt> {
        let generation = self.generation;
        let min_similarity = self.config.semantic.min_similarity;

        let lexical = async { generation.lexical.search(query, lexical_k) };
        let semantic = async {
            let search =
                generation
                    .semantic
                    .search(self.provider, query, semantic_k, min_similarity);
            match options.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, search).await.ok(),
                None => Some(search.await),
            }
        };
        let (lexical, semantic) = tokio::join!(lexical, semantic);

        let (semantic, truncated) = match semantic {
            Some(result) => (result?, false),
            None => {
                tracing::debug!("Semantic search hit the deadline; using lexical results only");
                (Vec::new(), true)
            }
        };

        let fusion = &self.config.fusion;
        let mut hits = fuse(&lexical, &semantic, fusion, limit);

        if use_graph && !truncated {
            hits = expand_with_graph(hits, &generation.graph, fusion, limit);
        }

        if let Some(reranker) = self.reranker.filter(|_| fusion.rerank && !truncated) {
            hits = apply_rerank(hits, query, reranker, fusion.rerank_top, |id| {
                generation.fragment(id)
            });
        }

        let mut hits = dedup_by_id(hits);
        hits.retain(|h| generation.store.contains(&h.fragment_id));
        hits.truncate(limit);

        let confidence = {
            let pairs: Vec<(&RetrievalHit, &Fragment)> = hits
                .iter()
                .filter_map(|h| generation.fragment(&h.fragment_id).map(|f| (h, f)))
                .collect();
            self.scorer.score(query, &pairs)
        };

        Ok(Attempt {
            query: query.to_string(),
            hits,
            confidence,
            truncated,
        })
    }
}

/// Append the expansions of every query term found in `synonyms`.
///
/// Matching is token-level and case-insensitive; expansions already in the
/// query are skipped. The table is walked in key order so the output is stable.
pub fn expand_query(query: &str, synonyms: &BTreeMap<String, Vec<String>>) -> String {
    let terms: HashSet<String> = query_terms(query, false).into_iter().collect();
    let mut present = terms.clone();
    let mut additions: Vec<String> = Vec::new();

    for (term, expansions) in synonyms {
        if !terms.contains(&term.to_lowercase()) {
            continue;
        }
        for expansion in expansions {
            let expansion = expansion.to_lowercase();
            if present.insert(expansion.clone()) {
                additions.push(expansion);
            }
        }
    }

    if additions.is_empty() {
        query.to_string()
    } else {
        format!("{} {}", query, additions.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> BTreeMap<String, Vec<String>> {
        let mut synonyms = BTreeMap::new();
        synonyms.insert(
            "db".to_string(),
            vec!["database".to_string(), "connection".to_string()],
        );
        synonyms.insert("cfg".to_string(), vec!["config".to_string()]);
        synonyms.insert("Auth".to_string(), vec!["login".to_string()]);
        synonyms
    }

    #[test]
    fn test_expand_query() {
        assert_eq!(
            expand_query("open DB with cfg", &table()),
            "open DB with cfg config database connection"
        );
        assert_eq!(expand_query("auth flow", &table()), "auth flow login");
        assert_eq!(expand_query("nothing here", &table()), "nothing here");
    }

    #[test]
    fn test_expand_query_skips_terms_already_present() {
        assert_eq!(
            expand_query("db database", &table()),
            "db database connection"
        );
    }

    #[test]
    fn test_expand_query_matches_identifier_parts() {
        assert_eq!(
            expand_query("where is get_db", &table()),
            "where is get_db database connection"
        );
    }
}
