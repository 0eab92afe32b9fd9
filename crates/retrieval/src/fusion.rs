//! Fusion of lexical and semantic candidates, graph expansion and reranking.
//!
//! Raw BM25 and cosine scores live on different scales, so each list is
//! normalized to [0, 1] before the weighted merge.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::FusionConfig;
use crate::graph::DependencyGraph;
use crate::text::{query_terms, tokenize};
use crate::types::{Fragment, FragmentId, Provenance, RetrievalHit, ScoredFragment};

/// Min-max normalize scores of a list ranked best-first.
///
/// When every score is equal (including a single result) min-max carries no
/// information, so the rank-based `1 - rank/len` is used instead.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    if range.is_finite() && range > f32::EPSILON {
        scores.iter().map(|s| (s - min) / range).collect()
    } else {
        let len = scores.len() as f32;
        (0..scores.len()).map(|rank| 1.0 - rank as f32 / len).collect()
    }
}

/// Ranking order: score, then provenance (both > semantic > lexical > graph), then id.
pub fn compare_hits(a: &RetrievalHit, b: &RetrievalHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.provenance.tie_rank().cmp(&a.provenance.tie_rank()))
        .then_with(|| a.fragment_id.cmp(&b.fragment_id))
}

#[derive(Default)]
struct Candidate {
    lexical_norm: Option<f32>,
    semantic_norm: Option<f32>,
    lexical_raw: Option<f32>,
    semantic_raw: Option<f32>,
}

/// Weighted merge of two ranked lists into at most `limit` hits.
pub fn fuse(
    lexical: &[ScoredFragment],
    semantic: &[ScoredFragment],
    config: &FusionConfig,
    limit: usize,
) -> Vec<RetrievalHit> {
    let mut candidates: BTreeMap<FragmentId, Candidate> = BTreeMap::new();

    let lexical_scores: Vec<f32> = lexical.iter().map(|s| s.score).collect();
    for (scored, norm) in lexical.iter().zip(min_max_normalize(&lexical_scores)) {
        let candidate = candidates.entry(scored.id.clone()).or_default();
        candidate.lexical_norm = Some(norm);
        candidate.lexical_raw = Some(scored.score);
    }

    let semantic_scores: Vec<f32> = semantic.iter().map(|s| s.score).collect();
    for (scored, norm) in semantic.iter().zip(min_max_normalize(&semantic_scores)) {
        let candidate = candidates.entry(scored.id.clone()).or_default();
        candidate.semantic_norm = Some(norm);
        candidate.semantic_raw = Some(scored.score);
    }

    let mut hits: Vec<RetrievalHit> = candidates
        .into_iter()
        .map(|(fragment_id, c)| {
            let provenance = match (c.lexical_norm.is_some(), c.semantic_norm.is_some()) {
                (true, true) => Provenance::Both,
                (false, true) => Provenance::Semantic,
                _ => Provenance::Lexical,
            };
            let score = config.lexical_weight * c.lexical_norm.unwrap_or(0.0)
                + config.semantic_weight * c.semantic_norm.unwrap_or(0.0);
            RetrievalHit {
                fragment_id,
                score,
                provenance,
                lexical_raw: c.lexical_raw,
                semantic_raw: c.semantic_raw,
            }
        })
        .collect();

    hits.sort_by(compare_hits);
    hits.truncate(limit);
    hits
}

/// Pull in the callers and callees of the top fused fragments.
///
/// A neighbour scores `graph_discount * seed score`. One that is already a
/// candidate keeps the higher score and its original provenance.
pub fn expand_with_graph(
    mut hits: Vec<RetrievalHit>,
    graph: &DependencyGraph,
    config: &FusionConfig,
    limit: usize,
) -> Vec<RetrievalHit> {
    let seeds: Vec<(FragmentId, f32)> = hits
        .iter()
        .take(config.graph_seeds)
        .map(|h| (h.fragment_id.clone(), h.score))
        .collect();

    let mut positions: HashMap<FragmentId, usize> = hits
        .iter()
        .enumerate()
        .map(|(i, h)| (h.fragment_id.clone(), i))
        .collect();

    let mut added = 0;
    for (seed, seed_score) in seeds {
        let discounted = config.graph_discount * seed_score;
        for neighbor in graph.related_fragments(&seed, config.graph_neighbors_per_seed) {
            match positions.get(&neighbor) {
                Some(&i) => {
                    if discounted > hits[i].score {
                        hits[i].score = discounted;
                    }
                }
                None => {
                    positions.insert(neighbor.clone(), hits.len());
                    hits.push(RetrievalHit {
                        fragment_id: neighbor,
                        score: discounted,
                        provenance: Provenance::Graph,
                        lexical_raw: None,
                        semantic_raw: None,
                    });
                    added += 1;
                }
            }
        }
    }

    if added > 0 {
        tracing::debug!("Graph expansion added {} candidates", added);
    }

    hits.sort_by(compare_hits);
    hits.truncate(limit);
    hits
}

/// Second-stage ordering of the top candidates.
///
/// Implementations return fragment ids best-first. Ids that were not among the
/// candidates are ignored and candidates left out keep their relative order
/// after the reranked ones.
pub trait Reranker: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn rerank(&self, query: &str, candidates: &[(&RetrievalHit, &Fragment)]) -> Vec<FragmentId>;
}

/// Blends the fused score with how many query terms a fragment contains.
#[derive(Debug, Clone)]
pub struct KeywordReranker {
    /// Share of the final score taken by term coverage
    pub coverage_weight: f32,
}

impl Default for KeywordReranker {
    fn default() -> Self {
        Self {
            coverage_weight: 0.5,
        }
    }
}

impl KeywordReranker {
    fn coverage(terms: &[String], fragment: &Fragment) -> f32 {
        if terms.is_empty() {
            return 0.0;
        }
        let mut tokens: HashSet<String> = tokenize(&fragment.text).into_iter().collect();
        if let Some(symbol) = &fragment.symbol {
            tokens.extend(tokenize(symbol));
        }
        let matched = terms.iter().filter(|t| tokens.contains(*t)).count();
        matched as f32 / terms.len() as f32
    }
}

impl Reranker for KeywordReranker {
    fn name(&self) -> &str {
        "keyword"
    }

    fn rerank(&self, query: &str, candidates: &[(&RetrievalHit, &Fragment)]) -> Vec<FragmentId> {
        let mut terms = query_terms(query, true);
        if terms.is_empty() {
            terms = query_terms(query, false);
        }

        let weight = self.coverage_weight.clamp(0.0, 1.0);
        let mut scored: Vec<(f32, &FragmentId)> = candidates
            .iter()
            .map(|(hit, fragment)| {
                let blended =
                    (1.0 - weight) * hit.score + weight * Self::coverage(&terms, fragment);
                (blended, &hit.fragment_id)
            })
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored.into_iter().map(|(_, id)| id.clone()).collect()
    }
}

/// Reorder the first `top` hits with `reranker`. Scores are left untouched.
pub fn apply_rerank<'f>(
    hits: Vec<RetrievalHit>,
    query: &str,
    reranker: &dyn Reranker,
    top: usize,
    fragment_for: impl Fn(&FragmentId) -> Option<&'f Fragment>,
) -> Vec<RetrievalHit> {
    if top < 2 || hits.len() < 2 {
        return hits;
    }

    let split = top.min(hits.len());
    let mut head = hits;
    let tail = head.split_off(split);

    let order = {
        let candidates: Vec<(&RetrievalHit, &Fragment)> = head
            .iter()
            .filter_map(|hit| fragment_for(&hit.fragment_id).map(|f| (hit, f)))
            .collect();
        reranker.rerank(query, &candidates)
    };

    let mut slots: Vec<Option<RetrievalHit>> = head.into_iter().map(Some).collect();
    let index: HashMap<FragmentId, usize> = slots
        .iter()
        .enumerate()
        .filter_map(|(i, slot)| slot.as_ref().map(|h| (h.fragment_id.clone(), i)))
        .collect();

    let mut reordered = Vec::with_capacity(slots.len() + tail.len());
    for id in order {
        if let Some(hit) = index.get(&id).and_then(|&i| slots[i].take()) {
            reordered.push(hit);
        }
    }
    reordered.extend(slots.into_iter().flatten());
    reordered.extend(tail);
    reordered
}

/// Keep the first occurrence of every fragment id.
pub fn dedup_by_id(hits: Vec<RetrievalHit>) -> Vec<RetrievalHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|h| seen.insert(h.fragment_id.clone()))
        .collect()
}
