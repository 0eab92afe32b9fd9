//! Per-question session state and multi-turn conversation history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::router::{Domain, GroundingPolicy, RoutePlan};
use crate::types::{FragmentId, RankedResult, RetrievalHit};

/// Ephemeral state of one question. Created per `retrieve` call and dropped after.
#[derive(Debug, Clone)]
pub struct QuerySession {
    pub id: String,
    pub query: String,
    pub domain: Domain,
    pub grounding: GroundingPolicy,
    pub attempts: u32,
    /// Best fused score seen for every candidate across all passes
    candidates: HashMap<FragmentId, f32>,
    pub started_at: DateTime<Utc>,
}

impl QuerySession {
    pub fn new(query: &str, plan: &RoutePlan) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query: query.to_string(),
            domain: plan.domain,
            grounding: plan.grounding,
            attempts: 0,
            candidates: HashMap::new(),
            started_at: Utc::now(),
        }
    }

    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn record(&mut self, hits: &[RetrievalHit]) {
        for hit in hits {
            let best = self.candidates.entry(hit.fragment_id.clone()).or_insert(hit.score);
            if hit.score > *best {
                *best = hit.score;
            }
        }
    }

    /// Distinct fragments seen across all passes.
    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }
}

/// One answered question in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub query: String,
    pub domain: Domain,
    pub fragment_ids: Vec<FragmentId>,
    pub confidence: f32,
    pub at: DateTime<Utc>,
}

/// Ordered history of turns. Earlier turns are context for the answer
/// collaborator only; retrieval never re-scores them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            turns: Vec::new(),
        }
    }

    pub fn push(&mut self, result: &RankedResult) {
        self.turns.push(Turn {
            query: result.query.clone(),
            domain: result.domain,
            fragment_ids: result.hits.iter().map(|h| h.fragment.id.clone()).collect(),
            confidence: result.confidence,
            at: Utc::now(),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::route;
    use crate::types::{Provenance, RetrievalStatus};

    #[test]
    fn test_session_tracks_best_candidate_scores() {
        let mut session = QuerySession::new("where is the loop", &route("where is the loop"));
        assert_eq!(session.domain, Domain::Code);
        assert_eq!(session.begin_attempt(), 1);

        let hit = |id: &str, score: f32| RetrievalHit {
            fragment_id: FragmentId::new(id),
            score,
            provenance: Provenance::Lexical,
            lexical_raw: Some(score),
            semantic_raw: None,
        };
        session.record(&[hit("a", 0.2), hit("b", 0.4)]);
        session.record(&[hit("a", 0.9)]);

        assert_eq!(session.candidate_count(), 2);
        assert_eq!(session.candidates.get(&FragmentId::new("a")), Some(&0.9));
        assert_eq!(session.begin_attempt(), 2);
    }

    #[test]
    fn test_conversation_appends_turns() {
        let mut conversation = Conversation::new();
        assert!(conversation.is_empty());

        let mut result = RankedResult::empty(
            "plot the csv",
            RetrievalStatus::Complete,
            Domain::Data,
            GroundingPolicy::KnowledgeBaseOnly,
            None,
        );
        result.confidence = 0.7;
        conversation.push(&result);

        assert_eq!(conversation.len(), 1);
        let turn = conversation.last().unwrap();
        assert_eq!(turn.query, "plot the csv");
        assert_eq!(turn.domain, Domain::Data);
        assert!(turn.fragment_ids.is_empty());
    }
}
