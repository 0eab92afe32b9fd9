//! Keyword intent router: domain and grounding policy for a query.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::text::tokenize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Code,
    Data,
    Math,
    Documentation,
    General,
}

impl Domain {
    /// Tie-break order, highest priority first.
    pub const PRIORITY: [Domain; 4] = [
        Domain::Code,
        Domain::Math,
        Domain::Data,
        Domain::Documentation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Code => "code",
            Domain::Data => "data",
            Domain::Math => "math",
            Domain::Documentation => "documentation",
            Domain::General => "general",
        }
    }

    pub fn grounding(self) -> GroundingPolicy {
        match self {
            Domain::Code | Domain::Data => GroundingPolicy::KnowledgeBaseOnly,
            Domain::Documentation | Domain::General => GroundingPolicy::KnowledgeBasePreferred,
            Domain::Math => GroundingPolicy::ExternalKnowledgeAllowed,
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Domain::Code => &[
                "function", "class", "method", "import", "variable", "loop", "def", "return",
                "parameter", "argument", "compute", "calculate", "where is", "how does",
                "implementation", "algorithm", "called",
            ],
            Domain::Data => &[
                "csv", "hdf5", "output", "data", "file", "plot", "figure", "results", "table",
                "column", "row", "values", "generate", "json", "yaml",
            ],
            Domain::Documentation => &[
                "documentation", "readme", "paper", "reference", "explain", "tutorial", "guide",
                "help", "what is", "describe", "meaning",
            ],
            Domain::Math => &[
                "formula", "equation", "integral", "derivative", "physics", "latex", "math",
                "units", "dimension", "theory", "model", "term", "sum",
            ],
            Domain::General => &[],
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an answer may draw on knowledge beyond the retrieved fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroundingPolicy {
    KnowledgeBaseOnly,
    KnowledgeBasePreferred,
    ExternalKnowledgeAllowed,
}

impl GroundingPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            GroundingPolicy::KnowledgeBaseOnly => "knowledge-base-only",
            GroundingPolicy::KnowledgeBasePreferred => "knowledge-base-preferred",
            GroundingPolicy::ExternalKnowledgeAllowed => "external-knowledge-allowed",
        }
    }
}

impl fmt::Display for GroundingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the controller should do for a routed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub domain: Domain,
    pub grounding: GroundingPolicy,
    /// Whether later passes may expand through the dependency graph
    pub graph_expansion: bool,
}

/// Number of keywords of `domain` present in the query.
///
/// Single words match whole tokens (a plural `s` is tolerated); multi-word
/// keywords match as phrases over the token sequence.
fn keyword_score(domain: Domain, tokens: &[String]) -> usize {
    domain
        .keywords()
        .iter()
        .filter(|keyword| {
            let words: Vec<&str> = keyword.split_whitespace().collect();
            match words.as_slice() {
                [word] => tokens.iter().any(|t| token_matches(t, word)),
                phrase => tokens
                    .windows(phrase.len())
                    .any(|window| window.iter().zip(phrase).all(|(t, w)| t == w)),
            }
        })
        .count()
}

fn token_matches(token: &str, word: &str) -> bool {
    token == word || token.strip_suffix('s') == Some(word)
}

/// Classify a query. Pure: the same text always yields the same answer.
pub fn classify_intent(query: &str) -> (Domain, GroundingPolicy) {
    let tokens = tokenize(query);

    let mut best = Domain::General;
    let mut best_score = 0;
    for domain in Domain::PRIORITY {
        let score = keyword_score(domain, &tokens);
        // Strictly greater, so earlier (higher priority) domains win ties
        if score > best_score {
            best = domain;
            best_score = score;
        }
    }

    (best, best.grounding())
}

pub fn route(query: &str) -> RoutePlan {
    let (domain, grounding) = classify_intent(query);
    RoutePlan {
        domain,
        grounding,
        graph_expansion: matches!(domain, Domain::Code | Domain::General),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domains() {
        assert_eq!(classify_intent("Which function computes density?").0, Domain::Code);
        assert_eq!(classify_intent("Plot the csv results").0, Domain::Data);
        assert_eq!(classify_intent("Explain the README tutorial").0, Domain::Documentation);
        assert_eq!(classify_intent("derive the equation").0, Domain::Math);
        assert_eq!(classify_intent("hello there").0, Domain::General);
        assert_eq!(classify_intent("").0, Domain::General);
    }

    #[test]
    fn test_ties_follow_priority() {
        // code 1, math 1
        assert_eq!(classify_intent("compute the integral").0, Domain::Code);
        // math 1 (formula), documentation 1 (what is)
        assert_eq!(classify_intent("What is the formula for RpA?").0, Domain::Math);
        // data 1 (table), documentation 1 (guide)
        assert_eq!(classify_intent("table guide").0, Domain::Data);
        // math 1 (sum), data 1 (csv)
        assert_eq!(classify_intent("sum csv").0, Domain::Math);
    }

    #[test]
    fn test_whole_token_matching() {
        // "classic" must not count as "class", nor "summary" as "sum"
        assert_eq!(classify_intent("a classic summary").0, Domain::General);
        assert_eq!(classify_intent("list the methods").0, Domain::Code);
    }

    #[test]
    fn test_grounding_and_plan() {
        assert_eq!(
            classify_intent("plot it").1,
            GroundingPolicy::KnowledgeBaseOnly
        );
        assert_eq!(
            classify_intent("integral").1,
            GroundingPolicy::ExternalKnowledgeAllowed
        );
        assert!(route("where is the loop").graph_expansion);
        assert!(route("greetings").graph_expansion);
        assert!(!route("describe the paper").graph_expansion);
    }

    #[test]
    fn test_classification_is_pure() {
        let query = "How does the density function use the csv output?";
        assert_eq!(classify_intent(query), classify_intent(query));
    }
}
