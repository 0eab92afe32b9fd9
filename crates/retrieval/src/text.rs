//! Tokenization shared by the lexical index, the reranker and the confidence scorer.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_]+").expect("valid token regex"));

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "does", "for", "from",
    "has", "have", "how", "i", "in", "is", "it", "its", "me", "of", "on", "or", "show", "that",
    "the", "their", "them", "there", "they", "this", "to", "was", "we", "were", "what", "when",
    "where", "which", "who", "why", "will", "with", "you",
];

static STOP_SET: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| STOP_WORDS.iter().copied().collect());

pub fn is_stop_word(term: &str) -> bool {
    STOP_SET.contains(term)
}

/// Split text into case-folded terms.
///
/// Compound identifiers (`snake_case`, `camelCase`, `HTMLParser`) are kept whole
/// and also emit their parts, so `compute_rpa_grid` yields
/// `compute_rpa_grid, compute, rpa, grid`.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for m in TOKEN_RE.find_iter(text) {
        let word = m.as_str();
        tokens.push(word.to_lowercase());

        let parts = split_identifier(word);
        if parts.len() > 1 {
            tokens.extend(parts);
        }
    }
    tokens
}

/// Distinct query terms in first-seen order, optionally without stop words.
pub fn query_terms(text: &str, drop_stop_words: bool) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| !(drop_stop_words && is_stop_word(t)))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn split_identifier(word: &str) -> Vec<String> {
    let mut parts = Vec::new();

    for piece in word.split('_').filter(|p| !p.is_empty()) {
        let chars: Vec<char> = piece.chars().collect();
        let mut current = String::new();

        for (i, &ch) in chars.iter().enumerate() {
            if i > 0 && ch.is_uppercase() {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|c| c.is_lowercase());
                let boundary = prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && next_is_lower);
                if boundary && !current.is_empty() {
                    parts.push(current.to_lowercase());
                    current = String::new();
                }
            }
            current.push(ch);
        }

        if !current.is_empty() {
            parts.push(current.to_lowercase());
        }
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_simple() {
        assert_eq!(tokenize("Hello, World!"), vec!["hello", "world"]);
    }

    #[test]
    fn test_tokenize_snake_case() {
        assert_eq!(
            tokenize("compute_rpa_grid(x)"),
            vec!["compute_rpa_grid", "compute", "rpa", "grid", "x"]
        );
    }

    #[test]
    fn test_tokenize_camel_case_and_acronyms() {
        assert_eq!(tokenize("getUserById"), vec!["getuserbyid", "get", "user", "by", "id"]);
        assert_eq!(tokenize("HTMLParser"), vec!["htmlparser", "html", "parser"]);
    }

    #[test]
    fn test_tokenize_empty() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("  -- ** ").is_empty());
    }

    #[test]
    fn test_query_terms_dedup_and_stop_words() {
        assert_eq!(
            query_terms("Where is the pool? the POOL", true),
            vec!["pool"]
        );
        assert_eq!(
            query_terms("where is pool", false),
            vec!["where", "is", "pool"]
        );
    }
}
