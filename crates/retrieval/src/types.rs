//! Retrieval system type definitions.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::generation::GenerationId;
use crate::router::{Domain, GroundingPolicy};

/// Stable identifier of a fragment, assigned by the extractor that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(String);

impl FragmentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FragmentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// What a fragment holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FragmentKind {
    CodeFunction,
    CodeClass,
    /// Module-level code: imports and top-level statements.
    CodeModule,
    ProseBlock,
    DataSample,
    DocumentPage,
}

impl FragmentKind {
    pub fn is_code(self) -> bool {
        matches!(
            self,
            FragmentKind::CodeFunction | FragmentKind::CodeClass | FragmentKind::CodeModule
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FragmentKind::CodeFunction => "code-function",
            FragmentKind::CodeClass => "code-class",
            FragmentKind::CodeModule => "code-module",
            FragmentKind::ProseBlock => "prose-block",
            FragmentKind::DataSample => "data-sample",
            FragmentKind::DocumentPage => "document-page",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "code-function" => Some(FragmentKind::CodeFunction),
            "code-class" => Some(FragmentKind::CodeClass),
            "code-module" => Some(FragmentKind::CodeModule),
            "prose-block" => Some(FragmentKind::ProseBlock),
            "data-sample" => Some(FragmentKind::DataSample),
            "document-page" => Some(FragmentKind::DocumentPage),
            _ => None,
        }
    }
}

/// Immutable unit of retrievable text.
///
/// Fragments arrive already extracted; the engine never mutates them. Re-indexing
/// a source file replaces every fragment of that file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: FragmentId,

    /// Path of the source file, relative to the repository root
    pub source_path: String,

    /// First line (1-based, inclusive)
    pub start_line: u32,

    /// Last line (inclusive)
    pub end_line: u32,

    pub kind: FragmentKind,

    pub text: String,

    /// Symbol name for code fragments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

impl Fragment {
    /// SHA-256 of the fragment's text, used to reuse embeddings across generations.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn is_code(&self) -> bool {
        self.kind.is_code()
    }

    /// File extension of the source path, lowercased.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.source_path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
    }

    /// Structural checks applied at ingest.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.as_str().trim().is_empty() {
            return Err("empty fragment id".to_string());
        }
        if self.source_path.trim().is_empty() {
            return Err("empty source path".to_string());
        }
        if self.end_line < self.start_line {
            return Err(format!(
                "end line {} precedes start line {}",
                self.end_line, self.start_line
            ));
        }
        if self.text.trim().is_empty() {
            return Err("fragment text is empty".to_string());
        }
        Ok(())
    }
}

/// Which retrieval path produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Lexical,
    Semantic,
    /// Found by both the lexical and the semantic index.
    Both,
    /// Added by dependency-graph expansion.
    Graph,
}

impl Provenance {
    /// Tie-break rank: higher wins.
    pub fn tie_rank(self) -> u8 {
        match self {
            Provenance::Both => 3,
            Provenance::Semantic => 2,
            Provenance::Lexical => 1,
            Provenance::Graph => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Lexical => "lexical",
            Provenance::Semantic => "semantic",
            Provenance::Both => "both",
            Provenance::Graph => "graph",
        }
    }

    pub fn merge(self, other: Provenance) -> Provenance {
        match (self, other) {
            (a, b) if a == b => a,
            (Provenance::Graph, other) | (other, Provenance::Graph) => other,
            _ => Provenance::Both,
        }
    }
}

/// A single index's raw answer: fragment id and an index-specific score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredFragment {
    pub id: FragmentId,
    pub score: f32,
}

/// A fused candidate. Raw index scores travel with it for confidence calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub fragment_id: FragmentId,
    pub score: f32,
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lexical_raw: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_raw: Option<f32>,
}

/// Final ranked entry handed to the answer collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedHit {
    pub fragment: Fragment,
    pub score: f32,
    pub provenance: Provenance,
}

/// How a retrieval ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalStatus {
    Complete,
    /// The deadline expired; the result is the best completed sub-step.
    Truncated,
    /// Cancelled before a pass could start.
    Cancelled,
    /// No generation has been published yet.
    IndexUnavailable,
}

/// Output of `retrieve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub query: String,
    /// Query text of the attempt that produced `hits` (expanded on second passes).
    pub effective_query: String,
    pub hits: Vec<RankedHit>,
    pub confidence: f32,
    pub attempts: u32,
    pub status: RetrievalStatus,
    pub domain: Domain,
    pub grounding: GroundingPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationId>,
}

impl RankedResult {
    pub(crate) fn empty(
        query: &str,
        status: RetrievalStatus,
        domain: Domain,
        grounding: GroundingPolicy,
        generation: Option<GenerationId>,
    ) -> Self {
        Self {
            query: query.to_string(),
            effective_query: query.to_string(),
            hits: Vec::new(),
            confidence: 0.0,
            attempts: 0,
            status,
            domain,
            grounding,
            generation,
        }
    }

    pub fn fragment_ids(&self) -> Vec<&FragmentId> {
        self.hits.iter().map(|h| &h.fragment.id).collect()
    }

    pub fn is_low_confidence(&self, threshold: f32) -> bool {
        self.confidence < threshold
    }
}

/// A code fragment that failed to parse. It stays in the text indexes without graph facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub fragment_id: FragmentId,
    pub source_path: String,
    pub reason: String,
}

/// A fragment refused at ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedFragment {
    pub fragment_id: FragmentId,
    pub source_path: String,
    pub reason: String,
}

/// Everything that went wrong (but did not abort) during a build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildDiagnostics {
    pub parse_failures: Vec<ParseFailure>,
    pub rejected: Vec<RejectedFragment>,
    /// Code fragments in languages without an entity extractor
    pub unsupported_code_fragments: usize,
    /// Call, import or base-class references that matched no known entity
    pub unresolved_references: usize,
    /// Fragments dropped because their source file was re-indexed or removed
    pub invalidated_fragments: usize,
    /// Fragments whose embedding was carried over from the previous generation
    pub reused_embeddings: usize,
    pub embedded_fragments: usize,
}

impl BuildDiagnostics {
    pub fn is_clean(&self) -> bool {
        self.parse_failures.is_empty() && self.rejected.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(id: &str, text: &str) -> Fragment {
        Fragment {
            id: FragmentId::new(id),
            source_path: "src/lib.py".to_string(),
            start_line: 1,
            end_line: 3,
            kind: FragmentKind::CodeFunction,
            text: text.to_string(),
            symbol: None,
        }
    }

    #[test]
    fn test_content_hash() {
        let a = fragment("a", "def f(): pass");
        let b = fragment("b", "def f(): pass");
        let c = fragment("c", "def g(): pass");
        assert_eq!(a.content_hash().len(), 64);
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn test_validate_rejects_inverted_lines() {
        let mut f = fragment("a", "x = 1");
        f.start_line = 10;
        f.end_line = 2;
        assert!(f.validate().unwrap_err().contains("precedes"));
    }

    #[test]
    fn test_validate_rejects_blank_text() {
        assert!(fragment("a", "   \n").validate().is_err());
        assert!(fragment("", "x").validate().is_err());
        assert!(fragment("a", "x").validate().is_ok());
    }

    #[test]
    fn test_fragment_kind_serde() {
        let json = serde_json::to_string(&FragmentKind::CodeFunction).unwrap();
        assert_eq!(json, "\"code-function\"");
        assert_eq!(FragmentKind::parse("prose-block"), Some(FragmentKind::ProseBlock));
        assert_eq!(FragmentKind::parse("nope"), None);
    }

    #[test]
    fn test_fragment_jsonl_shape() {
        let line = r#"{"id":"f1","source_path":"a.py","start_line":1,"end_line":2,"kind":"code-class","text":"class A: pass"}"#;
        let f: Fragment = serde_json::from_str(line).unwrap();
        assert_eq!(f.id.as_str(), "f1");
        assert_eq!(f.kind, FragmentKind::CodeClass);
        assert!(f.symbol.is_none());
        assert_eq!(f.extension().as_deref(), Some("py"));
    }

    #[test]
    fn test_provenance_merge() {
        assert_eq!(Provenance::Lexical.merge(Provenance::Semantic), Provenance::Both);
        assert_eq!(Provenance::Graph.merge(Provenance::Lexical), Provenance::Lexical);
        assert_eq!(Provenance::Semantic.merge(Provenance::Semantic), Provenance::Semantic);
        assert!(Provenance::Both.tie_rank() > Provenance::Semantic.tie_rank());
        assert!(Provenance::Semantic.tie_rank() > Provenance::Lexical.tie_rank());
    }
}
