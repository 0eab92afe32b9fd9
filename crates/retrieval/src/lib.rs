//! Retrieval-and-routing engine for repository Q&A.
//!
//! Indexes pre-extracted fragments into a BM25 index, a semantic index and a
//! code dependency graph, fuses the two searches, scores the result and retries
//! with expanded queries when confidence is low.

pub mod config;
pub mod confidence;
pub mod controller;
pub mod embeddings;
pub mod engine;
pub mod eval;
pub mod fusion;
pub mod generation;
pub mod graph;
pub mod lexical;
pub mod persist;
pub mod router;
pub mod semantic;
pub mod session;
pub mod store;
pub mod text;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::RetrievalConfig;
pub use controller::RetrieveOptions;
pub use embeddings::{create_provider, EmbeddingConfig, EmbeddingFingerprint, EmbeddingProvider};
pub use engine::{BuildReport, Engine, IndexStats};
pub use eval::{evaluate, EvalReport, GoldenQuery, GoldenSet};
pub use generation::GenerationId;
pub use graph::{Direction, Edge, EdgeKind, Entity, EntityKind};
pub use router::{classify_intent, Domain, GroundingPolicy, RoutePlan};
pub use session::Conversation;
pub use types::{
    BuildDiagnostics, Fragment, FragmentId, FragmentKind, ParseFailure, Provenance, RankedHit,
    RankedResult, RetrievalStatus,
};
