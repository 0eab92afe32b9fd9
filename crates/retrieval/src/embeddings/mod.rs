//! Embedding providers for the semantic index.

pub mod config;
pub mod provider;
pub mod providers;

pub use config::{EmbeddingConfig, EmbeddingFingerprint};
pub use provider::{create_provider, EmbeddingProvider};
