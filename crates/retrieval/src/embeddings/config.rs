//! Embedding configuration and index fingerprints.

use scout_core::{AppConfig, AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Settings used to construct an embedding provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider name: "trigram" or "ollama"
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Embedding vector dimensions
    pub dimensions: usize,

    /// Provider-specific settings (e.g. `{"endpoint": "http://..."}` for ollama)
    #[serde(default)]
    pub provider_config: serde_json::Value,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "trigram".to_string(),
            model: "trigram-v1".to_string(),
            dimensions: 384,
            provider_config: serde_json::json!({}),
        }
    }
}

impl EmbeddingConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            provider: config.embedding_provider.clone(),
            model: config.embedding_model.clone(),
            dimensions: config.embedding_dimensions,
            provider_config: serde_json::json!({}),
        }
    }

    /// Optional string setting from `provider_config`.
    pub fn provider_setting(&self, key: &str) -> Option<&str> {
        self.provider_config.get(key).and_then(|v| v.as_str())
    }
}

/// Identity of the embedding method an index was built with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingFingerprint {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
}

impl EmbeddingFingerprint {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            dimensions,
        }
    }

    /// Fail with `ConfigMismatch` unless `other` is the same embedding method.
    pub fn ensure_matches(&self, other: &Self) -> AppResult<()> {
        if self.provider != other.provider {
            return Err(AppError::ConfigMismatch(format!(
                "Provider mismatch: index built with '{}', got '{}'",
                self.provider, other.provider
            )));
        }

        if self.model != other.model {
            return Err(AppError::ConfigMismatch(format!(
                "Model mismatch: index built with '{}', got '{}'",
                self.model, other.model
            )));
        }

        if self.dimensions != other.dimensions {
            return Err(AppError::ConfigMismatch(format!(
                "Dimension mismatch: index built with {}, got {}",
                self.dimensions, other.dimensions
            )));
        }

        Ok(())
    }
}

impl std::fmt::Display for EmbeddingFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({}d)", self.provider, self.model, self.dimensions)
    }
}
