//! Engine tuning: BM25, fusion, confidence and controller settings.
//!
//! Loaded from `.scout/retrieval.yaml`; every section and field is optional and
//! falls back to its default.

use scout_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub lexical: LexicalConfig,
    pub semantic: SemanticConfig,
    pub fusion: FusionConfig,
    pub confidence: ConfidenceConfig,
    pub controller: ControllerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalConfig {
    /// Term-frequency saturation
    pub k1: f32,
    /// Length normalization
    pub b: f32,
    pub drop_stop_words: bool,
    pub top_k: usize,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            drop_stop_words: false,
            top_k: 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    pub top_k: usize,
    /// Hits at or below this cosine similarity are dropped.
    pub min_similarity: f32,
    pub batch_size: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            top_k: 12,
            min_similarity: 0.0,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub lexical_weight: f32,
    pub semantic_weight: f32,
    /// Multiplier applied to a seed's score for its graph neighbours
    pub graph_discount: f32,
    /// How many top fused fragments seed graph expansion
    pub graph_seeds: usize,
    pub graph_neighbors_per_seed: usize,
    pub rerank: bool,
    pub rerank_top: usize,
    /// Final list size
    pub max_results: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            lexical_weight: 0.5,
            semantic_weight: 0.5,
            graph_discount: 0.8,
            graph_seeds: 3,
            graph_neighbors_per_seed: 4,
            rerank: false,
            rerank_top: 8,
            max_results: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    pub relevance_weight: f32,
    pub diversity_weight: f32,
    pub overlap_weight: f32,
    /// Distinct source files at which diversity saturates
    pub diversity_target: usize,
    /// Number of top hits whose text is checked for query terms
    pub overlap_window: usize,
    /// BM25 score mapped to 0.5 relevance
    pub lexical_saturation: f32,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            relevance_weight: 0.5,
            diversity_weight: 0.2,
            overlap_weight: 0.3,
            diversity_target: 3,
            overlap_window: 3,
            lexical_saturation: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Confidence at or above which the first pass is accepted
    pub threshold: f32,
    pub max_attempts: u32,
    /// Multiplier for K on each later pass
    pub k_growth: usize,
    /// Term -> expansions used to rewrite weak queries
    pub synonyms: BTreeMap<String, Vec<String>>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            max_attempts: 2,
            k_growth: 2,
            synonyms: default_synonyms(),
        }
    }
}

fn default_synonyms() -> BTreeMap<String, Vec<String>> {
    const TABLE: &[(&str, &[&str])] = &[
        ("arg", &["argument", "parameter"]),
        ("auth", &["authentication", "login"]),
        ("calc", &["calculate", "compute"]),
        ("cfg", &["config", "configuration", "settings"]),
        ("config", &["configuration", "settings"]),
        ("conn", &["connection"]),
        ("ctx", &["context"]),
        ("db", &["database"]),
        ("dir", &["directory"]),
        ("env", &["environment"]),
        ("err", &["error"]),
        ("fn", &["function"]),
        ("func", &["function"]),
        ("impl", &["implementation"]),
        ("init", &["initialize", "setup"]),
        ("msg", &["message"]),
        ("param", &["parameter", "argument"]),
        ("repo", &["repository"]),
        ("req", &["request"]),
        ("resp", &["response"]),
        ("util", &["utility", "helper"]),
    ];

    TABLE
        .iter()
        .map(|(term, expansions)| {
            (
                term.to_string(),
                expansions.iter().map(|e| e.to_string()).collect(),
            )
        })
        .collect()
}

impl RetrievalConfig {
    /// Reject settings that would make retrieval meaningless.
    pub fn validate(&self) -> AppResult<()> {
        let c = &self.confidence;
        let weights = [c.relevance_weight, c.diversity_weight, c.overlap_weight];
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err(AppError::Config(
                "Confidence weights must be finite and non-negative".to_string(),
            ));
        }
        if weights.iter().sum::<f32>() <= 0.0 {
            return Err(AppError::Config(
                "At least one confidence weight must be positive".to_string(),
            ));
        }

        let f = &self.fusion;
        if f.lexical_weight < 0.0 || f.semantic_weight < 0.0 {
            return Err(AppError::Config(
                "Fusion weights must be non-negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&f.graph_discount) {
            return Err(AppError::Config(format!(
                "Graph discount must be within [0, 1], got {}",
                f.graph_discount
            )));
        }

        if !(0.0..=1.0).contains(&self.controller.threshold) {
            return Err(AppError::Config(format!(
                "Confidence threshold must be within [0, 1], got {}",
                self.controller.threshold
            )));
        }
        if self.controller.max_attempts == 0 {
            return Err(AppError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if self.lexical.k1 < 0.0 || !(0.0..=1.0).contains(&self.lexical.b) {
            return Err(AppError::Config(format!(
                "Invalid BM25 parameters: k1={}, b={}",
                self.lexical.k1, self.lexical.b
            )));
        }

        if c.diversity_target == 0 || c.overlap_window == 0 || c.lexical_saturation <= 0.0 {
            return Err(AppError::Config(
                "diversity_target, overlap_window and lexical_saturation must be positive"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// Load engine configuration.
///
/// Reads `.scout/retrieval.yaml` if it exists, otherwise returns defaults.
pub fn load_config(workspace: &Path) -> AppResult<RetrievalConfig> {
    load_config_from(&get_config_path(workspace))
}

/// Load engine configuration from an explicit path.
pub fn load_config_from(config_path: &Path) -> AppResult<RetrievalConfig> {
    if !config_path.exists() {
        tracing::debug!(
            "Using default retrieval config (no config file at {:?})",
            config_path
        );
        return Ok(RetrievalConfig::default());
    }

    let content = fs::read_to_string(config_path).map_err(|e| {
        AppError::Config(format!("Failed to read config at {:?}: {}", config_path, e))
    })?;

    let config: RetrievalConfig = serde_yaml::from_str(&content).map_err(|e| {
        AppError::Config(format!("Failed to parse config at {:?}: {}", config_path, e))
    })?;

    config.validate()?;
    tracing::debug!("Loaded retrieval config from {:?}", config_path);
    Ok(config)
}

/// Save engine configuration.
pub fn save_config(workspace: &Path, config: &RetrievalConfig) -> AppResult<()> {
    let config_path = get_config_path(workspace);

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::Config(format!("Failed to create config directory: {}", e))
        })?;
    }

    let yaml = serde_yaml::to_string(config)?;
    fs::write(&config_path, yaml).map_err(|e| {
        AppError::Config(format!("Failed to write config to {:?}: {}", config_path, e))
    })?;

    tracing::debug!("Saved retrieval config to {:?}", config_path);
    Ok(())
}

/// Get the path to the engine config file.
pub fn get_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".scout").join("retrieval.yaml")
}
