//! Command handlers for the Scout CLI.
//!
//! Each command lives in its own submodule. The helpers here build an engine
//! from the application config and print JSON output.

pub mod ask;
pub mod classify;
pub mod eval;
pub mod graph;
pub mod index;
pub mod stats;

// Re-export command types for convenience
pub use ask::AskCommand;
pub use classify::ClassifyCommand;
pub use eval::EvalCommand;
pub use graph::GraphCommand;
pub use index::IndexCommand;
pub use stats::StatsCommand;

use scout_core::{config::AppConfig, AppError, AppResult};
use scout_retrieval::{config, create_provider, EmbeddingConfig, Engine};
use serde::Serialize;

/// Engine with the configured provider and tuning, and no generation loaded.
pub async fn build_engine(app_config: &AppConfig) -> AppResult<Engine> {
    app_config.validate()?;

    let embedding = EmbeddingConfig::from_app_config(app_config);
    let provider = create_provider(&embedding).await?;
    let retrieval = config::load_config_from(&app_config.retrieval_config_path())?;

    Engine::new(retrieval, provider)
}

/// Engine with the persisted index loaded.
pub async fn open_engine(app_config: &AppConfig) -> AppResult<Engine> {
    let engine = build_engine(app_config).await?;
    let generation = engine.load(&app_config.index_path(), None).await?;
    tracing::debug!("Loaded index generation {}", generation);
    Ok(engine)
}

pub fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    let output = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Serialization(format!("JSON serialization failed: {}", e)))?;
    println!("{}", output);
    Ok(())
}
