//! Stats command handler.
//!
//! Shows what the persisted index contains.

use clap::Args;
use scout_core::{config::AppConfig, AppResult};

use super::{open_engine, print_json};

/// Show index statistics
#[derive(Args, Debug)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing stats command");

        let engine = open_engine(config).await?;
        let Some(stats) = engine.stats() else {
            println!("No index loaded");
            return Ok(());
        };

        if self.json {
            return print_json(&stats);
        }

        println!("Generation: {} ({})", stats.generation, stats.created_at.to_rfc3339());
        println!("Fragments: {} in {} files", stats.fragments, stats.files);
        println!(
            "Lexical: {} terms, {:.1} terms per fragment",
            stats.terms, stats.average_fragment_length
        );
        println!("Vectors: {} ({})", stats.vectors, stats.embedding);
        for (kind, count) in &stats.entities {
            println!("Entities ({}): {}", kind, count);
        }
        for (kind, count) in &stats.edges {
            println!("Edges ({}): {}", kind, count);
        }
        println!("Unresolved references: {}", stats.unresolved_references);
        println!("Parse failures: {}", stats.parse_failures);

        Ok(())
    }
}
