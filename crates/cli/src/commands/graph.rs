//! Graph command handler.

use clap::Args;
use scout_core::{config::AppConfig, AppResult};
use scout_retrieval::Direction;

use super::{open_engine, print_json};

/// List the callers or callees of a code entity
#[derive(Args, Debug)]
pub struct GraphCommand {
    /// Entity name (short or qualified)
    pub entity: String,

    /// Show callers instead of callees
    #[arg(long, conflicts_with = "callees")]
    pub callers: bool,

    /// Show callees (default)
    #[arg(long)]
    pub callees: bool,

    /// Number of hops to follow
    #[arg(short, long, default_value = "1")]
    pub depth: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl GraphCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing graph command for '{}'", self.entity);

        let direction = if self.callers {
            Direction::Callers
        } else {
            Direction::Callees
        };

        let engine = open_engine(config).await?;
        let entities = engine.graph_neighbors(&self.entity, direction, self.depth);

        if self.json {
            print_json(&entities)?;
            return Ok(());
        }

        let label = match direction {
            Direction::Callers => "Callers",
            Direction::Callees => "Callees",
        };
        if entities.is_empty() {
            println!("{} of '{}': none", label, self.entity);
        } else {
            println!("{} of '{}':", label, self.entity);
            for entity in &entities {
                println!(
                    "- {} [{}] ({})",
                    entity.qualified_name,
                    entity.kind.as_str(),
                    entity.fragment_id
                );
            }
        }

        Ok(())
    }
}
