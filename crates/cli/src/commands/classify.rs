//! Classify command handler.

use clap::Args;
use scout_core::AppResult;
use scout_retrieval::router;

use super::print_json;

/// Show the domain and grounding policy chosen for a query
#[derive(Args, Debug)]
pub struct ClassifyCommand {
    /// Query text
    pub query: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl ClassifyCommand {
    pub async fn execute(&self) -> AppResult<()> {
        tracing::info!("Executing classify command");

        let plan = router::route(&self.query);

        if self.json {
            print_json(&plan)?;
        } else {
            println!("Domain: {}", plan.domain);
            println!("Grounding: {}", plan.grounding);
            println!(
                "Graph expansion: {}",
                if plan.graph_expansion { "yes" } else { "no" }
            );
        }

        Ok(())
    }
}
