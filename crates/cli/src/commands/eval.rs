//! Eval command handler.
//!
//! Runs a golden set against the persisted index and reports retrieval metrics.

use clap::Args;
use scout_core::{config::AppConfig, AppResult};
use scout_retrieval::{evaluate, GoldenSet};
use std::path::PathBuf;

use super::{open_engine, print_json};

/// Evaluate retrieval against a golden set
#[derive(Args, Debug)]
pub struct EvalCommand {
    /// Golden set JSON file
    pub golden: PathBuf,

    /// Cut-off for recall and precision
    #[arg(short = 'k', long, default_value = "5")]
    pub top_k: usize,

    /// Only evaluate queries of this category
    #[arg(long)]
    pub category: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl EvalCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing eval command with {:?}", self.golden);

        let mut set = GoldenSet::from_json(&self.golden)?;
        if let Some(category) = &self.category {
            set = set.filter_by_category(category);
        }

        let engine = open_engine(config).await?;
        let report = evaluate(&engine, &set, self.top_k).await?;

        if self.json {
            return print_json(&report);
        }

        for query in &report.queries {
            println!(
                "[{}] recall={:.2} precision={:.2} rr={:.2} confidence={:.2}  {}",
                query.category,
                query.recall,
                query.precision,
                query.reciprocal_rank,
                query.confidence,
                query.query
            );
        }
        println!();
        println!("Queries: {}", report.queries.len());
        println!("Recall@{}: {:.3}", report.k, report.recall_at_k);
        println!("Context precision: {:.3}", report.context_precision);
        println!("MRR: {:.3}", report.mrr);
        println!("Mean confidence: {:.3}", report.mean_confidence);

        Ok(())
    }
}
