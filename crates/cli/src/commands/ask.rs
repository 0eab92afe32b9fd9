//! Ask command handler.
//!
//! Retrieves and ranks fragments for a question. Answer text is left to the
//! downstream generator; this prints the grounding material.

use clap::Args;
use scout_core::{config::AppConfig, AppResult};
use scout_retrieval::{RankedResult, RetrieveOptions, RetrievalStatus};
use std::time::Duration;

use super::{open_engine, print_json};

/// Retrieve the fragments that answer a question
#[derive(Args, Debug)]
pub struct AskCommand {
    /// Question text
    pub query: String,

    /// Number of fragments to return (0 = configured maximum)
    #[arg(short = 'k', long, default_value = "5")]
    pub top_k: usize,

    /// Give up on passes that have not finished after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Do not expand through the dependency graph on later passes
    #[arg(long)]
    pub no_graph: bool,

    /// Print fragment text
    #[arg(long)]
    pub show_text: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ask command");

        let engine = open_engine(config).await?;
        let options = RetrieveOptions {
            deadline: self
                .timeout_ms
                .map(|ms| tokio::time::Instant::now() + Duration::from_millis(ms)),
            cancel: None,
            graph_expansion: self.no_graph.then_some(false),
        };

        let result = engine.retrieve(&self.query, self.top_k, options).await?;

        tracing::debug!(
            "Retrieved {} fragments: confidence={:.3}, attempts={}, status={:?}",
            result.hits.len(),
            result.confidence,
            result.attempts,
            result.status
        );

        if self.json {
            print_json(&result)?;
        } else {
            self.print_result(&result, engine.config().controller.threshold);
        }

        Ok(())
    }

    fn print_result(&self, result: &RankedResult, threshold: f32) {
        println!(
            "Domain: {} ({})",
            result.domain, result.grounding
        );
        println!(
            "Confidence: {:.2}{} after {} attempt(s)",
            result.confidence,
            if result.is_low_confidence(threshold) {
                " (low)"
            } else {
                ""
            },
            result.attempts
        );
        if result.effective_query != result.query {
            println!("Expanded query: {}", result.effective_query);
        }
        match result.status {
            RetrievalStatus::Complete => {}
            RetrievalStatus::Truncated => println!("Note: retrieval hit the time limit"),
            RetrievalStatus::Cancelled => println!("Note: retrieval was cancelled"),
            RetrievalStatus::IndexUnavailable => println!("Note: no index available"),
        }
        println!();

        if result.hits.is_empty() {
            println!("Sources: (no relevant fragments)");
            return;
        }

        println!("Sources:");
        for (rank, hit) in result.hits.iter().enumerate() {
            let fragment = &hit.fragment;
            println!(
                "{}. {}:{}-{} [{}] {:.3} ({})",
                rank + 1,
                fragment.source_path,
                fragment.start_line,
                fragment.end_line,
                fragment.symbol.as_deref().unwrap_or(fragment.kind.as_str()),
                hit.score,
                hit.provenance.as_str()
            );
            if self.show_text {
                for line in fragment.text.lines() {
                    println!("    {}", line);
                }
            }
        }
    }
}
