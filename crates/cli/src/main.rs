//! Scout CLI
//!
//! Main entry point for the scout command-line tool.
//! Indexes pre-extracted repository fragments and retrieves grounding
//! material for questions about the code.

mod commands;

use clap::{Parser, Subcommand};
use commands::{
    AskCommand, ClassifyCommand, EvalCommand, GraphCommand, IndexCommand, StatsCommand,
};
use scout_core::{config::AppConfig, logging, AppResult};
use std::path::PathBuf;

/// Scout - retrieval and routing for repository Q&A
#[derive(Parser, Debug)]
#[command(name = "scout")]
#[command(about = "Retrieval and routing for repository Q&A", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "SCOUT_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "SCOUT_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Embedding provider (trigram, ollama)
    #[arg(long, global = true, env = "SCOUT_EMBEDDING_PROVIDER")]
    embedding_provider: Option<String>,

    /// Embedding model identifier
    #[arg(long, global = true, env = "SCOUT_EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build or update the index from fragment records
    Index(IndexCommand),

    /// Retrieve the fragments that answer a question
    Ask(AskCommand),

    /// List the callers or callees of a code entity
    Graph(GraphCommand),

    /// Show the domain and grounding policy chosen for a query
    Classify(ClassifyCommand),

    /// Show index statistics
    Stats(StatsCommand),

    /// Evaluate retrieval against a golden set
    Eval(EvalCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    // Load base configuration from environment and config file
    let config = AppConfig::load()?;

    // Apply CLI overrides
    let config = config.with_overrides(
        cli.workspace,
        cli.config,
        cli.embedding_provider,
        cli.embedding_model,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );

    // Initialize logging with final configuration
    logging::init_logging(config.log_level.as_deref(), config.no_color)?;

    tracing::info!("Scout CLI starting");
    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!(
        "Embedding: {} / {} ({} dims)",
        config.embedding_provider,
        config.embedding_model,
        config.embedding_dimensions
    );

    // Ensure .scout directory exists
    config.ensure_scout_dir()?;

    let command_name = match &cli.command {
        Commands::Index(_) => "index",
        Commands::Ask(_) => "ask",
        Commands::Graph(_) => "graph",
        Commands::Classify(_) => "classify",
        Commands::Stats(_) => "stats",
        Commands::Eval(_) => "eval",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    // Route to command handlers
    let result = match cli.command {
        Commands::Index(cmd) => cmd.execute(&config).await,
        Commands::Ask(cmd) => cmd.execute(&config).await,
        Commands::Graph(cmd) => cmd.execute(&config).await,
        Commands::Classify(cmd) => cmd.execute().await,
        Commands::Stats(cmd) => cmd.execute(&config).await,
        Commands::Eval(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
