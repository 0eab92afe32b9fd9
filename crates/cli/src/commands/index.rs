//! Index command handler.
//!
//! Ingests pre-extracted fragments (JSON Lines) and persists the new generation.

use clap::Args;
use scout_core::{config::AppConfig, AppError, AppResult};
use scout_retrieval::{BuildReport, Fragment};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use super::{build_engine, print_json};

/// Build or update the index from fragment records
#[derive(Args, Debug)]
pub struct IndexCommand {
    /// JSON Lines file with one fragment per line ("-" for stdin)
    pub input: Option<PathBuf>,

    /// Source files whose fragments should be dropped
    #[arg(long)]
    pub remove: Vec<String>,

    /// Start from an empty index instead of the persisted one
    #[arg(long)]
    pub reset: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl IndexCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing index command");
        tracing::debug!("Index options: {:?}", self);

        if self.input.is_none() && self.remove.is_empty() {
            return Err(AppError::Config(
                "Nothing to do: pass a fragment file and/or --remove".to_string(),
            ));
        }

        let engine = build_engine(config).await?;
        let index_path = config.index_path();
        if self.reset {
            engine.continue_numbering(&index_path)?;
        } else if index_path.exists() {
            engine.load(&index_path, None).await?;
        }

        let mut reports: Vec<BuildReport> = Vec::new();

        if let Some(input) = &self.input {
            let fragments = read_fragments(input)?;
            tracing::info!("Read {} fragments from {:?}", fragments.len(), input);
            reports.push(engine.build_index(fragments).await?);
        }

        if !self.remove.is_empty() {
            reports.push(engine.remove_files(&self.remove).await?);
        }

        let generation = engine.save(&index_path)?;

        if self.json {
            print_json(&reports)?;
        } else {
            for report in &reports {
                let d = &report.diagnostics;
                println!(
                    "Generation {}: {} fragments ({} embedded, {} reused, {} invalidated)",
                    report.generation,
                    report.fragments,
                    d.embedded_fragments,
                    d.reused_embeddings,
                    d.invalidated_fragments
                );
                for rejected in &d.rejected {
                    println!("  rejected {}: {}", rejected.fragment_id, rejected.reason);
                }
                for failure in &d.parse_failures {
                    println!(
                        "  parse failure {} ({}): {}",
                        failure.fragment_id, failure.source_path, failure.reason
                    );
                }
                if d.unsupported_code_fragments > 0 {
                    println!(
                        "  {} code fragments in unsupported languages",
                        d.unsupported_code_fragments
                    );
                }
                if d.unresolved_references > 0 {
                    println!("  {} unresolved references", d.unresolved_references);
                }
            }
            println!("Saved generation {} to {}", generation, index_path.display());
        }

        Ok(())
    }
}

fn read_fragments(input: &Path) -> AppResult<Vec<Fragment>> {
    let reader: Box<dyn BufRead> = if input.as_os_str() == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(input).map_err(|e| {
            AppError::Config(format!("Failed to open fragment file {:?}: {}", input, e))
        })?;
        Box::new(BufReader::new(file))
    };

    parse_fragments(reader)
}

fn parse_fragments(reader: impl BufRead) -> AppResult<Vec<Fragment>> {
    let mut fragments = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fragment: Fragment = serde_json::from_str(&line).map_err(|e| {
            AppError::Serialization(format!("Invalid fragment on line {}: {}", number + 1, e))
        })?;
        fragments.push(fragment);
    }
    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_retrieval::FragmentKind;

    #[test]
    fn test_parse_fragments() {
        let input = concat!(
            r#"{"id":"f1","source_path":"a.py","start_line":1,"end_line":2,"kind":"code-function","text":"def f():\n    pass","symbol":"f"}"#,
            "\n\n",
            r#"{"id":"d1","source_path":"README.md","start_line":1,"end_line":1,"kind":"prose-block","text":"Hello"}"#,
            "\n"
        );

        let fragments = parse_fragments(input.as_bytes()).unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].kind, FragmentKind::CodeFunction);
        assert_eq!(fragments[0].symbol.as_deref(), Some("f"));
        assert_eq!(fragments[1].symbol, None);
    }

    #[test]
    fn test_parse_fragments_reports_line() {
        let input = "{\"id\":\"f1\"}\n";
        let err = parse_fragments(input.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_read_fragments_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fragments.jsonl");
        std::fs::write(
            &path,
            r#"{"id":"d1","source_path":"README.md","start_line":1,"end_line":3,"kind":"prose-block","text":"Setup notes"}"#,
        )
        .unwrap();

        let fragments = read_fragments(&path).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].id.as_str(), "d1");

        let missing = read_fragments(&dir.path().join("missing.jsonl"));
        assert!(missing.is_err());
    }
}
