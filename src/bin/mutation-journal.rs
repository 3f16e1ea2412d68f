use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use mutation_harness::journal::replay_journal;
use mutation_harness::report::{ReportFormat, SuiteSummary, render_journal};

#[derive(Debug, Parser)]
#[command(name = "mutation-journal")]
#[command(about = "Inspect mutation evaluation journals")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the state of a journal.
    Status {
        /// JSONL journal path.
        journal: PathBuf,
    },
    /// Render a report for a journal.
    Report {
        /// JSONL journal path.
        journal: PathBuf,
        /// Output format.
        #[arg(long, value_enum, default_value = "md")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Markdown
    Md,
    /// JSON
    Json,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Status { journal } => {
            let snapshot = replay_journal(&journal)
                .with_context(|| format!("failed to replay {}", journal.display()))?;
            if snapshot.malformed_lines > 0 {
                warn!(lines = snapshot.malformed_lines, "skipped malformed journal lines");
            }
            let summary = SuiteSummary::from_snapshot(&snapshot);
            println!("code unit: {}", summary.code_unit);
            println!("runs: {}", snapshot.runs.len());
            let incomplete = snapshot.incomplete_runs();
            if !incomplete.is_empty() {
                println!("incomplete runs: {}", incomplete.join(", "));
            }
            println!("verdict: {}", summary.verdict);
            match summary.kill_rate {
                Some(rate) => println!(
                    "summary: killed={}, survived={}, timeouts={}, kill_rate={rate:.2}%",
                    summary.killed, summary.survived, summary.killed_by_timeout
                ),
                None => println!(
                    "summary: killed={}, survived={}, timeouts={}, kill_rate=n/a",
                    summary.killed, summary.survived, summary.killed_by_timeout
                ),
            }
            for survivor in snapshot.survivors() {
                println!("survived: {survivor}");
            }
        }
        Command::Report { journal, format } => {
            let format = match format {
                OutputFormat::Md => ReportFormat::Markdown,
                OutputFormat::Json => ReportFormat::Json,
            };
            let snapshot = replay_journal(&journal)
                .with_context(|| format!("failed to replay {}", journal.display()))?;
            println!("{}", render_journal(&snapshot, format)?);
        }
    }

    Ok(())
}
