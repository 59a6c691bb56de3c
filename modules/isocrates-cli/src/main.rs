//! Pipeline CLI (spec §6). `isocrates-cli pipeline --repo <url> [--crate
//! <prefix>]` drives one full run through `isocrates_orchestrator`, printing
//! progress to stdout and errors to stderr. Exit code 0 on success
//! (including a skipped or partially-failed run — operators inspect logs for
//! that), non-zero only on a fatal configuration error.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "isocrates-cli")]
#[command(about = "isocrates pipeline driver")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for one repository.
    Pipeline {
        /// Repository URL to clone/pull and document.
        #[arg(long)]
        repo: String,

        /// Crate-prefix override for generated document paths; defaults to
        /// the repository's own name.
        #[arg(long = "crate")]
        crate_prefix: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("isocrates=info".parse()?))
        .init();

    let cli = Cli::parse();
    let Commands::Pipeline { repo, crate_prefix } = cli.command;

    match isocrates_orchestrator::run_pipeline(&repo, crate_prefix.as_deref()).await {
        Ok(stats) => {
            println!("{stats}");
            Ok(())
        }
        Err(e) => {
            eprintln!("pipeline run failed: {e:#}");
            std::process::exit(1);
        }
    }
}
