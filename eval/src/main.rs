mod cli;
mod outcome;
mod report;
mod results;
mod run;
mod submission;
mod workspace;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "eval", version, about = "Evaluation harness for the CRUD grader")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List submissions under eval/submissions.
    List,
    /// Grade a submission and record the results.
    Run {
        name: String,
        #[arg(long, default_value_t = 1)]
        runs: u32,
        /// Grader config (TOML); defaults to eval/grader.toml.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Summarize recorded runs.
    Report { name: String },
    /// Remove workspaces and results.
    Clean { name: String },
}

/// Harness progress at `info`, grader internals at `warn`, unless `RUST_LOG` says otherwise.
const LOG_DIRECTIVES: &str = "eval=info,grader=warn";

fn main() -> Result<()> {
    grader::logging::init_with_default(LOG_DIRECTIVES);
    let cli = Cli::parse();
    let repo_root = std::env::current_dir()?;
    match cli.command {
        Command::List => cli::list_submissions(&repo_root),
        Command::Run { name, runs, config } => {
            cli::run_submission_by_name(&repo_root, &name, runs, config.as_deref())
        }
        Command::Report { name } => cli::report_submission(&repo_root, &name),
        Command::Clean { name } => cli::clean_submission(&repo_root, &name),
    }
}
