//! Command-line front end for the CRUD submission grader.
//!
//! `grader evaluate <dir>` prints the JSON report on stdout; diagnostics go to
//! stderr (see `RUST_LOG`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use grader::config::{GraderConfig, load_config, write_config};
use grader::exit_codes;
use grader::manifest::Manifest;
use grader::report::Report;

#[derive(Parser)]
#[command(
    name = "grader",
    version,
    about = "Staged evaluation of CRUD data-access submissions"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every applicable check and print the JSON report.
    Evaluate {
        /// Submission root containing README.json.
        dir: PathBuf,
        /// Grader config (TOML); defaults apply when omitted or missing.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Pretty-print the report.
        #[arg(long)]
        pretty: bool,
    },
    /// Validate README.json and print the parsed manifest.
    Manifest {
        /// Submission root containing README.json.
        dir: PathBuf,
    },
    /// Print the effective config as TOML, optionally writing it to a file.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write the effective config to this path.
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

fn main() {
    grader::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Evaluate {
            dir,
            config,
            pretty,
        } => cmd_evaluate(&dir, config.as_deref(), pretty),
        Command::Manifest { dir } => cmd_manifest(&dir),
        Command::Config { config, write } => cmd_config(config.as_deref(), write.as_deref()),
    }
}

fn cmd_evaluate(dir: &Path, config: Option<&Path>, pretty: bool) -> Result<i32> {
    let cfg = resolve_config(config)?;
    if !dir.is_dir() {
        bail!("submission directory not found: {}", dir.display());
    }
    let report = grader::evaluate(dir, &cfg);
    let rendered = if pretty {
        serde_json::to_string_pretty(&report)
    } else {
        serde_json::to_string(&report)
    }
    .context("serialize report")?;
    println!("{rendered}");
    Ok(match report {
        Report::Error { .. } => exit_codes::MANIFEST_ERROR,
        Report::Scored { .. } => exit_codes::OK,
    })
}

fn cmd_manifest(dir: &Path) -> Result<i32> {
    match Manifest::load(dir) {
        Ok(manifest) => {
            let rendered =
                serde_json::to_string_pretty(&manifest).context("serialize manifest")?;
            println!("{rendered}");
            Ok(exit_codes::OK)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(exit_codes::MANIFEST_ERROR)
        }
    }
}

fn cmd_config(config: Option<&Path>, write: Option<&Path>) -> Result<i32> {
    let cfg = resolve_config(config)?;
    if let Some(path) = write {
        write_config(path, &cfg)?;
    }
    print!("{}", toml::to_string_pretty(&cfg).context("serialize config toml")?);
    Ok(exit_codes::OK)
}

fn resolve_config(path: Option<&Path>) -> Result<GraderConfig> {
    match path {
        Some(path) => load_config(path),
        None => Ok(GraderConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_evaluate_with_flags() {
        let cli = Cli::parse_from([
            "grader",
            "evaluate",
            "sub",
            "--config",
            "grader.toml",
            "--pretty",
        ]);
        match cli.command {
            Command::Evaluate {
                dir,
                config,
                pretty,
            } => {
                assert_eq!(dir, PathBuf::from("sub"));
                assert_eq!(config, Some(PathBuf::from("grader.toml")));
                assert!(pretty);
            }
            _ => panic!("expected evaluate"),
        }
    }

    #[test]
    fn parse_manifest() {
        let cli = Cli::parse_from(["grader", "manifest", "sub"]);
        assert!(matches!(cli.command, Command::Manifest { .. }));
    }

    #[test]
    fn missing_config_path_uses_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = resolve_config(Some(temp.path().join("absent.toml").as_path())).expect("config");
        assert_eq!(cfg, GraderConfig::default());
    }
}
