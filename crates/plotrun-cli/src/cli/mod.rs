//! CLI command definitions for the `plotrun` binary.

pub mod run;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use plotrun_core::config::{apply_env_overrides, load_engine_config, read_engine_config};
use plotrun_types::config::EngineConfig;

/// Run declarative step plots with retries, breakers, and budgets.
#[derive(Parser)]
#[command(name = "plotrun", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug logs, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Engine config file (defaults to ./plotrun.toml when present).
    #[arg(long, global = true, env = "PLOTRUN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a plot.
    Run(run::RunArgs),

    /// Check a plot file without running it.
    Validate {
        /// Path to the plot JSON file.
        file: PathBuf,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

/// Explicit `--config` must load; otherwise fall back to `./plotrun.toml`.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => {
            let config = read_engine_config(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            tracing::debug!(path = %path.display(), "loaded engine config");
            config
        }
        None => load_engine_config(Path::new(".")),
    };
    apply_env_overrides(&mut config);
    tracing::debug!(
        trace_enabled = config.trace.enabled,
        default_max_duration_ms = ?config.default_max_duration_ms,
        metrics_window = config.metrics_window,
        "engine config ready"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_flags() {
        let cli = Cli::try_parse_from([
            "plotrun",
            "--json",
            "run",
            "plot.json",
            "--input",
            r#"{"a":1}"#,
            "--max-duration-ms",
            "500",
            "--max-cost",
            "1.5",
            "--trace",
        ])
        .unwrap();
        assert!(cli.json);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.file, PathBuf::from("plot.json"));
        assert_eq!(args.max_duration_ms, Some(500));
        assert_eq!(args.max_cost, Some(1.5));
        assert!(args.trace);
    }

    #[test]
    fn input_sources_conflict() {
        let res = Cli::try_parse_from([
            "plotrun", "run", "p.json", "--input", "{}", "--input-file", "in.json",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn explicit_config_must_exist() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = load_config(Some(&tmp.path().join("missing.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));

        let path = tmp.path().join("plotrun.toml");
        std::fs::write(&path, "metrics_window = 8\n").unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().metrics_window, 8);
    }
}
