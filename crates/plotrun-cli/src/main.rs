//! plotrun CLI entry point.
//!
//! Binary name: `plotrun`
//!
//! Parses arguments, sets up logging, loads the engine config, and dispatches
//! to the command handlers.

mod cli;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,plotrun_core=debug",
        _ => "trace",
    };
    if let Err(e) = plotrun_observe::tracing_setup::init_tracing(filter, cli.otel) {
        eprintln!("Warning: failed to initialize logging: {e}");
    }

    // Shell completions don't need config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "plotrun", &mut std::io::stdout());
        return Ok(());
    }

    let config = cli::load_config(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Run(args) => cli::run::run_plot(args, config, cli.json, cli.quiet).await,
        Commands::Validate { file } => cli::validate::validate_plot_file(&file, cli.json),
        Commands::Completions { .. } => unreachable!("handled above"),
    };

    plotrun_observe::tracing_setup::shutdown_tracing();
    result
}
