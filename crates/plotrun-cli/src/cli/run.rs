//! `plotrun run`: execute a plot and report the record.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;

use plotrun_core::definition::load_plot_file;
use plotrun_core::{PlotRunner, RunOptions, RunOutput, StepExecutor};
use plotrun_types::config::EngineConfig;
use plotrun_types::event::RunEvent;
use plotrun_types::record::{StepRecord, StepStatus};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the plot JSON file.
    pub file: PathBuf,

    /// Initial context as inline JSON.
    #[arg(long, conflicts_with = "input_file")]
    pub input: Option<String>,

    /// Initial context read from a JSON file.
    #[arg(long)]
    pub input_file: Option<PathBuf>,

    /// Run deadline in milliseconds.
    #[arg(long)]
    pub max_duration_ms: Option<u64>,

    /// Cumulative cost ceiling.
    #[arg(long)]
    pub max_cost: Option<f64>,

    /// Trace id for the run (defaults to a fresh UUID).
    #[arg(long)]
    pub trace_id: Option<String>,

    /// Append lifecycle events to a JSONL trace file.
    #[arg(long)]
    pub trace: bool,
}

pub async fn run_plot(args: RunArgs, mut config: EngineConfig, json: bool, quiet: bool) -> Result<()> {
    let plot = load_plot_file(&args.file)
        .with_context(|| format!("Failed to load plot {}", args.file.display()))?;
    let input = read_input(args.input.as_deref(), args.input_file.as_deref())?;

    if args.trace {
        config.trace.enabled = true;
    }
    let runner = PlotRunner::from_config(Arc::new(StepExecutor::with_builtins()), &config);

    let mut options = RunOptions::new(input);
    options.trace_id = args.trace_id;
    options.max_duration_ms = args.max_duration_ms;
    options.max_cost = args.max_cost;
    if !json && !quiet {
        options = options.with_observer(print_event);
    }

    tracing::info!(
        plot = plot.id.as_str(),
        file = %args.file.display(),
        steps = plot.steps.len(),
        "running plot"
    );
    let output = runner.run(&plot, options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if !quiet {
        print_summary(&output, &runner);
    }

    if let Some(failed) = output.record.failures().next() {
        let reason = failed
            .reason
            .as_ref()
            .map_or_else(|| "error".to_string(), ToString::to_string);
        bail!("Plot '{}' failed at step '{}': {}", plot.id, failed.id, reason);
    }
    Ok(())
}

/// Initial context from `--input` or `--input-file`; `{}` when neither is set.
fn read_input(inline: Option<&str>, file: Option<&Path>) -> Result<Value> {
    let value = match (inline, file) {
        (Some(raw), _) => serde_json::from_str(raw).context("Invalid JSON in --input")?,
        (None, Some(path)) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read input file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?
        }
        (None, None) => Value::Object(Default::default()),
    };
    if !value.is_object() {
        bail!("Run input must be a JSON object");
    }
    Ok(value)
}

fn print_event(event: &RunEvent) {
    match event {
        RunEvent::Retry {
            id,
            attempt,
            cause,
            delay_ms,
        } => eprintln!(
            "  {} {} attempt {} failed ({}), retrying in {}ms",
            style("~").yellow(),
            style(id).cyan(),
            attempt,
            cause,
            delay_ms
        ),
        RunEvent::Fork { from, next_id } => eprintln!(
            "  {} {} -> {}",
            style(">").magenta(),
            style(from).cyan(),
            next_id.as_deref().unwrap_or("(end)")
        ),
        _ => {}
    }
}

fn print_summary(output: &RunOutput, runner: &PlotRunner) {
    let record = &output.record;
    let stats = &output.stats;

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Duration"),
            Cell::new("Reason"),
        ]);
    for step in &record.steps {
        table.add_row(vec![
            Cell::new(&step.id),
            Cell::new(&step.step_type),
            format_status(step),
            Cell::new(step.attempts),
            Cell::new(format!("{}ms", step.duration_ms)),
            Cell::new(step.reason.as_ref().map(ToString::to_string).unwrap_or_default()),
        ]);
    }

    let marker = if output.succeeded() {
        style("*").green().bold()
    } else {
        style("x").red().bold()
    };
    println!();
    println!(
        "  {} Plot '{}' ({} steps, {}ms)",
        marker,
        style(&record.plot_id).cyan(),
        stats.steps,
        stats.total_ms
    );
    println!("  Trace: {}", style(&record.trace_id).dim());
    println!();
    println!("{table}");
    println!();
    println!(
        "  ok {}  failed {}  retries {}  cost {:.2}",
        style(stats.ok).green(),
        style(stats.failed).red(),
        stats.retries,
        stats.cost
    );
    let metrics = runner.metrics_snapshot();
    println!(
        "  {}",
        style(format!(
            "step durations: mean {:.1}ms  p50 {}ms  p95 {}ms  max {}ms",
            metrics.mean_ms, metrics.p50_ms, metrics.p95_ms, metrics.max_ms
        ))
        .dim()
    );
    if let Some(trace) = runner.trace_writer() {
        println!("  Trace file: {}", style(trace.path().display()).dim());
    }
    println!();
}

fn format_status(step: &StepRecord) -> Cell {
    match step.status {
        StepStatus::Ok => Cell::new("ok").fg(Color::Green),
        StepStatus::Fail => Cell::new("fail").fg(Color::Red),
    }
}
