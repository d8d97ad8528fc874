//! `plotrun validate`: structural and input checks without running.

use std::path::Path;

use anyhow::{Context, Result, bail};
use console::style;

use plotrun_core::StepExecutor;
use plotrun_core::definition::{load_plot_file, plot_warnings};
use plotrun_types::plot::Plot;

/// Per-step input problems, as `(step id, BAD_INPUT detail)`.
fn input_errors(plot: &Plot, executor: &StepExecutor) -> Vec<(String, String)> {
    plot.steps
        .iter()
        .filter_map(|step| {
            executor
                .preflight(step)
                .err()
                .map(|detail| (step.label().to_string(), detail))
        })
        .collect()
}

pub fn validate_plot_file(file: &Path, json: bool) -> Result<()> {
    let plot = load_plot_file(file)
        .with_context(|| format!("Failed to load plot {}", file.display()))?;
    let executor = StepExecutor::with_builtins();
    let errors = input_errors(&plot, &executor);
    let warnings = plot_warnings(&plot);
    tracing::debug!(
        plot = plot.id.as_str(),
        errors = errors.len(),
        warnings = warnings.len(),
        "plot checked"
    );

    if json {
        let out = serde_json::json!({
            "plot": plot.id,
            "valid": errors.is_empty(),
            "steps": plot.steps.len(),
            "errors": errors
                .iter()
                .map(|(id, detail)| serde_json::json!({ "step": id, "reason": format!("BAD_INPUT:{detail}") }))
                .collect::<Vec<_>>(),
            "warnings": warnings.iter().map(ToString::to_string).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        for (id, detail) in &errors {
            println!("  {} step '{}': {}", style("x").red().bold(), style(id).cyan(), detail);
        }
        for warning in &warnings {
            println!("  {} {}", style("!").yellow().bold(), warning);
        }
        if errors.is_empty() {
            println!(
                "  {} Plot '{}' is valid ({} steps)",
                style("*").green().bold(),
                style(&plot.id).cyan(),
                plot.steps.len()
            );
        }
        println!();
    }

    if !errors.is_empty() {
        bail!("Plot '{}' has {} invalid step(s)", plot.id, errors.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotrun_core::definition::parse_plot_json;

    #[test]
    fn reports_bad_inputs_and_unknown_types() {
        let plot = parse_plot_json(
            r#"{ "steps": [
                { "id": "ok", "type": "transform", "inputs": { "assign": { "a": 1 } } },
                { "id": "calc", "type": "calc", "inputs": { "expr": "1 + 1" } },
                { "id": "x", "type": "teleport" }
            ] }"#,
        )
        .unwrap();
        let errors = input_errors(&plot, &StepExecutor::with_builtins());
        assert_eq!(
            errors,
            vec![
                ("calc".to_string(), "assignTo: required".to_string()),
                ("x".to_string(), "unknown step type: teleport".to_string()),
            ]
        );
    }

    #[test]
    fn valid_file_passes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("plot.json");
        std::fs::write(&path, r#"{ "id": "p", "steps": [{ "id": "a", "type": "http" }] }"#).unwrap();
        validate_plot_file(&path, true).unwrap();
    }
}
