//! Plot document parsing, validation, and file loading.
//!
//! Plots are JSON documents with camelCase keys. Structural problems (no
//! steps, empty or duplicate ids) are errors; dangling `next`/`fork` targets
//! are only warnings because the runner ends the run at an unknown successor.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use plotrun_types::plot::{Plot, StepNext};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that make a plot unusable.
#[derive(Debug, Error)]
pub enum PlotError {
    /// The plot file could not be read.
    #[error("failed to read plot file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON parse failure.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("plot must have at least one step")]
    NoSteps,

    #[error("step at index {0} has an empty id")]
    EmptyStepId(usize),

    #[error("duplicate step id: '{0}'")]
    DuplicateStepId(String),
}

// ---------------------------------------------------------------------------
// Parsing and loading
// ---------------------------------------------------------------------------

/// Parse a JSON string into a validated `Plot`.
pub fn parse_plot_json(json: &str) -> Result<Plot, PlotError> {
    let plot: Plot = serde_json::from_str(json)?;
    validate_plot(&plot)?;
    Ok(plot)
}

/// Load and validate a plot from a JSON file.
pub fn load_plot_file(path: &Path) -> Result<Plot, PlotError> {
    let content = std::fs::read_to_string(path).map_err(|source| PlotError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_plot_json(&content)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check the structural constraints the runner relies on:
///
/// - at least one step
/// - every top-level step has a non-empty id
/// - step ids are unique
pub fn validate_plot(plot: &Plot) -> Result<(), PlotError> {
    if plot.steps.is_empty() {
        return Err(PlotError::NoSteps);
    }

    let mut seen = HashSet::new();
    for (index, step) in plot.steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            return Err(PlotError::EmptyStepId(index));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(PlotError::DuplicateStepId(step.id.clone()));
        }
    }
    Ok(())
}

/// A non-fatal problem found in a plot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotWarning {
    pub step_id: String,
    pub message: String,
}

impl fmt::Display for PlotWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step '{}': {}", self.step_id, self.message)
    }
}

/// Successor references that point at no declared step.
pub fn plot_warnings(plot: &Plot) -> Vec<PlotWarning> {
    let ids: HashSet<&str> = plot.steps.iter().map(|s| s.id.as_str()).collect();
    let mut warnings = Vec::new();
    let mut check = |step_id: &str, field: &str, target: &str| {
        if !ids.contains(target) {
            warnings.push(PlotWarning {
                step_id: step_id.to_string(),
                message: format!("{field} references unknown step '{target}'"),
            });
        }
    };

    for step in &plot.steps {
        match &step.next {
            Some(StepNext::One(target)) => check(&step.id, "next", target),
            Some(StepNext::Many(targets)) => {
                if let Some(first) = targets.first() {
                    check(&step.id, "next", first);
                }
            }
            None => {}
        }
        if let Some(fork) = &step.fork {
            if let Some(target) = &fork.on_true {
                check(&step.id, "fork.onTrue", target);
            }
            if let Some(target) = &fork.on_false {
                check(&step.id, "fork.onFalse", target);
            }
        }
        if let Some(target) = step.input("onTrue").and_then(|v| v.as_str()) {
            check(&step.id, "inputs.onTrue", target);
        }
    }
    warnings
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
