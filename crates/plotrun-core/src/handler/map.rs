//! `map`: translate a context value through a lookup table.
//!
//! The value at `fromPath` is stringified and looked up in `inputs.mapping`;
//! a miss falls back to `inputs.default` (null when absent). The result goes
//! to `assignTo`, or back to `fromPath`.

use plotrun_types::plot::Step;
use serde_json::Value;

use super::{HandlerError, StepHandler, StepOutcome, string_input};
use crate::context::RunContext;

pub struct MapHandler;

fn check_inputs(step: &Step) -> Result<(), String> {
    if string_input(step, "fromPath").is_none() {
        return Err("fromPath: required".to_string());
    }
    match step.input("mapping") {
        Some(Value::Object(_)) => {}
        None => return Err("mapping: required".to_string()),
        Some(_) => return Err("mapping: must be an object".to_string()),
    }
    match step.input("assignTo") {
        None | Some(Value::String(_)) => Ok(()),
        Some(_) => Err("assignTo: must be a string".to_string()),
    }
}

/// Key used to index the mapping table.
fn lookup_key(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Number(n)) => number_key(n),
        Some(other) => other.to_string(),
    }
}

/// Integral floats render without a fraction, so a computed `5.0` finds `"5"`.
fn number_key(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        _ => n.to_string(),
    }
}

impl StepHandler for MapHandler {
    fn validate(&self, step: &Step) -> Result<(), String> {
        check_inputs(step)
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
        step: &Step,
    ) -> Result<StepOutcome, HandlerError> {
        check_inputs(step).map_err(HandlerError::BadInput)?;
        let from_path = string_input(step, "fromPath").unwrap_or_default();
        let mapping = step.input("mapping").and_then(Value::as_object);

        let key = lookup_key(ctx.get(from_path));
        let mapped = mapping
            .and_then(|m| m.get(&key))
            .or_else(|| step.input("default"))
            .cloned()
            .unwrap_or(Value::Null);

        let to_path = string_input(step, "assignTo").unwrap_or(from_path);
        ctx.set(to_path, mapped);
        Ok(StepOutcome::default())
    }
}
