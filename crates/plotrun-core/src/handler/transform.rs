//! `transform`: write literal values into the context.
//!
//! `inputs.assign` maps dot-path keys to values:
//!
//! ```json
//! { "type": "transform", "inputs": { "assign": { "greeting": "Hello", "user.lang": "en" } } }
//! ```

use plotrun_types::plot::Step;

use super::{HandlerError, StepHandler, StepOutcome};
use crate::context::RunContext;

pub struct TransformHandler;

fn check_assign(step: &Step) -> Result<(), String> {
    match step.input("assign") {
        None => Ok(()),
        Some(v) if v.is_object() => Ok(()),
        Some(_) => Err("assign: must be an object".to_string()),
    }
}

impl StepHandler for TransformHandler {
    fn validate(&self, step: &Step) -> Result<(), String> {
        check_assign(step)
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
        step: &Step,
    ) -> Result<StepOutcome, HandlerError> {
        check_assign(step).map_err(HandlerError::BadInput)?;
        if let Some(assign) = step.input("assign").and_then(|v| v.as_object()) {
            for (path, value) in assign {
                ctx.set(path, value.clone());
            }
        }
        Ok(StepOutcome::default())
    }
}
