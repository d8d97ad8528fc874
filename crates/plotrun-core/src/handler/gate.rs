//! `gate`: branch on a predicate or assert a condition.
//!
//! With `step.fork`, the condition picks `onTrue` or `onFalse` as the next
//! step. Without it, `inputs.path`/`inputs.op`/`inputs.value` form a single
//! condition that must hold for the step to succeed; `inputs.onTrue` may name
//! the successor.

use plotrun_types::plot::Step;
use serde_json::Value;

use super::{HandlerError, StepHandler, StepOutcome, string_input};
use crate::context::RunContext;
use crate::predicate::{CompareOp, Literal, PredicateCache};

#[derive(Default)]
pub struct GateHandler {
    predicates: PredicateCache,
}

impl GateHandler {
    fn check(&self, step: &Step) -> Result<(), String> {
        if let Some(fork) = &step.fork {
            return self
                .predicates
                .compile(&fork.condition)
                .map(|_| ())
                .map_err(|e| format!("fork.condition: {e}"));
        }
        condition(step).map(|_| ())
    }
}

/// The `path`/`op` pair, when `path` is set. `op` is then mandatory.
fn condition(step: &Step) -> Result<Option<(&str, CompareOp)>, String> {
    let Some(path) = string_input(step, "path") else {
        return Ok(None);
    };
    let op = string_input(step, "op").ok_or_else(|| "op: required".to_string())?;
    let op = op.parse::<CompareOp>().map_err(|e| format!("op: {e}"))?;
    Ok(Some((path, op)))
}

impl StepHandler for GateHandler {
    fn validate(&self, step: &Step) -> Result<(), String> {
        self.check(step)
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
        step: &Step,
    ) -> Result<StepOutcome, HandlerError> {
        if let Some(fork) = &step.fork {
            let predicate = self
                .predicates
                .compile(&fork.condition)
                .map_err(|e| HandlerError::bad_input(format!("fork.condition: {e}")))?;
            let taken = predicate.evaluate(ctx);
            let next_id = if taken {
                fork.on_true.clone()
            } else {
                fork.on_false.clone()
            };
            tracing::debug!(
                step_id = %step.label(),
                condition = %fork.condition,
                taken,
                "gate fork evaluated"
            );
            return Ok(StepOutcome {
                next_id,
                fork_used: true,
            });
        }

        let Some((path, op)) = condition(step).map_err(HandlerError::BadInput)? else {
            return Ok(StepOutcome::default());
        };
        let expected = step.input("value").unwrap_or(&Value::Null);

        if !op.apply(ctx.get(path), &Literal::from(expected)) {
            return Err(HandlerError::failed(format!(
                "gate condition failed: {path} {op} {expected}"
            )));
        }

        let next_id = step
            .input("onTrue")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(StepOutcome::next(next_id))
    }
}
