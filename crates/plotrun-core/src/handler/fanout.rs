//! `fanout`: run a sub-sequence of steps once per collection item.
//!
//! ```json
//! {
//!   "id": "each-user", "type": "fanout",
//!   "inputs": {
//!     "fromPath": "users", "itemPath": "user", "concurrency": 4, "stopOnFirstError": true,
//!     "steps": [ { "type": "calc", "inputs": { "expr": "user.age + 1", "assignTo": "next" } } ]
//!   }
//! }
//! ```
//!
//! Each item gets its own clone of the parent context with the item bound at
//! `itemPath`. Sub-steps run sequentially through the shared `StepExecutor`,
//! so they see the same breakers, limiters, deadline, and trace id as the
//! parent run. Items run on a `JoinSet` bounded by a semaphore of width
//! `concurrency`. Item contexts are discarded afterwards.
//!
//! With `stopOnFirstError` (the default) the first failed item stops the
//! dispatch of further items; items already running finish on their own and
//! the step fails with `fanout-failed`. Dropping the handler future (for
//! example when the run deadline fires) aborts every spawned item.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use plotrun_types::plot::Step;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::{HandlerError, StepHandler, StepOutcome, string_input};
use crate::context::{RunContext, RunScope};
use crate::time::now_ms;

const DEFAULT_ITEM_PATH: &str = "item";

pub struct FanoutHandler;

/// Parsed fan-out inputs.
#[derive(Debug, Clone)]
struct FanoutPlan {
    from_path: String,
    item_path: String,
    concurrency: usize,
    stop_on_first_error: bool,
    steps: Vec<Step>,
}

impl FanoutPlan {
    fn from_step(step: &Step) -> Result<Self, String> {
        let from_path = string_input(step, "fromPath")
            .ok_or_else(|| "fromPath: required".to_string())?
            .to_string();
        let item_path = string_input(step, "itemPath")
            .unwrap_or(DEFAULT_ITEM_PATH)
            .to_string();
        let concurrency = step
            .input("concurrency")
            .and_then(Value::as_f64)
            .filter(|n| n.is_finite() && *n >= 1.0)
            .map_or(1, |n| n as usize);
        let stop_on_first_error = match step.input("stopOnFirstError") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err("stopOnFirstError: must be a boolean".to_string()),
        };
        let steps = match step.input("steps") {
            None => Vec::new(),
            Some(v) => serde_json::from_value::<Vec<Step>>(v.clone())
                .map_err(|e| format!("steps: {e}"))?,
        };
        Ok(Self {
            from_path,
            item_path,
            concurrency,
            stop_on_first_error,
            steps,
        })
    }
}

/// How one item ended.
#[derive(Debug)]
struct ItemFailure {
    index: usize,
    reason: String,
}

async fn run_item(
    scope: RunScope,
    mut ctx: RunContext,
    steps: Arc<Vec<Step>>,
    index: usize,
) -> Result<(), ItemFailure> {
    let fail = |reason: String| ItemFailure { index, reason };
    for sub in steps.iter() {
        if scope.caps.deadline_elapsed(now_ms()) {
            return Err(fail("timeout".to_string()));
        }
        if let Err(detail) = scope.executor.preflight(sub) {
            return Err(fail(format!("BAD_INPUT:{detail}")));
        }
        let res = scope
            .executor
            .run_step(&mut ctx, sub, &scope.caps, &scope.events)
            .await;
        if !res.ok {
            let reason = res.reason.map_or_else(|| "error".to_string(), |r| r.to_string());
            return Err(fail(reason));
        }
    }
    Ok(())
}

impl StepHandler for FanoutHandler {
    fn validate(&self, step: &Step) -> Result<(), String> {
        FanoutPlan::from_step(step).map(|_| ())
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
        step: &Step,
    ) -> Result<StepOutcome, HandlerError> {
        let plan = FanoutPlan::from_step(step).map_err(HandlerError::BadInput)?;
        let scope = ctx
            .scope()
            .cloned()
            .ok_or_else(|| HandlerError::failed("fanout requires a run scope"))?;

        let items = match ctx.get(&plan.from_path) {
            Some(Value::Array(items)) => items.clone(),
            _ => return Err(HandlerError::failed("fromPath must resolve to array")),
        };
        if items.is_empty() {
            return Ok(StepOutcome::default());
        }

        let width = plan.concurrency.min(items.len());
        tracing::debug!(
            step_id = %step.label(),
            items = items.len(),
            width,
            stop_on_first_error = plan.stop_on_first_error,
            "fan-out starting"
        );

        let semaphore = Arc::new(Semaphore::new(width));
        let stop = Arc::new(AtomicBool::new(false));
        let steps = Arc::new(plan.steps);
        let mut join_set = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| HandlerError::failed(format!("fan-out pool closed: {e}")))?;
            if stop.load(Ordering::SeqCst) {
                break;
            }

            let mut child = ctx.clone();
            child.set(&plan.item_path, item);
            let scope = scope.clone();
            let steps = Arc::clone(&steps);
            let stop = Arc::clone(&stop);
            let stop_on_first_error = plan.stop_on_first_error;

            join_set.spawn(async move {
                let result = run_item(scope, child, steps, index).await;
                if result.is_err() && stop_on_first_error {
                    stop.store(true, Ordering::SeqCst);
                }
                drop(permit);
                result
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(failure)) => failures.push(failure),
                Err(e) => failures.push(ItemFailure {
                    index: usize::MAX,
                    reason: format!("task join error: {e}"),
                }),
            }
        }

        if failures.is_empty() {
            return Ok(StepOutcome::default());
        }

        failures.sort_by_key(|f| f.index);
        let first = &failures[0];
        tracing::warn!(
            step_id = %step.label(),
            failed = failures.len(),
            first_index = first.index,
            first_reason = %first.reason,
            "fan-out items failed"
        );

        if scope.caps.deadline_elapsed(now_ms()) {
            return Err(HandlerError::Timeout);
        }
        if plan.stop_on_first_error {
            return Err(HandlerError::failed("fanout-failed"));
        }
        Ok(StepOutcome::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plan_defaults() {
        let step = Step::new("f", "fanout").with_inputs(json!({ "fromPath": "items" }));
        let plan = FanoutPlan::from_step(&step).unwrap();
        assert_eq!(plan.item_path, "item");
        assert_eq!(plan.concurrency, 1);
        assert!(plan.stop_on_first_error);
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn plan_rejects_bad_inputs() {
        let missing = Step::new("f", "fanout").with_inputs(json!({ "concurrency": 2 }));
        assert_eq!(FanoutHandler.validate(&missing), Err("fromPath: required".to_string()));

        let bad_steps = Step::new("f", "fanout")
            .with_inputs(json!({ "fromPath": "items", "steps": [{ "id": "x" }] }));
        assert!(FanoutHandler.validate(&bad_steps).is_err());
    }

    #[test]
    fn plan_reads_sub_steps() {
        let step = Step::new("f", "fanout").with_inputs(json!({
            "fromPath": "items",
            "concurrency": 3,
            "stopOnFirstError": false,
            "steps": [{ "type": "transform", "inputs": { "assign": { "seen": true } } }]
        }));
        let plan = FanoutPlan::from_step(&step).unwrap();
        assert_eq!(plan.concurrency, 3);
        assert!(!plan.stop_on_first_error);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].label(), "transform");
    }

    #[tokio::test]
    async fn requires_run_scope() {
        let mut ctx = RunContext::from_value(json!({ "items": [1] }));
        let step = Step::new("f", "fanout").with_inputs(json!({ "fromPath": "items" }));
        let err = FanoutHandler.execute(&mut ctx, &step).await.unwrap_err();
        assert_eq!(err, HandlerError::failed("fanout requires a run scope"));
    }
}
