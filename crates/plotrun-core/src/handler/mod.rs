//! Step handler contract.
//!
//! A handler executes one step against the run context. Concrete handlers
//! implement [`StepHandler`] (RPITIT, not object-safe); the registry stores
//! them as [`BoxStepHandler`], which goes through the object-safe
//! [`StepHandlerDyn`] with boxed futures:
//!
//! 1. `StepHandlerDyn` mirrors `StepHandler` with a boxed future
//! 2. a blanket impl covers every `T: StepHandler`
//! 3. `BoxStepHandler` wraps `Box<dyn StepHandlerDyn>` and delegates

pub mod calc;
pub mod fanout;
pub mod gate;
pub mod http;
pub mod map;
pub mod registry;
pub mod transform;

use std::future::Future;
use std::pin::Pin;

use plotrun_types::plot::Step;

use crate::context::RunContext;

// ---------------------------------------------------------------------------
// Outcome and errors
// ---------------------------------------------------------------------------

/// What a successful handler reports back to the runner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Successor chosen by the handler; overrides `step.next`.
    pub next_id: Option<String>,
    /// The handler took a fork branch.
    pub fork_used: bool,
}

impl StepOutcome {
    pub fn next(next_id: Option<String>) -> Self {
        Self {
            next_id,
            fork_used: false,
        }
    }
}

/// Handler failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// The step's inputs are unusable; never retried.
    #[error("BAD_INPUT:{0}")]
    BadInput(String),

    /// The handler gave up because the run deadline passed.
    #[error("timeout")]
    Timeout,

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn bad_input(detail: impl Into<String>) -> Self {
        HandlerError::BadInput(detail.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

// ---------------------------------------------------------------------------
// StepHandler
// ---------------------------------------------------------------------------

/// Executes steps of one type.
pub trait StepHandler: Send + Sync {
    /// Pre-flight input check run before the step starts. An `Err` becomes a
    /// `BAD_INPUT:<detail>` failure with zero attempts.
    fn validate(&self, step: &Step) -> Result<(), String> {
        let _ = step;
        Ok(())
    }

    fn execute(
        &self,
        ctx: &mut RunContext,
        step: &Step,
    ) -> impl Future<Output = Result<StepOutcome, HandlerError>> + Send;
}

/// Object-safe version of [`StepHandler`] with boxed futures.
pub trait StepHandlerDyn: Send + Sync {
    fn validate(&self, step: &Step) -> Result<(), String>;

    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a mut RunContext,
        step: &'a Step,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome, HandlerError>> + Send + 'a>>;
}

impl<T: StepHandler> StepHandlerDyn for T {
    fn validate(&self, step: &Step) -> Result<(), String> {
        StepHandler::validate(self, step)
    }

    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a mut RunContext,
        step: &'a Step,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome, HandlerError>> + Send + 'a>> {
        Box::pin(self.execute(ctx, step))
    }
}

/// Type-erased step handler stored in the registry.
pub struct BoxStepHandler {
    inner: Box<dyn StepHandlerDyn>,
}

impl BoxStepHandler {
    pub fn new<T: StepHandler + 'static>(handler: T) -> Self {
        Self {
            inner: Box::new(handler),
        }
    }

    pub fn validate(&self, step: &Step) -> Result<(), String> {
        self.inner.validate(step)
    }

    pub async fn execute(
        &self,
        ctx: &mut RunContext,
        step: &Step,
    ) -> Result<StepOutcome, HandlerError> {
        self.inner.execute_boxed(ctx, step).await
    }

    /// The boxed future itself, for callers that race or wrap it.
    pub fn execute_boxed<'a>(
        &'a self,
        ctx: &'a mut RunContext,
        step: &'a Step,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome, HandlerError>> + Send + 'a>> {
        self.inner.execute_boxed(ctx, step)
    }
}

// ---------------------------------------------------------------------------
// Input helpers shared by the built-ins
// ---------------------------------------------------------------------------

/// A trimmed, non-empty string input.
pub(crate) fn string_input<'a>(step: &'a Step, key: &str) -> Option<&'a str> {
    step.input(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
