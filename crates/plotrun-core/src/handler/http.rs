//! `http`: placeholder for network-bound steps. Succeeds without doing I/O.

use plotrun_types::plot::Step;

use super::{HandlerError, StepHandler, StepOutcome};
use crate::context::RunContext;

pub struct HttpStubHandler;

impl StepHandler for HttpStubHandler {
    async fn execute(
        &self,
        _ctx: &mut RunContext,
        step: &Step,
    ) -> Result<StepOutcome, HandlerError> {
        tracing::debug!(step_id = %step.label(), "http stub step, no request sent");
        Ok(StepOutcome::default())
    }
}
