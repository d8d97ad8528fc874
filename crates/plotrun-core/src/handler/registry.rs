//! Step handler registry.
//!
//! A name-indexed map of boxed handlers, populated once at startup and then
//! shared read-only by every run through the `StepExecutor`.

use std::collections::HashMap;

use super::calc::CalcHandler;
use super::fanout::FanoutHandler;
use super::gate::GateHandler;
use super::http::HttpStubHandler;
use super::map::MapHandler;
use super::transform::TransformHandler;
use super::{BoxStepHandler, StepHandler};

/// Registry of step handlers, indexed by step type.
pub struct HandlerRegistry {
    handlers: HashMap<String, BoxStepHandler>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in step types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("transform", TransformHandler);
        registry.register("gate", GateHandler::default());
        registry.register("calc", CalcHandler);
        registry.register("map", MapHandler);
        registry.register("fanout", FanoutHandler);
        registry.register("http", HttpStubHandler);
        registry
    }

    /// Register a handler under `step_type`, replacing any existing one.
    pub fn register<H: StepHandler + 'static>(&mut self, step_type: impl Into<String>, handler: H) {
        self.handlers
            .insert(step_type.into(), BoxStepHandler::new(handler));
    }

    pub fn get(&self, step_type: &str) -> Option<&BoxStepHandler> {
        self.handlers.get(step_type)
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.handlers.contains_key(step_type)
    }

    /// Registered step types, sorted.
    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::handler::{HandlerError, StepOutcome};
    use plotrun_types::plot::Step;

    struct Noop;

    impl StepHandler for Noop {
        async fn execute(&self, _: &mut RunContext, _: &Step) -> Result<StepOutcome, HandlerError> {
            Ok(StepOutcome::default())
        }
    }

    #[test]
    fn builtins_are_registered() {
        let registry = HandlerRegistry::with_builtins();
        assert_eq!(
            registry.list_names(),
            vec!["calc", "fanout", "gate", "http", "map", "transform"]
        );
    }

    #[test]
    fn register_adds_and_replaces() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.get("custom").is_none());
        registry.register("custom", Noop);
        registry.register("custom", Noop);
        assert!(registry.contains("custom"));
        assert_eq!(registry.list_names(), vec!["custom"]);
    }
}
