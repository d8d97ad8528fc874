//! Event fan-out to the run observer and the trace sink.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use plotrun_types::event::RunEvent;

use crate::trace::TraceWriter;

/// Callback receiving lifecycle events.
pub type EventObserver = Arc<dyn Fn(&RunEvent) + Send + Sync>;

/// Where a run's events go. Cheap to clone; shared with fan-out workers.
#[derive(Clone, Default)]
pub struct EventSink {
    observer: Option<EventObserver>,
    trace: Option<Arc<TraceWriter>>,
}

impl EventSink {
    pub fn new(observer: Option<EventObserver>, trace: Option<Arc<TraceWriter>>) -> Self {
        Self { observer, trace }
    }

    /// Deliver `event`. A panicking observer is logged and ignored.
    pub fn emit(&self, event: &RunEvent) {
        if let Some(trace) = &self.trace {
            trace.write_event(event);
        }
        if let Some(observer) = &self.observer {
            if catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                tracing::warn!(event = event.name(), "run observer panicked, ignoring");
            }
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("observer", &self.observer.is_some())
            .field("trace", &self.trace.as_ref().map(|t| t.path().to_path_buf()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn observer_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink = EventSink::new(
            Some(Arc::new(move |e: &RunEvent| {
                sink_seen.lock().unwrap().push(e.name());
            })),
            None,
        );
        sink.emit(&RunEvent::Done { total_ms: 0 });
        assert_eq!(*seen.lock().unwrap(), vec!["done"]);
    }

    #[test]
    fn observer_panic_is_swallowed() {
        let sink = EventSink::new(Some(Arc::new(|_: &RunEvent| panic!("boom"))), None);
        sink.emit(&RunEvent::Done { total_ms: 0 });
    }

    #[test]
    fn empty_sink_is_noop() {
        EventSink::default().emit(&RunEvent::Done { total_ms: 0 });
    }
}
