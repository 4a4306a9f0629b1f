use thiserror::Error;
use tracing::error;

use crate::matrix::UnitKey;
use crate::report::aggregator::RunSummary;
use crate::runner::result::RunResult;

/// Ordered stream every sink observes.
#[derive(Debug, Clone)]
pub enum ReportEvent {
    RunStarted {
        total_units: usize,
        workers: usize,
        projects: Vec<String>,
    },
    UnitStarted {
        key: UnitKey,
        attempt: u32,
        worker: usize,
    },
    UnitFinished {
        result: RunResult,
    },
    RunFinished {
        summary: RunSummary,
    },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A reporter. Sink failures never affect scheduling or verdicts.
pub trait Sink: Send {
    fn name(&self) -> &str;

    /// Observe one event.
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] if the sink could not write its output.
    fn on_event(&mut self, event: &ReportEvent) -> Result<(), SinkError>;
}

/// Fans events out to every registered sink.
#[derive(Default)]
pub struct EventBus {
    sinks: Vec<Box<dyn Sink>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sinks(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self { sinks }
    }

    pub fn add(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn emit(&mut self, event: &ReportEvent) {
        for sink in &mut self.sinks {
            if let Err(e) = sink.on_event(event) {
                error!(sink = sink.name(), error = %e, "reporter failed");
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Recorder;
    use super::*;

    struct Broken;

    impl Sink for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn on_event(&mut self, _event: &ReportEvent) -> Result<(), SinkError> {
            Err(std::io::Error::other("disk full").into())
        }
    }

    fn started() -> ReportEvent {
        ReportEvent::RunStarted {
            total_units: 2,
            workers: 1,
            projects: vec!["default".into()],
        }
    }

    #[test]
    fn emit_reaches_every_sink() {
        let a = Recorder::default();
        let b = Recorder::default();
        let mut bus = EventBus::with_sinks(vec![Box::new(a.clone()), Box::new(b.clone())]);
        bus.emit(&started());
        assert_eq!(a.0.lock().len(), 1);
        assert_eq!(b.0.lock().len(), 1);
    }

    #[test]
    fn failing_sink_does_not_stop_others() {
        let ok = Recorder::default();
        let mut bus = EventBus::new();
        bus.add(Box::new(Broken));
        bus.add(Box::new(ok.clone()));
        bus.emit(&started());
        assert_eq!(ok.0.lock().len(), 1);
        assert_eq!(bus.len(), 2);
    }

    #[test]
    fn sink_error_display() {
        let err: SinkError = std::io::Error::other("disk full").into();
        assert_eq!(err.to_string(), "IO error: disk full");
    }
}
