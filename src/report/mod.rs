//! Result aggregation and reporter sinks.
//!
//! The scheduler feeds every [`RunResult`](crate::runner::result::RunResult)
//! into an [`Aggregator`] and emits [`ReportEvent`]s on an [`EventBus`];
//! sinks turn those events into terminal output or report files.

pub mod aggregator;
pub mod display;
pub mod event;
pub mod junit;
pub mod serialize;
pub mod sinks;

use std::io::Write;
use std::path::Path;

pub use aggregator::{Aggregator, Counts, RunSummary, SuiteVerdict, UnitSummary, Verdict};
pub use event::{EventBus, ReportEvent, Sink, SinkError};
pub use sinks::build_sinks;

/// Write a rendered report to `output`, or stdout when unset.
pub(crate) fn write_output(output: Option<&Path>, contents: &str) -> std::io::Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, contents)
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(contents.as_bytes())?;
            stdout.flush()
        }
    }
}
