use std::io::Write;

use crate::report::aggregator::{RunSummary, Verdict};
use crate::report::event::{ReportEvent, Sink, SinkError};
use crate::runner::result::{Outcome, RunResult};

/// Format a status label for terminal output.
fn status_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Passed => "PASSED",
        Outcome::Failed => "FAILED",
        Outcome::TimedOut => "TIMEDOUT",
        Outcome::Skipped => "SKIPPED",
    }
}

/// Format the run header line.
pub fn format_run_header(total_units: usize, workers: usize, projects: &[String]) -> String {
    let plural = if workers == 1 { "" } else { "s" };
    format!(
        "Running {total_units} units using {workers} worker{plural} ({})\n",
        projects.join(", ")
    )
}

/// Format an attempt as it completes.
pub fn format_unit_result(result: &RunResult) -> String {
    let status = status_label(result.outcome);
    let duration_secs = result.duration.as_secs_f64();
    let mut line = format!("  [{status}] {} ({duration_secs:.1}s)", result.key);
    if result.attempt > 1 {
        line.push_str(&format!(" (attempt {})", result.attempt));
    }

    if let Some(err) = &result.error {
        line.push_str(&format!("\n         → {}", err.message));
    }
    for err in &result.secondary_errors {
        line.push_str(&format!("\n         ↳ {}", err.message));
    }
    if result.will_retry {
        line.push_str("\n         → retrying");
    }

    line
}

/// Format the final summary after all units complete.
pub fn format_summary(summary: &RunSummary) -> String {
    let counts = &summary.counts;
    let mut parts = Vec::new();

    if counts.passed > 0 {
        parts.push(format!("{} passed", counts.passed));
    }
    if counts.failed > 0 {
        parts.push(format!("{} failed", counts.failed));
    }
    if counts.timed_out > 0 {
        parts.push(format!("{} timed out", counts.timed_out));
    }
    if counts.flaky > 0 {
        parts.push(format!("{} flaky", counts.flaky));
    }
    if counts.skipped > 0 {
        parts.push(format!("{} skipped", counts.skipped));
    }
    if counts.not_run > 0 {
        parts.push(format!("{} not run", counts.not_run));
    }

    if parts.is_empty() {
        parts.push("0 tests".into());
    }

    let mut out = format!(
        "\nResults: {} ({:.1}s)",
        parts.join(", "),
        summary.duration.as_secs_f64()
    );

    for entry in summary.entries.iter().filter(|e| e.verdict.is_failure()) {
        out.push_str(&format!(
            "\n  {} {} ({} attempt{})",
            entry.verdict,
            entry.key,
            entry.attempts(),
            if entry.attempts() == 1 { "" } else { "s" }
        ));
    }
    for entry in summary.entries.iter().filter(|e| e.verdict == Verdict::NotRun) {
        out.push_str(&format!("\n  not run {}", entry.key));
    }
    for err in &summary.diagnostics {
        out.push_str(&format!("\n  {err}"));
    }
    for warning in &summary.warnings {
        out.push_str(&format!("\n  warning: {warning}"));
    }
    out.push_str(&format!("\n{}", summary.verdict.to_string().to_uppercase()));

    out
}

/// Progress lines as units finish, then the summary.
pub struct ListSink {
    out: Box<dyn Write + Send>,
}

impl ListSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl Sink for ListSink {
    fn name(&self) -> &str {
        "list"
    }

    fn on_event(&mut self, event: &ReportEvent) -> Result<(), SinkError> {
        match event {
            ReportEvent::RunStarted {
                total_units,
                workers,
                projects,
            } => writeln!(self.out, "{}", format_run_header(*total_units, *workers, projects))?,
            ReportEvent::UnitStarted { .. } => {}
            ReportEvent::UnitFinished { result } => {
                writeln!(self.out, "{}", format_unit_result(result))?;
            }
            ReportEvent::RunFinished { summary } => {
                writeln!(self.out, "{}", format_summary(summary))?;
                self.out.flush()?;
            }
        }
        Ok(())
    }
}
