use std::path::PathBuf;

use serde::Serialize;

use crate::driver::Artifact;
use crate::report::aggregator::{Counts, RunSummary, SuiteVerdict, UnitSummary, Verdict};
use crate::report::event::{ReportEvent, Sink, SinkError};
use crate::report::write_output;
use crate::runner::result::{Outcome, RunResult, TestError};

/// Serializable run report for the json and yaml reporters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub verdict: SuiteVerdict,
    pub duration_ms: u64,
    pub counts: Counts,
    pub units: Vec<UnitReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<TestError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// One test × project pair with all of its attempts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitReport {
    pub file: String,
    pub title: String,
    pub project: String,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub flaky: bool,
    pub attempts: Vec<AttemptReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptReport {
    pub attempt: u32,
    pub worker: usize,
    pub outcome: Outcome,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secondary_errors: Vec<TestError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn attempt_report(result: &RunResult) -> AttemptReport {
    AttemptReport {
        attempt: result.attempt,
        worker: result.worker,
        outcome: result.outcome,
        duration_ms: millis(result.duration),
        error: result.error.clone(),
        secondary_errors: result.secondary_errors.clone(),
        artifacts: result.artifacts.clone(),
    }
}

fn unit_report(entry: &UnitSummary) -> UnitReport {
    UnitReport {
        file: entry.key.test.file.clone(),
        title: entry.key.test.title(),
        project: entry.key.project.clone(),
        verdict: entry.verdict,
        flaky: entry.flaky,
        attempts: entry.results.iter().map(attempt_report).collect(),
    }
}

/// Convert a [`RunSummary`] into a serializable [`RunReport`].
pub fn to_report(summary: &RunSummary) -> RunReport {
    RunReport {
        verdict: summary.verdict,
        duration_ms: millis(summary.duration),
        counts: summary.counts.clone(),
        units: summary.entries.iter().map(unit_report).collect(),
        diagnostics: summary.diagnostics.clone(),
        warnings: summary.warnings.clone(),
    }
}

/// Output encoding of a [`ReportSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Yaml,
}

/// Writes the full report once the run finishes.
pub struct ReportSink {
    format: ReportFormat,
    output: Option<PathBuf>,
}

impl ReportSink {
    pub fn new(format: ReportFormat, output: Option<PathBuf>) -> Self {
        Self { format, output }
    }

    /// Render the report in this sink's format.
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] if serialization fails.
    pub fn render(&self, summary: &RunSummary) -> Result<String, SinkError> {
        let report = to_report(summary);
        Ok(match self.format {
            ReportFormat::Json => serde_json::to_string_pretty(&report)? + "\n",
            ReportFormat::Yaml => serde_yaml::to_string(&report)?,
        })
    }
}

impl Sink for ReportSink {
    fn name(&self) -> &str {
        match self.format {
            ReportFormat::Json => "json",
            ReportFormat::Yaml => "yaml",
        }
    }

    fn on_event(&mut self, event: &ReportEvent) -> Result<(), SinkError> {
        if let ReportEvent::RunFinished { summary } = event {
            let rendered = self.render(summary)?;
            write_output(self.output.as_deref(), &rendered)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::matrix::UnitKey;
    use crate::report::aggregator::Aggregator;
    use crate::suite::TestId;

    fn key(title: &str) -> UnitKey {
        UnitKey {
            test: TestId::new("api/users.spec.yaml", ["users", title]),
            project: "staging".into(),
        }
    }

    fn summary() -> RunSummary {
        let mut agg = Aggregator::new([key("list"), key("create")]);
        let mut first = RunResult::failed(
            key("create"),
            1,
            Duration::from_millis(40),
            TestError::assertion("expected 201, got 500"),
        );
        first.will_retry = true;
        agg.record(first);
        let mut second = RunResult::passed(key("create"), 2, Duration::from_millis(30));
        second.artifacts.push(Artifact::new("trace", "out/trace.zip"));
        agg.record(second);
        agg.record(RunResult::passed(key("list"), 1, Duration::from_millis(12)));
        agg.summary()
    }

    #[test]
    fn report_keeps_every_attempt() {
        let report = to_report(&summary());
        assert_eq!(report.units.len(), 2);
        let create = &report.units[1];
        assert_eq!(create.title, "users > create");
        assert_eq!(create.attempts.len(), 2);
        assert!(create.flaky);
        assert_eq!(create.attempts[1].artifacts[0].name, "trace");
        assert_eq!(report.verdict, SuiteVerdict::Passed);
    }

    #[test]
    fn json_uses_camel_case() {
        let sink = ReportSink::new(ReportFormat::Json, None);
        let json = sink.render(&summary()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["verdict"], "passed");
        assert_eq!(value["counts"]["flaky"], 1);
        assert_eq!(value["units"][1]["attempts"][0]["outcome"], "failed");
        assert_eq!(
            value["units"][1]["attempts"][0]["error"]["kind"],
            "assertion_failed"
        );
        assert!(value["units"][0].get("flaky").is_none());
        assert!(value.get("warnings").is_none());
    }

    #[test]
    fn yaml_report_parses_back() {
        let sink = ReportSink::new(ReportFormat::Yaml, None);
        let yaml = sink.render(&summary()).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(value["units"][0]["project"], serde_yaml::Value::from("staging"));
    }

    #[test]
    fn sink_writes_file_on_run_finished() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/run.json");
        let mut sink = ReportSink::new(ReportFormat::Json, Some(path.clone()));
        sink.on_event(&ReportEvent::RunStarted {
            total_units: 2,
            workers: 1,
            projects: vec!["staging".into()],
        })
        .unwrap();
        assert!(!path.exists());
        sink.on_event(&ReportEvent::RunFinished { summary: summary() })
            .unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"durationMs\""));
    }
}
