use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::path::PathBuf;

use crate::report::aggregator::{RunSummary, UnitSummary, Verdict};
use crate::report::event::{ReportEvent, Sink, SinkError};
use crate::report::write_output;

/// Emit a run summary as JUnit XML, one `<testsuite>` per project.
pub fn emit_junit(summary: &RunSummary) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_junit(&mut out, summary);
    out
}

fn write_junit(out: &mut String, summary: &RunSummary) -> fmt::Result {
    let mut projects: BTreeMap<&str, Vec<&UnitSummary>> = BTreeMap::new();
    for entry in &summary.entries {
        projects.entry(entry.key.project.as_str()).or_default().push(entry);
    }

    let tests = summary.counts.total;
    let failures = summary.counts.failed + summary.counts.timed_out;
    let skipped = summary.counts.skipped + summary.counts.not_run;
    let time_secs = summary.duration.as_secs_f64();

    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(
        out,
        r#"<testsuites name="drover" tests="{tests}" failures="{failures}" skipped="{skipped}" time="{time_secs:.3}">"#
    )?;

    for (project, entries) in projects {
        let name = xml_escape(project);
        let failures = entries.iter().filter(|e| e.verdict.is_failure()).count();
        let skipped = entries
            .iter()
            .filter(|e| matches!(e.verdict, Verdict::Skipped | Verdict::NotRun))
            .count();
        let time: f64 = entries.iter().map(|e| e.duration().as_secs_f64()).sum();
        writeln!(
            out,
            r#"  <testsuite name="{name}" tests="{}" failures="{failures}" skipped="{skipped}" time="{time:.3}">"#,
            entries.len()
        )?;
        for entry in entries {
            write_case(out, entry)?;
        }
        writeln!(out, "  </testsuite>")?;
    }

    writeln!(out, "</testsuites>")
}

fn write_case(out: &mut String, entry: &UnitSummary) -> fmt::Result {
    let title = xml_escape(&entry.key.test.title());
    let file = xml_escape(&entry.key.test.file);
    let time = entry.duration().as_secs_f64();
    writeln!(
        out,
        r#"    <testcase name="{title}" classname="{file}" time="{time:.3}">"#
    )?;

    let error = entry.deciding().and_then(|r| r.error.as_ref());
    match entry.verdict {
        Verdict::Failed | Verdict::TimedOut => match error {
            Some(err) => writeln!(
                out,
                r#"      <failure message="{}" type="{}"/>"#,
                xml_escape(&err.message),
                xml_escape(&err.kind.to_string())
            )?,
            None => writeln!(out, r#"      <failure message="test failed"/>"#)?,
        },
        Verdict::Skipped => writeln!(out, "      <skipped/>")?,
        Verdict::NotRun => writeln!(out, r#"      <skipped message="not run"/>"#)?,
        Verdict::Passed => {}
    }

    let artifacts: Vec<_> = entry.results.iter().flat_map(|r| &r.artifacts).collect();
    if entry.attempts() > 1 || !artifacts.is_empty() {
        writeln!(out, "      <system-out>")?;
        if entry.attempts() > 1 {
            writeln!(out, "        attempts: {}", entry.attempts())?;
        }
        for artifact in artifacts {
            writeln!(
                out,
                "        [[ATTACHMENT|{}]]",
                xml_escape(&artifact.path.display().to_string())
            )?;
        }
        writeln!(out, "      </system-out>")?;
    }

    writeln!(out, "    </testcase>")
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Writes JUnit XML once the run finishes.
pub struct JunitSink {
    output: Option<PathBuf>,
}

impl JunitSink {
    pub fn new(output: Option<PathBuf>) -> Self {
        Self { output }
    }
}

impl Sink for JunitSink {
    fn name(&self) -> &str {
        "junit"
    }

    fn on_event(&mut self, event: &ReportEvent) -> Result<(), SinkError> {
        if let ReportEvent::RunFinished { summary } = event {
            write_output(self.output.as_deref(), &emit_junit(summary))?;
        }
        Ok(())
    }
}
