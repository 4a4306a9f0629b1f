use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::matrix::UnitKey;
use crate::runner::result::{Outcome, RunResult, TestError};

/// Final verdict for one test × project pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Passed,
    Failed,
    TimedOut,
    Skipped,
    /// No attempt was ever dispatched.
    NotRun,
}

impl Verdict {
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

impl From<Outcome> for Verdict {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Passed => Self::Passed,
            Outcome::Failed => Self::Failed,
            Outcome::TimedOut => Self::TimedOut,
            Outcome::Skipped => Self::Skipped,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timedOut"),
            Self::Skipped => write!(f, "skipped"),
            Self::NotRun => write!(f, "notRun"),
        }
    }
}

/// Verdict of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SuiteVerdict {
    Passed,
    Failed,
    /// Cancelled before every unit reached a verdict, with nothing failed.
    Interrupted,
}

impl fmt::Display for SuiteVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Every attempt of one key with its resolved verdict.
#[derive(Debug, Clone)]
pub struct UnitSummary {
    pub key: UnitKey,
    pub verdict: Verdict,
    /// Passed only after at least one failed attempt.
    pub flaky: bool,
    /// Attempts in attempt order.
    pub results: Vec<RunResult>,
}

impl UnitSummary {
    pub fn attempts(&self) -> usize {
        self.results.len()
    }

    /// Time spent across all attempts.
    pub fn duration(&self) -> Duration {
        self.results.iter().map(|r| r.duration).sum()
    }

    /// The attempt that decided the verdict.
    pub fn deciding(&self) -> Option<&RunResult> {
        self.results
            .iter()
            .find(|r| r.outcome == Outcome::Passed)
            .or_else(|| self.results.last())
    }
}

/// Per-verdict counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Counts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub skipped: usize,
    pub not_run: usize,
    pub flaky: usize,
}

/// Aggregated outcome of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// One entry per key, in expansion order.
    pub entries: Vec<UnitSummary>,
    pub counts: Counts,
    pub verdict: SuiteVerdict,
    pub duration: Duration,
    /// Worker- and suite-scoped teardown failures.
    pub diagnostics: Vec<TestError>,
    /// Discovery warnings such as duplicate titles.
    pub warnings: Vec<String>,
}

/// Collects results keyed by (test, project) in any arrival order.
pub struct Aggregator {
    order: Vec<UnitKey>,
    results: HashMap<UnitKey, Vec<RunResult>>,
    diagnostics: Vec<TestError>,
    warnings: Vec<String>,
    started: Instant,
}

impl Aggregator {
    pub fn new(keys: impl IntoIterator<Item = UnitKey>) -> Self {
        let order: Vec<UnitKey> = keys.into_iter().collect();
        let results = order.iter().map(|k| (k.clone(), Vec::new())).collect();
        Self {
            order,
            results,
            diagnostics: Vec::new(),
            warnings: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn record(&mut self, result: RunResult) {
        if !self.results.contains_key(&result.key) {
            self.order.push(result.key.clone());
        }
        self.results.entry(result.key.clone()).or_default().push(result);
    }

    pub fn add_diagnostics(&mut self, errors: impl IntoIterator<Item = TestError>) {
        self.diagnostics.extend(errors);
    }

    pub fn add_warnings(&mut self, warnings: impl IntoIterator<Item = String>) {
        self.warnings.extend(warnings);
    }

    pub fn summary(&self) -> RunSummary {
        let mut counts = Counts::default();
        let entries: Vec<UnitSummary> = self
            .order
            .iter()
            .map(|key| {
                let mut results = self.results.get(key).cloned().unwrap_or_default();
                results.sort_by_key(|r| r.attempt);
                let (verdict, flaky) = resolve(&results);
                counts.total += 1;
                match verdict {
                    Verdict::Passed => counts.passed += 1,
                    Verdict::Failed => counts.failed += 1,
                    Verdict::TimedOut => counts.timed_out += 1,
                    Verdict::Skipped => counts.skipped += 1,
                    Verdict::NotRun => counts.not_run += 1,
                }
                if flaky {
                    counts.flaky += 1;
                }
                UnitSummary {
                    key: key.clone(),
                    verdict,
                    flaky,
                    results,
                }
            })
            .collect();

        let verdict = if entries.iter().any(|e| e.verdict.is_failure()) {
            SuiteVerdict::Failed
        } else if entries.iter().any(|e| e.verdict == Verdict::NotRun) {
            SuiteVerdict::Interrupted
        } else {
            SuiteVerdict::Passed
        };

        RunSummary {
            entries,
            counts,
            verdict,
            duration: self.started.elapsed(),
            diagnostics: self.diagnostics.clone(),
            warnings: self.warnings.clone(),
        }
    }
}

/// First `passed` wins, otherwise the last attempt decides.
fn resolve(results: &[RunResult]) -> (Verdict, bool) {
    if let Some(pos) = results.iter().position(|r| r.outcome == Outcome::Passed) {
        let flaky = results[..pos].iter().any(|r| r.outcome.is_failure());
        return (Verdict::Passed, flaky);
    }
    match results.last() {
        Some(last) => (last.outcome.into(), false),
        None => (Verdict::NotRun, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::result::TestErrorKind;
    use crate::suite::TestId;

    fn key(title: &str) -> UnitKey {
        UnitKey {
            test: TestId::new("cart.spec.yaml", [title]),
            project: "chromium".into(),
        }
    }

    fn failed(title: &str, attempt: u32, will_retry: bool) -> RunResult {
        let mut r = RunResult::failed(
            key(title),
            attempt,
            Duration::from_millis(10),
            TestError::assertion("nope"),
        );
        r.will_retry = will_retry;
        r
    }

    #[test]
    fn all_passed() {
        let mut agg = Aggregator::new([key("a"), key("b")]);
        agg.record(RunResult::passed(key("b"), 1, Duration::from_millis(5)));
        agg.record(RunResult::passed(key("a"), 1, Duration::from_millis(5)));
        let summary = agg.summary();
        assert_eq!(summary.verdict, SuiteVerdict::Passed);
        assert_eq!(summary.counts.passed, 2);
        // Expansion order, not arrival order.
        assert_eq!(summary.entries[0].key, key("a"));
    }

    #[test]
    fn pass_after_failure_is_flaky_and_counts_once() {
        let mut agg = Aggregator::new([key("a")]);
        agg.record(RunResult::passed(key("a"), 2, Duration::from_millis(5)));
        agg.record(failed("a", 1, true));
        let summary = agg.summary();
        assert_eq!(summary.verdict, SuiteVerdict::Passed);
        assert_eq!(summary.counts.passed, 1);
        assert_eq!(summary.counts.flaky, 1);
        let entry = &summary.entries[0];
        assert_eq!(entry.attempts(), 2);
        assert_eq!(entry.results[0].attempt, 1);
        assert_eq!(entry.deciding().unwrap().attempt, 2);
        assert_eq!(entry.duration(), Duration::from_millis(15));
    }

    #[test]
    fn last_attempt_decides_without_pass() {
        let mut agg = Aggregator::new([key("a")]);
        agg.record(failed("a", 1, true));
        agg.record(RunResult::failed(
            key("a"),
            2,
            Duration::from_secs(1),
            TestError::new(TestErrorKind::Timeout, "test timeout of 1000ms exceeded"),
        ));
        let summary = agg.summary();
        assert_eq!(summary.entries[0].verdict, Verdict::TimedOut);
        assert_eq!(summary.verdict, SuiteVerdict::Failed);
    }

    #[test]
    fn missing_keys_are_not_run_and_interrupt() {
        let mut agg = Aggregator::new([key("a"), key("b")]);
        agg.record(RunResult::passed(key("a"), 1, Duration::ZERO));
        let summary = agg.summary();
        assert_eq!(summary.entries[1].verdict, Verdict::NotRun);
        assert_eq!(summary.entries[1].attempts(), 0);
        assert_eq!(summary.verdict, SuiteVerdict::Interrupted);
    }

    #[test]
    fn failure_beats_interruption() {
        let mut agg = Aggregator::new([key("a"), key("b")]);
        agg.record(failed("a", 1, false));
        assert_eq!(agg.summary().verdict, SuiteVerdict::Failed);
    }

    #[test]
    fn skipped_does_not_fail() {
        let mut agg = Aggregator::new([key("a")]);
        agg.record(RunResult::skipped(key("a"), 1));
        let summary = agg.summary();
        assert_eq!(summary.verdict, SuiteVerdict::Passed);
        assert_eq!(summary.counts.skipped, 1);
    }

    #[test]
    fn unexpected_key_is_tolerated() {
        let mut agg = Aggregator::new(Vec::new());
        agg.record(RunResult::passed(key("late"), 1, Duration::ZERO));
        assert_eq!(agg.summary().counts.total, 1);
    }
}
