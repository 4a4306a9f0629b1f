use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::fixture::{TestScope, WorkerScope};
use crate::matrix::RunUnit;
use crate::runner::result::{RunResult, TestError, TestErrorKind};
use crate::runner::worker::WorkerContext;
use crate::suite::body::{ArtifactLog, TestArgs, TestInfo};

/// What happened to one unit attempt.
pub struct Execution {
    pub result: RunResult,
    /// A panic escaped the body or a fixture hook; the worker must retire.
    pub crashed: bool,
}

/// Run one attempt of a unit under its timeout.
///
/// Fixture setup and the body share the unit's deadline. Test-scoped
/// teardown then gets whatever is left of the deadline, and if that runs
/// out, one more `teardown_grace` before the remaining fixtures are
/// abandoned.
pub async fn execute_unit(
    unit: &RunUnit,
    worker_index: usize,
    worker: &mut WorkerScope,
    ctx: &WorkerContext,
) -> Execution {
    let key = unit.key();
    if unit.test.skip {
        debug!(unit = %key, "skipping unit");
        let mut result = RunResult::skipped(key, unit.attempt);
        result.worker = worker_index;
        return Execution {
            result,
            crashed: false,
        };
    }

    let timeout = unit.timeout();
    let started = Instant::now();
    let deadline = tokio::time::Instant::now() + timeout;
    let artifacts = ArtifactLog::default();
    let base = TestArgs::new(
        Arc::clone(&ctx.driver),
        Arc::new(TestInfo {
            test: unit.test.id.clone(),
            project: unit.project.name.clone(),
            attempt: unit.attempt,
            worker: worker_index,
        }),
        Arc::clone(&unit.project.options),
        artifacts.clone(),
    );
    let specs = ctx.fixtures.as_slice();
    let mut scope = TestScope::new();

    let outcome = {
        let run = async {
            let fixtures = scope
                .acquire(specs, &unit.test.fixture_plan, &base, worker, &ctx.suite_scope)
                .await?;
            unit.test.body.run(base.with_fixtures(fixtures)).await
        };
        tokio::time::timeout_at(deadline, AssertUnwindSafe(run).catch_unwind()).await
    };

    let timeout_error = || {
        TestError::new(
            TestErrorKind::Timeout,
            format!("test timeout of {}ms exceeded", timeout.as_millis()),
        )
    };
    let body_timed_out = outcome.is_err();
    let (mut error, crashed) = match outcome {
        Ok(Ok(Ok(()))) => (None, false),
        Ok(Ok(Err(e))) => (Some(e), false),
        Ok(Err(panic)) => {
            let message = panic_message(panic.as_ref());
            warn!(unit = %key, %message, "test panicked");
            (
                Some(TestError::new(
                    TestErrorKind::WorkerCrash,
                    format!("worker crashed: {message}"),
                )),
                true,
            )
        }
        Err(_) => (Some(timeout_error()), false),
    };

    // A body that timed out leaves no deadline for teardown: go straight to
    // the grace window.
    let mut displaced = None;
    let torn_down = !body_timed_out
        && tokio::time::timeout_at(deadline, scope.teardown(specs)).await.is_ok();
    if !torn_down {
        if !body_timed_out {
            debug!(unit = %key, "deadline reached during teardown");
            displaced = error.replace(timeout_error());
        }
        if tokio::time::timeout(ctx.teardown_grace, scope.teardown(specs))
            .await
            .is_err()
        {
            scope.abandon(specs);
        }
    }

    let duration = started.elapsed();
    let mut result = match error {
        None => RunResult::passed(key, unit.attempt, duration),
        Some(e) => RunResult::failed(key, unit.attempt, duration, e),
    };
    result.worker = worker_index;
    result.artifacts = artifacts.snapshot();
    result.secondary_errors = displaced.into_iter().chain(scope.take_errors()).collect();
    debug!(
        unit = %result.key,
        attempt = result.attempt,
        outcome = %result.outcome,
        duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        "unit finished"
    );
    Execution { result, crashed }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::config::{Config, ProjectConfig};
    use crate::fixture::{FixtureGraph, SuiteScope};
    use crate::matrix::{expand, resolve_projects};
    use crate::runner::queue::WorkQueue;
    use crate::runner::result::Outcome;
    use crate::suite::fixture::{FixtureScope, FixtureSpec, FnFixture};
    use crate::driver::dry_run::DryRunDriver;
    use crate::suite::{TagSet, TestBody, TestCase, TestId, body};

    type Log = Arc<Mutex<Vec<String>>>;

    fn ctx(fixtures: Vec<FixtureSpec>) -> WorkerContext {
        let (events, _rx) = tokio::sync::mpsc::unbounded_channel();
        WorkerContext {
            queue: Arc::new(WorkQueue::default()),
            cancel: crate::runner::cancel::CancelFlag::new(),
            fixtures: Arc::new(fixtures),
            suite_scope: Arc::new(SuiteScope::new()),
            driver: Arc::new(DryRunDriver),
            teardown_grace: Duration::from_millis(200),
            max_failures: None,
            failures: std::sync::atomic::AtomicUsize::new(0),
            events,
        }
    }

    fn unit(ctx: &WorkerContext, uses: &[&str], timeout_ms: u64, b: impl TestBody + 'static) -> RunUnit {
        let requested: Vec<String> = uses.iter().map(|s| (*s).to_owned()).collect();
        let plan = FixtureGraph::build(&ctx.fixtures)
            .unwrap()
            .plan_for(&requested)
            .unwrap();
        let test = Arc::new(TestCase {
            id: TestId::new("g.spec", ["t"]),
            tags: TagSet::new(),
            fixtures: requested,
            body: Arc::new(b),
            timeout: Some(Duration::from_millis(timeout_ms)),
            retries: None,
            skip: false,
            only: false,
            fixture_plan: plan,
        });
        let config = Config {
            projects: vec![ProjectConfig::new("p")],
            ..Config::default()
        };
        expand(&[test], &resolve_projects(&config).unwrap()).remove(0)
    }

    fn logged(name: &'static str, deps: &[&str], log: &Log) -> FixtureSpec {
        let setup_log = Arc::clone(log);
        let teardown_log = Arc::clone(log);
        FixtureSpec::new(
            name,
            FixtureScope::Test,
            FnFixture::new(move |_args| {
                setup_log.lock().push(format!("setup {name}"));
                async { Ok(()) }
            })
            .with_teardown(move |_v, _a| {
                teardown_log.lock().push(format!("teardown {name}"));
                async { Ok(()) }
            }),
        )
        .depends_on(deps.iter().copied())
    }

    #[tokio::test]
    async fn passing_unit() {
        let ctx = ctx(Vec::new());
        let u = unit(&ctx, &[], 1000, body(|_a: TestArgs| async { Ok::<(), TestError>(()) }));
        let exec = execute_unit(&u, 3, &mut WorkerScope::new(), &ctx).await;
        assert_eq!(exec.result.outcome, Outcome::Passed);
        assert_eq!(exec.result.worker, 3);
        assert!(!exec.crashed);
    }

    #[tokio::test]
    async fn timeout_cuts_body_short() {
        let ctx = ctx(Vec::new());
        let u = unit(
            &ctx,
            &[],
            100,
            body(|_a: TestArgs| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), TestError>(())
            }),
        );
        let exec = execute_unit(&u, 0, &mut WorkerScope::new(), &ctx).await;
        assert_eq!(exec.result.outcome, Outcome::TimedOut);
        assert!(exec.result.duration < Duration::from_secs(2));
        assert_eq!(
            exec.result.error.unwrap().message,
            "test timeout of 100ms exceeded"
        );
    }

    #[tokio::test]
    async fn failing_body_tears_down_in_reverse() {
        let log = Log::default();
        let ctx = ctx(vec![
            logged("A", &["B"], &log),
            logged("B", &["C"], &log),
            logged("C", &[], &log),
        ]);
        let u = unit(
            &ctx,
            &["A"],
            1000,
            body(|_a: TestArgs| async { Err(TestError::assertion("boom")) }),
        );
        let exec = execute_unit(&u, 0, &mut WorkerScope::new(), &ctx).await;
        assert_eq!(exec.result.outcome, Outcome::Failed);
        assert_eq!(
            *log.lock(),
            vec!["setup C", "setup B", "setup A", "teardown A", "teardown B", "teardown C"]
        );
    }

    #[tokio::test]
    async fn panic_is_worker_crash_and_still_tears_down() {
        let log = Log::default();
        let ctx = ctx(vec![logged("db", &[], &log)]);
        let u = unit(
            &ctx,
            &["db"],
            1000,
            body(|args: TestArgs| async move {
                if args.info.attempt > 0 {
                    panic!("index out of bounds");
                }
                Ok::<(), TestError>(())
            }),
        );
        let exec = execute_unit(&u, 0, &mut WorkerScope::new(), &ctx).await;
        assert!(exec.crashed);
        assert_eq!(exec.result.outcome, Outcome::Failed);
        let error = exec.result.error.unwrap();
        assert_eq!(error.kind, TestErrorKind::WorkerCrash);
        assert!(error.message.contains("index out of bounds"));
        assert_eq!(*log.lock(), vec!["setup db", "teardown db"]);
    }

    #[tokio::test]
    async fn teardown_past_deadline_times_out_the_unit() {
        let ctx = ctx(vec![FixtureSpec::new(
            "stuck",
            FixtureScope::Test,
            FnFixture::new(|_args| async { Ok(()) }).with_teardown(|_v, _a| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }),
        )]);
        let u = unit(&ctx, &["stuck"], 100, body(|_a: TestArgs| async { Ok::<(), TestError>(()) }));
        let exec = execute_unit(&u, 0, &mut WorkerScope::new(), &ctx).await;
        assert_eq!(exec.result.outcome, Outcome::TimedOut);
        assert!(exec.result.duration < Duration::from_secs(2));
        assert_eq!(exec.result.secondary_errors.len(), 1);
        assert_eq!(exec.result.secondary_errors[0].kind, TestErrorKind::TeardownFailed);
    }

    #[tokio::test]
    async fn timed_out_body_still_tears_down_chain_within_grace() {
        let log = Log::default();
        let slow = |name: &'static str, deps: &[&str]| {
            let (setup_log, teardown_log) = (Arc::clone(&log), Arc::clone(&log));
            FixtureSpec::new(
                name,
                FixtureScope::Test,
                FnFixture::new(move |_args| {
                    setup_log.lock().push(format!("setup {name}"));
                    async { Ok(()) }
                })
                .with_teardown(move |_v, _a| {
                    let teardown_log = Arc::clone(&teardown_log);
                    async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        teardown_log.lock().push(format!("teardown {name}"));
                        Ok(())
                    }
                }),
            )
            .depends_on(deps.iter().copied())
        };
        let mut ctx = ctx(vec![slow("A", &["B"]), slow("B", &["C"]), slow("C", &[])]);
        ctx.teardown_grace = Duration::from_millis(1000);
        let u = unit(
            &ctx,
            &["A"],
            100,
            body(|_a: TestArgs| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), TestError>(())
            }),
        );
        let exec = execute_unit(&u, 0, &mut WorkerScope::new(), &ctx).await;
        assert_eq!(exec.result.outcome, Outcome::TimedOut);
        assert!(exec.result.secondary_errors.is_empty(), "{:?}", exec.result.secondary_errors);
        assert_eq!(
            *log.lock(),
            vec!["setup C", "setup B", "setup A", "teardown A", "teardown B", "teardown C"]
        );
    }

    #[tokio::test]
    async fn skipped_unit_resolves_no_fixtures() {
        let log = Log::default();
        let ctx = ctx(vec![logged("db", &[], &log)]);
        let mut u = unit(&ctx, &["db"], 1000, body(|_a: TestArgs| async { Ok::<(), TestError>(()) }));
        let mut test = (*u.test).clone();
        test.skip = true;
        u.test = Arc::new(test);
        let exec = execute_unit(&u, 0, &mut WorkerScope::new(), &ctx).await;
        assert_eq!(exec.result.outcome, Outcome::Skipped);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn artifacts_are_recorded_in_order() {
        let ctx = ctx(Vec::new());
        let u = unit(
            &ctx,
            &[],
            1000,
            body(|args: TestArgs| async move {
                args.invoke("artifact", serde_json::json!({"path": "a.png"})).await?;
                args.invoke("artifact", serde_json::json!({"path": "b.zip"})).await?;
                Ok::<(), TestError>(())
            }),
        );
        let exec = execute_unit(&u, 0, &mut WorkerScope::new(), &ctx).await;
        let names: Vec<&str> = exec.result.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.zip"]);
    }
}
