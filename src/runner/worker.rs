use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::driver::Driver;
use crate::fixture::{SuiteScope, WorkerScope};
use crate::matrix::UnitKey;
use crate::runner::cancel::CancelFlag;
use crate::runner::governor::execute_unit;
use crate::runner::queue::WorkQueue;
use crate::runner::result::{RunResult, TestError};
use crate::suite::fixture::FixtureSpec;

/// State shared by every worker of one run.
pub struct WorkerContext {
    pub queue: Arc<WorkQueue>,
    pub cancel: CancelFlag,
    pub fixtures: Arc<Vec<FixtureSpec>>,
    pub suite_scope: Arc<SuiteScope>,
    pub driver: Arc<dyn Driver>,
    pub teardown_grace: Duration,
    /// Cancel the run once this many units have failed for good.
    pub max_failures: Option<usize>,
    pub failures: AtomicUsize,
    pub events: UnboundedSender<WorkerEvent>,
}

impl WorkerContext {
    fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(max) = self.max_failures
            && failures >= max
            && !self.cancel.is_cancelled()
        {
            info!(max_failures = max, "failure limit reached, cancelling run");
            self.cancel.cancel();
        }
    }
}

/// Progress a worker reports back to the scheduler.
#[derive(Debug)]
pub enum WorkerEvent {
    Started {
        key: UnitKey,
        attempt: u32,
        worker: usize,
    },
    Finished(RunResult),
}

/// How a worker ended.
#[derive(Debug)]
pub struct WorkerExit {
    pub index: usize,
    /// The worker retired after a crash; unstarted units went back to the queue.
    pub crashed: bool,
    /// Worker-scoped teardown failures.
    pub errors: Vec<TestError>,
}

/// Pull batches until the queue is drained or the run is cancelled, then
/// tear down this worker's fixtures.
pub async fn run_worker(index: usize, ctx: Arc<WorkerContext>) -> WorkerExit {
    debug!(worker = index, "worker started");
    let mut scope = WorkerScope::new();
    let mut crashed = false;

    while let Some(batch) = ctx.queue.next(&ctx.cancel).await {
        let mut units = batch.into_iter();
        while let Some(unit) = units.next() {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let _ = ctx.events.send(WorkerEvent::Started {
                key: unit.key(),
                attempt: unit.attempt,
                worker: index,
            });
            let mut execution = execute_unit(&unit, index, &mut scope, &ctx).await;

            if execution.result.outcome.is_failure()
                && unit.can_retry()
                && !ctx.cancel.is_cancelled()
            {
                debug!(unit = %unit.key(), attempt = unit.attempt, "scheduling retry");
                execution.result.will_retry = true;
                ctx.queue.push_back(vec![unit.next_attempt()]);
            } else if execution.result.outcome.is_failure() {
                ctx.record_failure();
            }
            let _ = ctx.events.send(WorkerEvent::Finished(execution.result));

            if execution.crashed {
                let rest: Vec<_> = units.by_ref().collect();
                if !rest.is_empty() {
                    ctx.queue.push_front(rest);
                }
                crashed = true;
                break;
            }
        }
        ctx.queue.finish();
        if crashed {
            warn!(worker = index, "worker retired after crash");
            break;
        }
    }

    if tokio::time::timeout(ctx.teardown_grace, scope.teardown(&ctx.fixtures))
        .await
        .is_err()
    {
        scope.abandon(&ctx.fixtures);
    }
    debug!(worker = index, "worker stopped");
    WorkerExit {
        index,
        crashed,
        errors: scope.take_errors(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::config::Config;
    use crate::driver::dry_run::DryRunDriver;
    use crate::matrix::{RunUnit, expand, resolve_projects};
    use crate::runner::result::Outcome;
    use crate::suite::fixture::{FixtureScope, FnFixture};
    use crate::suite::{TagSet, TestArgs, TestBody, TestCase, TestId, body};

    fn case(title: &str, retries: u32, b: impl TestBody + 'static, plan: Vec<usize>) -> Arc<TestCase> {
        Arc::new(TestCase {
            id: TestId::new("w.spec", [title]),
            tags: TagSet::new(),
            fixtures: Vec::new(),
            body: Arc::new(b),
            timeout: None,
            retries: Some(retries),
            skip: false,
            only: false,
            fixture_plan: plan,
        })
    }

    fn context(
        units: Vec<RunUnit>,
        fixtures: Vec<FixtureSpec>,
    ) -> (Arc<WorkerContext>, tokio::sync::mpsc::UnboundedReceiver<WorkerEvent>) {
        let (events, rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = WorkerContext {
            queue: Arc::new(WorkQueue::new([units])),
            cancel: CancelFlag::new(),
            fixtures: Arc::new(fixtures),
            suite_scope: Arc::new(SuiteScope::new()),
            driver: Arc::new(DryRunDriver),
            teardown_grace: Duration::from_millis(500),
            max_failures: None,
            failures: AtomicUsize::new(0),
            events,
        };
        (Arc::new(ctx), rx)
    }

    fn finished(rx: &mut tokio::sync::mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<RunResult> {
        let mut results = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let WorkerEvent::Finished(result) = event {
                results.push(result);
            }
        }
        results
    }

    #[tokio::test]
    async fn failed_unit_is_retried_until_it_passes() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let flaky = case(
            "flaky",
            2,
            body(move |_a: TestArgs| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(TestError::assertion("first attempt fails"))
                    } else {
                        Ok(())
                    }
                }
            }),
            Vec::new(),
        );
        let units = expand(&[flaky], &resolve_projects(&Config::default()).unwrap());
        let (ctx, mut rx) = context(units, Vec::new());
        let exit = run_worker(0, ctx).await;
        assert!(!exit.crashed);

        let results = finished(&mut rx);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].outcome, Outcome::Failed);
        assert!(results[0].will_retry);
        assert_eq!(results[1].attempt, 2);
        assert_eq!(results[1].outcome, Outcome::Passed);
        assert!(!results[1].will_retry);
    }

    #[tokio::test]
    async fn retries_stop_at_budget() {
        let always = case(
            "always fails",
            1,
            body(|_a: TestArgs| async { Err(TestError::assertion("nope")) }),
            Vec::new(),
        );
        let units = expand(&[always], &resolve_projects(&Config::default()).unwrap());
        let (ctx, mut rx) = context(units, Vec::new());
        run_worker(0, ctx).await;
        let attempts: Vec<(u32, bool)> = finished(&mut rx)
            .iter()
            .map(|r| (r.attempt, r.will_retry))
            .collect();
        assert_eq!(attempts, vec![(1, true), (2, false)]);
    }

    #[tokio::test]
    async fn crash_returns_rest_of_batch_to_queue() {
        let crash = case(
            "crash",
            0,
            body(|args: TestArgs| async move {
                if args.info.attempt > 0 {
                    panic!("driver state corrupted");
                }
                Ok::<(), TestError>(())
            }),
            Vec::new(),
        );
        let after = case("after", 0, body(|_a: TestArgs| async { Ok::<(), TestError>(()) }), Vec::new());
        let units = expand(&[crash, after], &resolve_projects(&Config::default()).unwrap());
        let (ctx, mut rx) = context(units, Vec::new());
        let exit = run_worker(0, Arc::clone(&ctx)).await;
        assert!(exit.crashed);
        assert_eq!(finished(&mut rx).len(), 1);
        assert_eq!(ctx.queue.pending_units(), 1);
    }

    #[tokio::test]
    async fn worker_fixture_is_set_up_once_and_torn_down_on_exit() {
        let setups = Arc::new(AtomicU32::new(0));
        let teardowns = Arc::new(AtomicU32::new(0));
        let (s, t) = (Arc::clone(&setups), Arc::clone(&teardowns));
        let browser = FixtureSpec::new(
            "browser",
            FixtureScope::Worker,
            FnFixture::new(move |_args| {
                s.fetch_add(1, Ordering::SeqCst);
                async { Ok("chromium".to_owned()) }
            })
            .with_teardown(move |_v, _a| {
                t.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }),
        );
        let uses = |title: &str| {
            case(
                title,
                0,
                body(|args: TestArgs| async move {
                    let name = args.fixture::<String>("browser")?;
                    assert_eq!(name.as_str(), "chromium");
                    Ok::<(), TestError>(())
                }),
                vec![0],
            )
        };
        let units = expand(
            &[uses("a"), uses("b"), uses("c")],
            &resolve_projects(&Config::default()).unwrap(),
        );
        let (ctx, mut rx) = context(units, vec![browser]);
        let exit = run_worker(0, ctx).await;
        assert!(exit.errors.is_empty());
        assert!(finished(&mut rx).iter().all(|r| r.outcome == Outcome::Passed));
        assert_eq!(setups.load(Ordering::SeqCst), 1);
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn crashed_worker_tears_down_its_fixtures_and_replacement_sets_up_again() {
        let setups = Arc::new(AtomicU32::new(0));
        let teardowns = Arc::new(AtomicU32::new(0));
        let (s, t) = (Arc::clone(&setups), Arc::clone(&teardowns));
        let browser = FixtureSpec::new(
            "browser",
            FixtureScope::Worker,
            FnFixture::new(move |_args| {
                s.fetch_add(1, Ordering::SeqCst);
                async { Ok("chromium".to_owned()) }
            })
            .with_teardown(move |_v, _a| {
                t.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }),
        );
        let crash = case(
            "crash",
            0,
            body(|args: TestArgs| async move {
                if args.info.attempt > 0 {
                    panic!("driver state corrupted");
                }
                Ok::<(), TestError>(())
            }),
            vec![0],
        );
        let after = case(
            "after",
            0,
            body(|args: TestArgs| async move {
                args.fixture::<String>("browser")?;
                Ok::<(), TestError>(())
            }),
            vec![0],
        );
        let units = expand(&[crash, after], &resolve_projects(&Config::default()).unwrap());
        let (ctx, mut rx) = context(units, vec![browser]);

        let first = run_worker(0, Arc::clone(&ctx)).await;
        assert!(first.crashed);
        assert!(first.errors.is_empty());
        assert_eq!(setups.load(Ordering::SeqCst), 1);
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.queue.pending_units(), 1);

        let replacement = run_worker(1, Arc::clone(&ctx)).await;
        assert!(!replacement.crashed);
        assert_eq!(setups.load(Ordering::SeqCst), 2);
        assert_eq!(teardowns.load(Ordering::SeqCst), 2);

        let results = finished(&mut rx);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].outcome, Outcome::Failed);
        assert_eq!(results[1].outcome, Outcome::Passed);
        assert_eq!(results[1].worker, 1);
    }

    #[tokio::test]
    async fn cancelled_worker_runs_nothing() {
        let units = expand(
            &[case("a", 0, body(|_a: TestArgs| async { Ok::<(), TestError>(()) }), Vec::new())],
            &resolve_projects(&Config::default()).unwrap(),
        );
        let (ctx, mut rx) = context(units, Vec::new());
        ctx.cancel.cancel();
        run_worker(0, ctx).await;
        assert!(finished(&mut rx).is_empty());
    }
}
