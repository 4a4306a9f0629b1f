use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::driver::Driver;
use crate::fixture::SuiteScope;
use crate::matrix::RunUnit;
use crate::report::{Aggregator, EventBus, ReportEvent, RunSummary};
use crate::runner::cancel::CancelFlag;
use crate::runner::queue::{Batch, WorkQueue};
use crate::runner::worker::{WorkerContext, WorkerEvent, run_worker};
use crate::suite::fixture::FixtureSpec;

/// Scheduling knobs resolved from the configuration.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub workers: usize,
    pub fully_parallel: bool,
    pub max_failures: Option<usize>,
    pub teardown_grace: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.execution_worker_count(),
            fully_parallel: config.fully_parallel,
            max_failures: config.max_failures.filter(|&n| n > 0),
            teardown_grace: config.teardown_grace,
        }
    }
}

/// Everything a run needs: expanded units and the run-wide fixture table
/// their plans index into.
#[derive(Debug, Default)]
pub struct RunPlan {
    pub units: Vec<RunUnit>,
    pub fixtures: Arc<Vec<FixtureSpec>>,
    pub warnings: Vec<String>,
}

/// Result of [`Scheduler::run`].
#[derive(Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
    /// The run was cancelled before the queue drained.
    pub cancelled: bool,
}

/// Dispatches RunUnits onto a fixed pool of workers.
pub struct Scheduler {
    settings: SchedulerSettings,
    driver: Arc<dyn Driver>,
    cancel: CancelFlag,
}

impl Scheduler {
    pub fn new(config: &Config, driver: Arc<dyn Driver>) -> Self {
        Self::with_settings(SchedulerSettings::from_config(config), driver)
    }

    pub fn with_settings(settings: SchedulerSettings, driver: Arc<dyn Driver>) -> Self {
        Self {
            settings,
            driver,
            cancel: CancelFlag::new(),
        }
    }

    /// Flag that stops dispatch when set. In-flight units finish.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run every unit in `plan`, reporting to `bus`, and return the
    /// aggregated summary once all workers have retired and suite fixtures
    /// are torn down.
    pub async fn run(&self, plan: RunPlan, bus: &mut EventBus) -> RunOutcome {
        let RunPlan {
            units,
            fixtures,
            warnings,
        } = plan;
        let total_units = units.len();
        let mut aggregator = Aggregator::new(units.iter().map(RunUnit::key));
        aggregator.add_warnings(warnings);

        let mut projects: Vec<String> = Vec::new();
        for unit in &units {
            if !projects.contains(&unit.project.name) {
                projects.push(unit.project.name.clone());
            }
        }

        let batches = batch_units(units, self.settings.fully_parallel);
        let worker_count = self.settings.workers.min(batches.len());
        info!(units = total_units, workers = worker_count, "run started");
        bus.emit(&ReportEvent::RunStarted {
            total_units,
            workers: worker_count,
            projects,
        });

        let (events, mut rx) = mpsc::unbounded_channel();
        let suite_scope = Arc::new(SuiteScope::new());
        let ctx = Arc::new(WorkerContext {
            queue: Arc::new(WorkQueue::new(batches)),
            cancel: self.cancel.clone(),
            fixtures: Arc::clone(&fixtures),
            suite_scope: Arc::clone(&suite_scope),
            driver: Arc::clone(&self.driver),
            teardown_grace: self.settings.teardown_grace,
            max_failures: self.settings.max_failures,
            failures: AtomicUsize::new(0),
            events,
        });

        let mut set = JoinSet::new();
        let mut next_index = 0;
        for _ in 0..worker_count {
            set.spawn(run_worker(next_index, Arc::clone(&ctx)));
            next_index += 1;
        }

        while !set.is_empty() {
            tokio::select! {
                biased;
                Some(event) = rx.recv() => Self::handle(event, &mut aggregator, bus),
                Some(joined) = set.join_next() => match joined {
                    Ok(exit) => {
                        aggregator.add_diagnostics(exit.errors);
                        if exit.crashed && ctx.queue.has_pending() && !self.cancel.is_cancelled() {
                            warn!(worker = exit.index, replacement = next_index, "replacing crashed worker");
                            set.spawn(run_worker(next_index, Arc::clone(&ctx)));
                            next_index += 1;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "worker task failed");
                        ctx.queue.close();
                        self.cancel.cancel();
                    }
                },
                else => break,
            }
        }
        while let Ok(event) = rx.try_recv() {
            Self::handle(event, &mut aggregator, bus);
        }

        if tokio::time::timeout(self.settings.teardown_grace, suite_scope.teardown(&fixtures))
            .await
            .is_err()
        {
            suite_scope.abandon(&fixtures).await;
        }
        aggregator.add_diagnostics(suite_scope.take_errors().await);

        let cancelled = self.cancel.is_cancelled();
        let summary = aggregator.summary();
        info!(
            verdict = %summary.verdict,
            passed = summary.counts.passed,
            failed = summary.counts.failed + summary.counts.timed_out,
            not_run = summary.counts.not_run,
            "run finished"
        );
        bus.emit(&ReportEvent::RunFinished {
            summary: summary.clone(),
        });
        RunOutcome { summary, cancelled }
    }

    fn handle(event: WorkerEvent, aggregator: &mut Aggregator, bus: &mut EventBus) {
        match event {
            WorkerEvent::Started {
                key,
                attempt,
                worker,
            } => {
                debug!(unit = %key, attempt, worker, "unit dispatched");
                bus.emit(&ReportEvent::UnitStarted {
                    key,
                    attempt,
                    worker,
                });
            }
            WorkerEvent::Finished(result) => {
                aggregator.record(result.clone());
                bus.emit(&ReportEvent::UnitFinished { result });
            }
        }
    }
}

/// Group units into batches. Without `fully_parallel`, units sharing a
/// suite file and project form one batch in their original order.
pub fn batch_units(units: Vec<RunUnit>, fully_parallel: bool) -> Vec<Batch> {
    if fully_parallel {
        return units.into_iter().map(|u| vec![u]).collect();
    }
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut batches: Vec<Batch> = Vec::new();
    for unit in units {
        let group = (unit.test.id.file.clone(), unit.project.name.clone());
        match index.get(&group) {
            Some(&i) => batches[i].push(unit),
            None => {
                index.insert(group, batches.len());
                batches.push(vec![unit]);
            }
        }
    }
    batches
}
