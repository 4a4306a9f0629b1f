//! Execution: the work queue, worker pool, timeout governor and scheduler.

pub mod cancel;
pub mod governor;
pub mod queue;
pub mod result;
pub mod scheduler;
pub mod worker;

pub use cancel::CancelFlag;
pub use result::{Outcome, RunResult, TestError, TestErrorKind};
pub use scheduler::{RunOutcome, RunPlan, Scheduler, SchedulerSettings};

use crate::config::Config;
use crate::config::error::ConfigError;
use crate::discovery::{Discoverer, Filters};
use crate::matrix::{expand, resolve_projects, select_projects};

/// Discover, filter and expand the selected tests into a [`RunPlan`].
///
/// # Errors
///
/// Any discovery or project-selection [`ConfigError`].
pub fn plan_run(
    config: &Config,
    discoverer: &Discoverer,
    filters: &Filters,
    projects: &[String],
) -> Result<RunPlan, ConfigError> {
    let projects = select_projects(resolve_projects(config)?, projects)?;
    let discovered = discoverer.discover(filters)?;
    Ok(RunPlan {
        units: expand(&discovered.tests, &projects),
        fixtures: discovered.fixtures,
        warnings: discovered.warnings,
    })
}
