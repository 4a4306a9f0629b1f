use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::error::{ConfigError, ConfigErrorKind};
use crate::config::{Config, SinkSpec};
use crate::discovery::{Discoverer, Filters};
use crate::driver::Driver;
use crate::driver::registry::DriverRegistry;
use crate::report::{EventBus, SuiteVerdict, build_sinks};
use crate::runner::{Scheduler, plan_run};

/// Test selection shared by `run` and `list`.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub config: Option<PathBuf>,
    pub projects: Vec<String>,
    pub grep: Option<String>,
    pub tag: Option<String>,
    /// Only suite files whose path contains one of these.
    pub files: Vec<String>,
}

impl Selection {
    fn filters(&self) -> Result<Filters, ConfigError> {
        Filters::parse(&self.files, self.grep.as_deref(), self.tag.as_deref())
    }
}

/// Options for the `run` command. Set values override the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub selection: Selection,
    pub workers: Option<usize>,
    pub retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub forbid_only: bool,
    pub max_failures: Option<usize>,
    pub reporters: Vec<SinkSpec>,
}

impl RunOptions {
    fn apply(&self, config: &mut Config) {
        if let Some(workers) = self.workers {
            config.workers = Some(workers);
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(ms) = self.timeout_ms {
            config.timeout = Duration::from_millis(ms);
        }
        if self.forbid_only {
            config.forbid_only = true;
        }
        if let Some(max) = self.max_failures {
            config.max_failures = Some(max);
        }
        if !self.reporters.is_empty() {
            config.reporter = self.reporters.clone();
        }
    }
}

/// Look up the configured driver.
///
/// # Errors
///
/// Returns `UnknownDriver` if no driver with that name is registered.
pub fn resolve_driver(registry: &DriverRegistry, name: &str) -> Result<Arc<dyn Driver>, ConfigError> {
    registry.get(name).ok_or_else(|| {
        ConfigError::new(
            ConfigErrorKind::UnknownDriver,
            format!("driver \"{name}\" not found"),
        )
        .with_detail(format!("available drivers: {}", registry.list().join(", ")))
    })
}

/// Run the `run` command: discover, expand and execute the selected tests,
/// reporting to the configured sinks.
///
/// Ctrl-C cancels the run; in-flight units finish before it returns.
///
/// # Errors
///
/// Returns a [`ConfigError`] for any problem detected before the first unit
/// is dispatched.
pub async fn run_run(options: RunOptions) -> Result<SuiteVerdict, ConfigError> {
    let mut config = Config::resolve(options.selection.config.as_deref())?;
    options.apply(&mut config);

    let driver = resolve_driver(&DriverRegistry::with_builtins(), &config.driver)?;
    let filters = options.selection.filters()?;
    let sinks = build_sinks(&config.reporter)?;
    let plan = plan_run(
        &config,
        &Discoverer::new(&config),
        &filters,
        &options.selection.projects,
    )?;

    let scheduler = Scheduler::new(&config, driver);
    let cancel = scheduler.cancel_flag();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, waiting for running tests to finish");
            cancel.cancel();
        }
    });

    let mut bus = EventBus::with_sinks(sinks);
    let outcome = scheduler.run(plan, &mut bus).await;
    interrupt.abort();
    Ok(outcome.summary.verdict)
}

/// Run the `list` command: print every unit that `run` would dispatch.
///
/// # Errors
///
/// Returns a [`ConfigError`] if loading, discovery or project selection
/// fails.
pub fn run_list(selection: &Selection) -> Result<String, ConfigError> {
    let config = Config::resolve(selection.config.as_deref())?;
    let plan = plan_run(
        &config,
        &Discoverer::new(&config),
        &selection.filters()?,
        &selection.projects,
    )?;

    let mut lines: Vec<String> = plan
        .units
        .iter()
        .map(|unit| {
            let mut line = unit.key().to_string();
            if unit.test.skip {
                line.push_str(" (skip)");
            }
            line
        })
        .collect();

    let mut files: Vec<&str> = plan.units.iter().map(|u| u.test.id.file.as_str()).collect();
    files.sort_unstable();
    files.dedup();
    lines.push(format!(
        "Total: {} units in {} file{}",
        plan.units.len(),
        files.len(),
        if files.len() == 1 { "" } else { "s" }
    ));
    for warning in &plan.warnings {
        lines.push(format!("warning: {warning}"));
    }

    Ok(lines.join("\n") + "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config() {
        let mut config = Config::default();
        let options = RunOptions {
            workers: Some(1),
            retries: Some(2),
            timeout_ms: Some(1500),
            forbid_only: true,
            max_failures: Some(3),
            reporters: vec![SinkSpec::new("json")],
            ..RunOptions::default()
        };
        options.apply(&mut config);
        assert_eq!(config.workers, Some(1));
        assert_eq!(config.retries, 2);
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert!(config.forbid_only);
        assert_eq!(config.max_failures, Some(3));
        assert_eq!(config.reporter, vec![SinkSpec::new("json")]);
    }

    #[test]
    fn unset_options_keep_config() {
        let mut config = Config {
            retries: 4,
            forbid_only: true,
            ..Config::default()
        };
        RunOptions::default().apply(&mut config);
        assert_eq!(config.retries, 4);
        assert!(config.forbid_only);
        assert_eq!(config.reporter, vec![SinkSpec::new("list")]);
    }

    #[test]
    fn unknown_driver_lists_available() {
        let err = resolve_driver(&DriverRegistry::with_builtins(), "playwright")
            .err()
            .unwrap();
        assert_eq!(err.kind, ConfigErrorKind::UnknownDriver);
        assert!(err.detail.unwrap().contains("dry-run"));
    }

    #[test]
    fn builtin_drivers_resolve() {
        let registry = DriverRegistry::with_builtins();
        assert_eq!(resolve_driver(&registry, "shell").unwrap().name(), "shell");
        assert_eq!(resolve_driver(&registry, "dry-run").unwrap().name(), "dry-run");
    }
}
