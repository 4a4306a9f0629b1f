//! Project matrix expansion: one RunUnit per (test × project) pair, with
//! project-scoped overrides resolved once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::config::error::{ConfigError, ConfigErrorKind};
use crate::config::{Config, ProjectConfig};
use crate::discovery::filter::{TagPredicate, compile_grep};
use crate::driver::DriverOptions;
use crate::suite::{TestCase, TestId};

/// Name of the implicit project used when none is configured.
pub const DEFAULT_PROJECT: &str = "default";

/// Identity of a unit across attempts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UnitKey {
    pub test: TestId,
    pub project: String,
}

impl std::fmt::Display for UnitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.project, self.test)
    }
}

/// A project with its effective settings.
#[derive(Debug, Clone)]
pub struct ResolvedProject {
    pub name: String,
    pub timeout: Duration,
    pub retries: u32,
    pub options: Arc<DriverOptions>,
    pub predicate: Option<TagPredicate>,
    pub grep: Option<Regex>,
}

impl ResolvedProject {
    /// Resolve a project's overrides against the global config.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter` if the project's grep is not a valid regex.
    pub fn resolve(project: &ProjectConfig, config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            name: project.name.clone(),
            timeout: project.timeout.unwrap_or(config.timeout),
            retries: project.retries.unwrap_or(config.retries),
            options: Arc::new(project.options.clone()),
            predicate: TagPredicate::from_lists(&project.include_tags, &project.exclude_tags),
            grep: project.grep.as_deref().map(compile_grep).transpose()?,
        })
    }

    /// Whether a test belongs to this project's subset.
    pub fn accepts(&self, test: &TestCase) -> bool {
        self.predicate.as_ref().is_none_or(|p| p.matches(&test.tags))
            && self
                .grep
                .as_ref()
                .is_none_or(|g| g.is_match(&test.id.to_string()))
    }
}

/// One schedulable (test, project, attempt) triple.
#[derive(Debug, Clone)]
pub struct RunUnit {
    pub test: Arc<TestCase>,
    pub project: Arc<ResolvedProject>,
    pub attempt: u32,
}

impl RunUnit {
    pub fn key(&self) -> UnitKey {
        UnitKey {
            test: self.test.id.clone(),
            project: self.project.name.clone(),
        }
    }

    /// Test override, else project setting.
    pub fn timeout(&self) -> Duration {
        self.test.timeout.unwrap_or(self.project.timeout)
    }

    /// Test override, else project setting.
    pub fn max_retries(&self) -> u32 {
        self.test.retries.unwrap_or(self.project.retries)
    }

    /// Whether a failed attempt may be retried.
    pub fn can_retry(&self) -> bool {
        self.attempt <= self.max_retries()
    }

    /// The same unit as the following attempt.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Resolve the configured projects, or the implicit default project.
///
/// # Errors
///
/// - `DuplicateProject` if two projects share a name
/// - `InvalidFilter` for a bad project grep
pub fn resolve_projects(config: &Config) -> Result<Vec<Arc<ResolvedProject>>, ConfigError> {
    if config.projects.is_empty() {
        let default = ProjectConfig::new(DEFAULT_PROJECT);
        return Ok(vec![Arc::new(ResolvedProject::resolve(&default, config)?)]);
    }

    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(config.projects.len());
    for project in &config.projects {
        if !seen.insert(project.name.as_str()) {
            return Err(ConfigError::new(
                ConfigErrorKind::DuplicateProject,
                format!("project \"{}\" is declared more than once", project.name),
            ));
        }
        resolved.push(Arc::new(ResolvedProject::resolve(project, config)?));
    }
    Ok(resolved)
}

/// Keep only the projects named in `names`, in configuration order. An
/// empty `names` keeps all of them.
///
/// # Errors
///
/// Returns `UnknownProject` for a name that matches no project.
pub fn select_projects(
    projects: Vec<Arc<ResolvedProject>>,
    names: &[String],
) -> Result<Vec<Arc<ResolvedProject>>, ConfigError> {
    if names.is_empty() {
        return Ok(projects);
    }
    for name in names {
        if !projects.iter().any(|p| &p.name == name) {
            let available: Vec<&str> = projects.iter().map(|p| p.name.as_str()).collect();
            return Err(ConfigError::new(
                ConfigErrorKind::UnknownProject,
                format!("project \"{name}\" not found"),
            )
            .with_detail(format!("available projects: {}", available.join(", "))));
        }
    }
    Ok(projects
        .into_iter()
        .filter(|p| names.contains(&p.name))
        .collect())
}

/// Cross-multiply tests and projects, project-major. Tests a project does
/// not accept produce no unit for it.
pub fn expand(tests: &[Arc<TestCase>], projects: &[Arc<ResolvedProject>]) -> Vec<RunUnit> {
    projects
        .iter()
        .flat_map(|project| {
            tests
                .iter()
                .filter(move |test| project.accepts(test))
                .map(move |test| RunUnit {
                    test: Arc::clone(test),
                    project: Arc::clone(project),
                    attempt: 1,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::result::TestError;
    use crate::suite::{TagSet, TestArgs, body};

    fn case(title: &str, tags: &[&str]) -> Arc<TestCase> {
        Arc::new(TestCase {
            id: TestId::new("shop.spec", [title]),
            tags: tags.iter().collect::<TagSet>(),
            fixtures: Vec::new(),
            body: Arc::new(body(|_args: TestArgs| async { Ok::<(), TestError>(()) })),
            timeout: None,
            retries: None,
            skip: false,
            only: false,
            fixture_plan: Vec::new(),
        })
    }

    fn config_with(projects: Vec<ProjectConfig>) -> Config {
        Config {
            projects,
            ..Config::default()
        }
    }

    #[test]
    fn no_projects_uses_default() {
        let projects = resolve_projects(&Config::default()).unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, DEFAULT_PROJECT);
    }

    #[test]
    fn expand_is_project_major() {
        let config = config_with(vec![ProjectConfig::new("chromium"), ProjectConfig::new("firefox")]);
        let projects = resolve_projects(&config).unwrap();
        let tests = vec![case("a", &[]), case("b", &[]), case("c", &[])];
        let units = expand(&tests, &projects);

        assert_eq!(units.len(), 6);
        let order: Vec<(String, String)> = units
            .iter()
            .map(|u| (u.project.name.clone(), u.test.id.titles[0].clone()))
            .collect();
        assert_eq!(order[0], ("chromium".to_owned(), "a".to_owned()));
        assert_eq!(order[2], ("chromium".to_owned(), "c".to_owned()));
        assert_eq!(order[3], ("firefox".to_owned(), "a".to_owned()));
        assert!(units.iter().all(|u| u.attempt == 1));
    }

    #[test]
    fn tag_predicate_excludes_without_skipped_units() {
        let smoke = ProjectConfig {
            include_tags: vec!["smoke".into()],
            ..ProjectConfig::new("smoke")
        };
        let config = config_with(vec![smoke, ProjectConfig::new("full")]);
        let projects = resolve_projects(&config).unwrap();
        let tests = vec![case("a", &["smoke"]), case("b", &[]), case("c", &["@smoke"])];
        let units = expand(&tests, &projects);
        // 2 for the smoke project + 3 for the full project.
        assert_eq!(units.len(), 5);
    }

    #[test]
    fn project_grep_filters_titles() {
        let project = ProjectConfig {
            grep: Some("checkout".into()),
            ..ProjectConfig::new("pay")
        };
        let projects = resolve_projects(&config_with(vec![project])).unwrap();
        let units = expand(&[case("checkout works", &[]), case("login", &[])], &projects);
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn duplicate_project_is_config_error() {
        let config = config_with(vec![ProjectConfig::new("api"), ProjectConfig::new("api")]);
        let err = resolve_projects(&config).unwrap_err();
        assert_eq!(err.kind, ConfigErrorKind::DuplicateProject);
    }

    #[test]
    fn select_unknown_project_is_config_error() {
        let projects = resolve_projects(&config_with(vec![ProjectConfig::new("chromium")])).unwrap();
        let err = select_projects(projects, &["webkit".into()]).unwrap_err();
        assert_eq!(err.kind, ConfigErrorKind::UnknownProject);
        assert!(err.detail.unwrap().contains("chromium"));
    }

    #[test]
    fn select_keeps_config_order() {
        let config = config_with(vec![
            ProjectConfig::new("a"),
            ProjectConfig::new("b"),
            ProjectConfig::new("c"),
        ]);
        let projects = resolve_projects(&config).unwrap();
        let selected = select_projects(projects, &["c".into(), "a".into()]).unwrap();
        let names: Vec<&str> = selected.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn overrides_resolve_test_then_project_then_config() {
        let config = Config {
            timeout: Duration::from_secs(30),
            retries: 1,
            projects: vec![ProjectConfig {
                timeout: Some(Duration::from_secs(10)),
                retries: Some(2),
                ..ProjectConfig::new("slow")
            }],
            ..Config::default()
        };
        let projects = resolve_projects(&config).unwrap();
        let mut test = (*case("t", &[])).clone();
        let unit = RunUnit {
            test: Arc::new(test.clone()),
            project: Arc::clone(&projects[0]),
            attempt: 1,
        };
        assert_eq!(unit.timeout(), Duration::from_secs(10));
        assert_eq!(unit.max_retries(), 2);

        test.timeout = Some(Duration::from_millis(500));
        test.retries = Some(0);
        let unit = RunUnit {
            test: Arc::new(test),
            ..unit
        };
        assert_eq!(unit.timeout(), Duration::from_millis(500));
        assert_eq!(unit.max_retries(), 0);
        assert!(!unit.can_retry());
    }

    #[test]
    fn next_attempt_keeps_identity() {
        let projects = resolve_projects(&Config {
            retries: 1,
            ..Config::default()
        })
        .unwrap();
        let unit = expand(&[case("t", &[])], &projects).remove(0);
        assert!(unit.can_retry());
        let next = unit.next_attempt();
        assert_eq!(next.attempt, 2);
        assert_eq!(next.key(), unit.key());
        assert!(!next.can_retry());
    }
}
