//! Test discovery: walk the test directory for suite files, merge them with
//! programmatically registered suites, validate fixtures and apply
//! launch-time filters.

pub mod filter;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::Pattern;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::config::error::{ConfigError, ConfigErrorKind};
use crate::fixture::FixtureGraph;
use crate::suite::fixture::FixtureSpec;
use crate::suite::script::load_suite;
use crate::suite::{Suite, TestCase, TestId};

pub use filter::{Filters, TagPredicate, parse_filter};

/// A suite file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteFile {
    pub path: PathBuf,
    /// Path relative to the test directory, `/`-separated. Used as the
    /// file part of every test id.
    pub relative: String,
}

/// The outcome of discovery: ordered tests and the run's fixture table.
#[derive(Debug, Clone)]
pub struct DiscoveredSuite {
    pub tests: Vec<Arc<TestCase>>,
    pub fixtures: Arc<Vec<FixtureSpec>>,
    pub warnings: Vec<String>,
}

/// Builds the run's test list from the test directory and registered suites.
pub struct Discoverer {
    test_root: PathBuf,
    test_match: Vec<String>,
    forbid_only: bool,
    suites: Vec<Suite>,
    scan_files: bool,
}

impl Discoverer {
    pub fn new(config: &Config) -> Self {
        Self {
            test_root: config.test_root(),
            test_match: config.test_match.clone(),
            forbid_only: config.forbid_only,
            suites: Vec::new(),
            scan_files: true,
        }
    }

    /// Register a programmatic suite. Registered suites come before suite
    /// files in discovery order.
    pub fn with_suite(mut self, suite: Suite) -> Self {
        self.suites.push(suite);
        self
    }

    /// Do not walk the test directory; use registered suites only.
    pub fn without_files(mut self) -> Self {
        self.scan_files = false;
        self
    }

    /// Discover, validate and filter tests.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]: bad glob, unreadable or malformed suite file,
    /// fixture graph problems, or `only` under `forbidOnly`.
    pub fn discover(&self, filters: &Filters) -> Result<DiscoveredSuite, ConfigError> {
        let loaded = if self.scan_files {
            let files = discover_files(&self.test_root, &self.test_match)?;
            info!(count = files.len(), dir = %self.test_root.display(), "found suite files");
            files
                .iter()
                .map(|f| load_suite(&f.path, &f.relative))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };
        let suites: Vec<&Suite> = self.suites.iter().chain(loaded.iter()).collect();

        let mut fixtures: Vec<FixtureSpec> = Vec::new();
        let mut owners = Vec::new();
        for (owner, suite) in suites.iter().enumerate() {
            fixtures.extend(suite.fixtures.iter().cloned());
            owners.resize(fixtures.len(), owner);
        }
        let graph = FixtureGraph::build_owned(&fixtures, &owners)?;

        let mut tests = Vec::new();
        let mut warnings = Vec::new();
        let mut seen: HashSet<TestId> = HashSet::new();
        let mut only_marked = Vec::new();

        for (owner, suite) in suites.iter().enumerate() {
            for def in &suite.tests {
                let id = TestId::new(suite.file.clone(), def.titles.clone());
                let fixture_plan = graph.plan_in(owner, &def.fixtures).map_err(|e| {
                    ConfigError::new(e.kind, format!("{id}: {}", e.message))
                })?;

                if !seen.insert(id.clone()) {
                    let warning = format!("duplicate test title: {id}");
                    warn!("{warning}");
                    warnings.push(warning);
                }
                if def.only {
                    only_marked.push(id.to_string());
                }

                if !filters.matches(&id, &def.tags) {
                    continue;
                }
                tests.push(Arc::new(TestCase {
                    id,
                    tags: def.tags.clone(),
                    fixtures: def.fixtures.clone(),
                    body: Arc::clone(&def.body),
                    timeout: def.timeout,
                    retries: def.retries,
                    skip: def.skip,
                    only: def.only,
                    fixture_plan,
                }));
            }
        }

        if !only_marked.is_empty() {
            if self.forbid_only {
                return Err(ConfigError::new(
                    ConfigErrorKind::OnlyForbidden,
                    format!("{} test(s) marked only while forbidOnly is set", only_marked.len()),
                )
                .with_detail(only_marked.join("\n")));
            }
            tests.retain(|t| t.only);
            debug!(count = tests.len(), "restricted run to only-marked tests");
        }

        info!(tests = tests.len(), fixtures = fixtures.len(), "discovery complete");
        Ok(DiscoveredSuite {
            tests,
            fixtures: Arc::new(fixtures),
            warnings,
        })
    }
}

/// Find suite files under `test_dir` whose relative path matches any of
/// `patterns`, in path order. Hidden directories are skipped.
///
/// # Errors
///
/// `InvalidGlob` for a bad pattern, `UnreadableFile` if the directory cannot
/// be walked.
pub fn discover_files(test_dir: &Path, patterns: &[String]) -> Result<Vec<SuiteFile>, ConfigError> {
    let compiled = patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| {
                ConfigError::new(ConfigErrorKind::InvalidGlob, format!("invalid testMatch \"{p}\""))
                    .with_detail(e.to_string())
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if !test_dir.is_dir() {
        return Err(ConfigError::new(
            ConfigErrorKind::UnreadableFile,
            format!("test directory {} does not exist", test_dir.display()),
        ));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(test_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
    for entry in walker {
        let entry = entry.map_err(|e| {
            ConfigError::new(
                ConfigErrorKind::UnreadableFile,
                format!("cannot walk {}", test_dir.display()),
            )
            .with_detail(e.to_string())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(test_dir) else {
            continue;
        };
        let relative = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if compiled.iter().any(|p| p.matches(&relative)) {
            files.push(SuiteFile {
                path: entry.path().to_path_buf(),
                relative,
            });
        }
    }
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}
