//! Run configuration: file loading, defaults and the reporter selection.

pub mod error;
pub mod project;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use error::{ConfigError, ConfigErrorKind};
pub use project::ProjectConfig;

/// File names searched for when no `--config` is given.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["drover.yaml", "drover.yml", "drover.json"];

/// Complete run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Directory the config was loaded from; relative paths resolve here.
    #[serde(skip)]
    pub root: PathBuf,
    pub test_dir: PathBuf,
    /// Globs matched against paths relative to `test_dir`.
    pub test_match: Vec<String>,
    /// Per-unit timeout in milliseconds.
    #[serde(with = "millis")]
    pub timeout: Duration,
    pub retries: u32,
    /// Worker count; defaults to the available parallelism.
    pub workers: Option<usize>,
    /// Schedule every unit independently instead of keeping a file's tests
    /// together on one worker.
    pub fully_parallel: bool,
    pub forbid_only: bool,
    /// Stop dispatching after this many final failures.
    pub max_failures: Option<usize>,
    /// Bound on teardown after a timeout, in milliseconds.
    #[serde(with = "millis")]
    pub teardown_grace: Duration,
    pub driver: String,
    pub projects: Vec<ProjectConfig>,
    pub reporter: Vec<SinkSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            test_dir: PathBuf::from("."),
            test_match: vec!["**/*.spec.yaml".to_owned(), "**/*.spec.yml".to_owned()],
            timeout: Duration::from_secs(30),
            retries: 0,
            workers: None,
            fully_parallel: false,
            forbid_only: false,
            max_failures: None,
            teardown_grace: Duration::from_secs(5),
            driver: "shell".to_owned(),
            projects: Vec::new(),
            reporter: vec![SinkSpec::new("list")],
        }
    }
}

impl Config {
    /// Load a YAML or JSON config file, chosen by extension.
    ///
    /// # Errors
    ///
    /// `UnreadableFile` if the file cannot be read, `MalformedFile` if it
    /// does not parse.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::new(
                ConfigErrorKind::UnreadableFile,
                format!("cannot read {}", path.display()),
            )
            .with_detail(e.to_string())
        })?;

        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let mut config = Self::parse(&source, is_json).map_err(|detail| {
            ConfigError::new(
                ConfigErrorKind::MalformedFile,
                format!("{} is not a valid config", path.display()),
            )
            .with_detail(detail)
        })?;
        config.root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    fn parse(source: &str, is_json: bool) -> Result<Self, String> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        if is_json {
            serde_json::from_str(source).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(source).map_err(|e| e.to_string())
        }
    }

    /// Find a default config file in `dir`.
    pub fn find(dir: &Path) -> Option<PathBuf> {
        DEFAULT_CONFIG_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.is_file())
    }

    /// Load `path`, or the default file in the working directory, or fall
    /// back to defaults.
    ///
    /// # Errors
    ///
    /// Propagates [`Config::load`] errors.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::find(Path::new(".")) {
                Some(found) => Self::load(&found),
                None => Ok(Self::default()),
            },
        }
    }

    /// `test_dir` resolved against the config's directory.
    pub fn test_root(&self) -> PathBuf {
        self.root.join(&self.test_dir)
    }

    /// Number of workers the scheduler starts.
    pub fn execution_worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, usize::from))
            .max(1)
    }
}

// ── Reporter selection ──────────────────────────────────────────────

/// A reporter name with an optional output file.
///
/// Accepts either a bare name or `{ name, output }` in config files, and
/// `name` or `name=path` on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SinkSpecRepr")]
pub struct SinkSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl SinkSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SinkSpecRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        output: Option<PathBuf>,
    },
}

impl From<SinkSpecRepr> for SinkSpec {
    fn from(repr: SinkSpecRepr) -> Self {
        match repr {
            SinkSpecRepr::Name(name) => Self::new(name),
            SinkSpecRepr::Full { name, output } => Self { name, output },
        }
    }
}

impl FromStr for SinkSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, output) = match s.split_once('=') {
            Some((name, output)) => (name.trim(), Some(output.trim())),
            None => (s.trim(), None),
        };
        if name.is_empty() {
            return Err("empty reporter name".to_owned());
        }
        let spec = Self::new(name);
        Ok(match output {
            Some(output) if !output.is_empty() => spec.with_output(output),
            _ => spec,
        })
    }
}

impl fmt::Display for SinkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.output {
            Some(output) => write!(f, "{}={}", self.name, output.display()),
            None => write!(f, "{}", self.name),
        }
    }
}

// ── Millisecond durations ───────────────────────────────────────────

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

pub(crate) mod millis_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => super::millis::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
