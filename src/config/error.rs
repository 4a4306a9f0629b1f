use std::fmt;

/// A fatal configuration problem detected before any test runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl ConfigError {
    pub fn new(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Classification of configuration errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// A `testMatch` pattern is not a valid glob.
    InvalidGlob,
    /// A config or suite file could not be read.
    UnreadableFile,
    /// A config or suite file could not be parsed.
    MalformedFile,
    /// Fixture dependencies form a cycle.
    FixtureCycle,
    /// A test or fixture requests a fixture that is not declared.
    UnresolvedFixture,
    /// Two fixtures share a name.
    DuplicateFixture,
    /// A fixture depends on a fixture with a narrower scope.
    ScopeViolation,
    /// A test is marked `only` while `forbidOnly` is set.
    OnlyForbidden,
    /// `--project` names a project that is not configured.
    UnknownProject,
    /// Two projects share a name.
    DuplicateProject,
    /// A tag expression or grep pattern is invalid.
    InvalidFilter,
    /// The configured driver is not registered.
    UnknownDriver,
    /// A reporter name is not recognized.
    UnknownReporter,
}

impl fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidGlob => write!(f, "invalid glob"),
            Self::UnreadableFile => write!(f, "unreadable file"),
            Self::MalformedFile => write!(f, "malformed file"),
            Self::FixtureCycle => write!(f, "fixture cycle"),
            Self::UnresolvedFixture => write!(f, "unresolved fixture"),
            Self::DuplicateFixture => write!(f, "duplicate fixture"),
            Self::ScopeViolation => write!(f, "fixture scope violation"),
            Self::OnlyForbidden => write!(f, "only forbidden"),
            Self::UnknownProject => write!(f, "unknown project"),
            Self::DuplicateProject => write!(f, "duplicate project"),
            Self::InvalidFilter => write!(f, "invalid filter"),
            Self::UnknownDriver => write!(f, "unknown driver"),
            Self::UnknownReporter => write!(f, "unknown reporter"),
        }
    }
}
