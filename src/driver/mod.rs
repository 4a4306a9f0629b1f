//! The automation driver interface consumed by tests and fixtures.
//!
//! The core never inspects a driver. It hands the driver to test bodies and
//! fixture hooks, forwards each project's opaque `use` options on every
//! call, and records the artifacts the driver returns.

pub mod dry_run;
pub mod registry;
pub mod shell;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::runner::result::TestError;

/// Opaque per-project driver options (`use` block in the config).
pub type DriverOptions = Map<String, Value>;

/// Capability object passed into every test body and fixture.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Registry name (e.g. "shell").
    fn name(&self) -> &str;

    /// Perform a driver action such as "navigate", "request" or "exec".
    ///
    /// # Errors
    ///
    /// Returns a [`TestError`] when the action fails. Failed expectations
    /// should use `TestErrorKind::AssertionFailed`, infrastructure problems
    /// `TestErrorKind::DriverError`.
    async fn invoke(
        &self,
        action: &str,
        args: &Value,
        options: &DriverOptions,
    ) -> Result<DriverReply, TestError>;
}

/// What a driver call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverReply {
    pub value: Value,
    pub artifacts: Vec<Artifact>,
}

impl DriverReply {
    pub fn value(value: Value) -> Self {
        Self {
            value,
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

/// A reference to something a test captured: screenshot, trace, log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}
