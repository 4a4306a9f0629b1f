use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::driver::DriverOptions;

/// A named configuration variant multiplied against every test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectConfig {
    pub name: String,
    /// Milliseconds.
    #[serde(with = "super::millis_opt", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Run only tests carrying any of these tags.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include_tags: Vec<String>,
    /// Never run tests carrying any of these tags.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_tags: Vec<String>,
    /// Run only tests whose full title matches this regex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grep: Option<String>,
    /// Opaque driver options.
    #[serde(rename = "use", skip_serializing_if = "DriverOptions::is_empty")]
    pub options: DriverOptions,
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}
