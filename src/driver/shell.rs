use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::driver::{Artifact, Driver, DriverOptions, DriverReply};
use crate::runner::result::{TestError, TestErrorKind};

/// Driver that runs shell commands.
///
/// Supports a single action, `exec`, with arguments:
/// - `command` (required): passed to `<shell> -c`
/// - `cwd`: working directory
/// - `env`: map of extra environment variables
/// - `artifact`: path of a file the command produces, reported on success
///
/// Project `use` options named `env` are merged under the call's own `env`.
/// The child is killed if the calling test is cancelled.
pub struct ShellDriver {
    /// Shell interpreter (default: "/bin/sh").
    pub shell: String,
}

impl ShellDriver {
    pub fn new() -> Self {
        Self {
            shell: "/bin/sh".to_owned(),
        }
    }
}

impl Default for ShellDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for ShellDriver {
    fn name(&self) -> &str {
        "shell"
    }

    async fn invoke(
        &self,
        action: &str,
        args: &Value,
        options: &DriverOptions,
    ) -> Result<DriverReply, TestError> {
        if action != "exec" {
            return Err(TestError::new(
                TestErrorKind::DriverError,
                format!("shell driver does not support action \"{action}\""),
            ));
        }

        let command = args.get("command").and_then(Value::as_str).ok_or_else(|| {
            TestError::new(
                TestErrorKind::DriverError,
                "exec requires a string \"command\" argument",
            )
        })?;

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = args.get("cwd").and_then(Value::as_str) {
            cmd.current_dir(cwd);
        }
        for env in [options.get("env"), args.get("env")].into_iter().flatten() {
            if let Some(vars) = env.as_object() {
                for (key, value) in vars {
                    cmd.env(key, value_to_env(value));
                }
            }
        }

        debug!(command, "spawning shell command");
        let output = cmd.output().await.map_err(|e| {
            TestError::new(
                TestErrorKind::DriverError,
                format!("failed to run \"{command}\": {e}"),
            )
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_owned();
        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_owned(), |c| c.to_string());
            let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_owned();
            return Err(TestError::new(
                TestErrorKind::AssertionFailed,
                format!("command exited with code {code}: {command}"),
            )
            .with_detail_opt((!stderr.is_empty()).then_some(stderr)));
        }

        let mut reply = DriverReply::value(Value::String(stdout));
        if let Some(path) = args.get("artifact").and_then(Value::as_str) {
            let path = PathBuf::from(path);
            let name = path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
            reply = reply.with_artifact(Artifact::new(name, path));
        }
        Ok(reply)
    }
}

fn value_to_env(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn exec_returns_stdout() {
        let driver = ShellDriver::new();
        let reply = driver
            .invoke("exec", &json!({"command": "echo hello"}), &DriverOptions::new())
            .await
            .unwrap();
        assert_eq!(reply.value, json!("hello"));
    }

    #[tokio::test]
    async fn exec_nonzero_exit_is_assertion_failure() {
        let driver = ShellDriver::new();
        let err = driver
            .invoke(
                "exec",
                &json!({"command": "echo oops >&2; exit 3"}),
                &DriverOptions::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, TestErrorKind::AssertionFailed);
        assert!(err.message.contains("code 3"));
        assert_eq!(err.detail.as_deref(), Some("oops"));
    }

    #[tokio::test]
    async fn exec_merges_project_env() {
        let driver = ShellDriver::new();
        let mut options = DriverOptions::new();
        options.insert("env".into(), json!({"BASE_URL": "http://localhost:3000"}));
        let reply = driver
            .invoke("exec", &json!({"command": "printf %s \"$BASE_URL\""}), &options)
            .await
            .unwrap();
        assert_eq!(reply.value, json!("http://localhost:3000"));
    }

    #[tokio::test]
    async fn exec_reports_artifact() {
        let driver = ShellDriver::new();
        let reply = driver
            .invoke(
                "exec",
                &json!({"command": "true", "artifact": "out/trace.zip"}),
                &DriverOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(reply.artifacts, vec![Artifact::new("trace.zip", "out/trace.zip")]);
    }

    #[tokio::test]
    async fn unsupported_action_is_driver_error() {
        let driver = ShellDriver::new();
        let err = driver
            .invoke("navigate", &json!({}), &DriverOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, TestErrorKind::DriverError);
    }

    #[tokio::test]
    async fn missing_command_is_driver_error() {
        let driver = ShellDriver::new();
        let err = driver
            .invoke("exec", &json!({}), &DriverOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, TestErrorKind::DriverError);
    }
}
