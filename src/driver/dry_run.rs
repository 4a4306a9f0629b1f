use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::driver::{Artifact, Driver, DriverOptions, DriverReply};
use crate::runner::result::TestError;

/// Driver that performs nothing and echoes its arguments back.
///
/// Useful for validating suites and configuration without a real browser or
/// network. An `artifact` action with a `path` argument reports that path as
/// a captured artifact, typed by an optional `contentType` argument.
#[derive(Debug, Default)]
pub struct DryRunDriver;

#[async_trait]
impl Driver for DryRunDriver {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn invoke(
        &self,
        action: &str,
        args: &Value,
        _options: &DriverOptions,
    ) -> Result<DriverReply, TestError> {
        debug!(action, %args, "dry-run driver call");
        let mut reply = DriverReply::value(args.clone());
        if action == "artifact"
            && let Some(path) = args.get("path").and_then(Value::as_str)
        {
            let name = args
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(path)
                .to_owned();
            let mut artifact = Artifact::new(name, path);
            if let Some(content_type) = args.get("contentType").and_then(Value::as_str) {
                artifact = artifact.with_content_type(content_type);
            }
            reply = reply.with_artifact(artifact);
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn dry_run_echoes_args() {
        let driver = DryRunDriver;
        let reply = driver
            .invoke("navigate", &json!({"url": "https://example.com"}), &DriverOptions::new())
            .await
            .unwrap();
        assert_eq!(reply.value, json!({"url": "https://example.com"}));
        assert!(reply.artifacts.is_empty());
    }

    #[tokio::test]
    async fn dry_run_artifact_action_reports_path() {
        let driver = DryRunDriver;
        let reply = driver
            .invoke(
                "artifact",
                &json!({"path": "shots/home.png", "name": "home"}),
                &DriverOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(reply.artifacts, vec![Artifact::new("home", "shots/home.png")]);
    }

    #[tokio::test]
    async fn dry_run_artifact_keeps_content_type() {
        let reply = DryRunDriver
            .invoke(
                "artifact",
                &json!({"path": "out/trace.zip", "contentType": "application/zip"}),
                &DriverOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            reply.artifacts,
            vec![Artifact::new("out/trace.zip", "out/trace.zip").with_content_type("application/zip")]
        );
    }
}
