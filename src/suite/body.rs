use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::driver::{Artifact, Driver, DriverOptions};
use crate::runner::result::{TestError, TestErrorKind};
use crate::suite::TestId;

/// A realized fixture value. Downcast with [`Fixtures::get`].
pub type FixtureValue = Arc<dyn Any + Send + Sync>;

/// Opaque test body receiving resolved fixtures and the driver.
#[async_trait]
pub trait TestBody: Send + Sync {
    /// Run the test.
    ///
    /// # Errors
    ///
    /// Returns a [`TestError`] when the test fails.
    async fn run(&self, args: TestArgs) -> Result<(), TestError>;
}

/// Adapter turning an async closure into a [`TestBody`].
pub struct FnBody<F>(F);

/// Wrap an async closure as a test body.
pub fn body<F, Fut>(f: F) -> FnBody<F>
where
    F: Fn(TestArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TestError>> + Send + 'static,
{
    FnBody(f)
}

#[async_trait]
impl<F, Fut> TestBody for FnBody<F>
where
    F: Fn(TestArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TestError>> + Send + 'static,
{
    async fn run(&self, args: TestArgs) -> Result<(), TestError> {
        (self.0)(args).await
    }
}

/// Fixture values realized so far for the running unit, keyed by name.
#[derive(Clone, Default)]
pub struct Fixtures {
    values: HashMap<String, FixtureValue>,
}

impl fmt::Debug for Fixtures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.values.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Fixtures").field("names", &names).finish()
    }
}

impl Fixtures {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, name: &str, value: FixtureValue) {
        self.values.insert(name.to_owned(), value);
    }

    /// Typed access to a fixture value.
    ///
    /// # Errors
    ///
    /// Returns a `SetupFailed` error if the fixture was not requested or has
    /// a different type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, TestError> {
        let value = self.raw(name).ok_or_else(|| {
            TestError::new(
                TestErrorKind::SetupFailed,
                format!("fixture \"{name}\" was not requested by this test"),
            )
        })?;
        Arc::clone(value).downcast::<T>().map_err(|_| {
            TestError::new(
                TestErrorKind::SetupFailed,
                format!(
                    "fixture \"{name}\" is not a {}",
                    std::any::type_name::<T>()
                ),
            )
        })
    }

    /// Untyped access to a fixture value.
    pub fn raw(&self, name: &str) -> Option<&FixtureValue> {
        self.values.get(name)
    }

    /// Fixture value as JSON, for values produced by scripted fixtures or
    /// fixtures that return `serde_json::Value` / `String`.
    pub fn json(&self, name: &str) -> Option<Value> {
        let value = self.raw(name)?;
        if let Some(v) = value.downcast_ref::<Value>() {
            Some(v.clone())
        } else {
            value
                .downcast_ref::<String>()
                .map(|s| Value::String(s.clone()))
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Identity of the unit a body or hook is running for.
#[derive(Debug, Clone)]
pub struct TestInfo {
    pub test: TestId,
    pub project: String,
    pub attempt: u32,
    pub worker: usize,
}

/// Ordered artifact log shared by every hook and the body of one unit.
#[derive(Debug, Clone, Default)]
pub struct ArtifactLog(Arc<Mutex<Vec<Artifact>>>);

impl ArtifactLog {
    pub fn push(&self, artifact: Artifact) {
        self.0.lock().push(artifact);
    }

    pub fn snapshot(&self) -> Vec<Artifact> {
        self.0.lock().clone()
    }
}

/// Everything a test body or fixture hook receives.
#[derive(Clone)]
pub struct TestArgs {
    pub fixtures: Fixtures,
    pub driver: Arc<dyn Driver>,
    pub info: Arc<TestInfo>,
    pub options: Arc<DriverOptions>,
    artifacts: ArtifactLog,
}

impl TestArgs {
    pub fn new(
        driver: Arc<dyn Driver>,
        info: Arc<TestInfo>,
        options: Arc<DriverOptions>,
        artifacts: ArtifactLog,
    ) -> Self {
        Self {
            fixtures: Fixtures::new(),
            driver,
            info,
            options,
            artifacts,
        }
    }

    pub(crate) fn with_fixtures(&self, fixtures: Fixtures) -> Self {
        Self {
            fixtures,
            ..self.clone()
        }
    }

    /// Typed fixture access, see [`Fixtures::get`].
    ///
    /// # Errors
    ///
    /// Returns a `SetupFailed` error if the fixture is missing or mistyped.
    pub fn fixture<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, TestError> {
        self.fixtures.get(name)
    }

    /// Call the driver with the project's options, recording any artifacts
    /// it reports. Returns the reply value.
    ///
    /// # Errors
    ///
    /// Propagates the driver's error.
    pub async fn invoke(&self, action: &str, args: Value) -> Result<Value, TestError> {
        let reply = self.driver.invoke(action, &args, &self.options).await?;
        for artifact in reply.artifacts {
            self.artifacts.push(artifact);
        }
        Ok(reply.value)
    }

    /// Record an artifact captured outside the driver.
    pub fn attach(&self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }
}
