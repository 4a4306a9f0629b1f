use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::runner::result::TestError;
use crate::suite::body::{FixtureValue, TestArgs};

/// How long a realized fixture value lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixtureScope {
    /// Set up and torn down around every RunUnit.
    #[default]
    Test,
    /// Set up once per worker, torn down when the worker retires.
    Worker,
    /// Set up once per run, shared by all workers.
    Suite,
}

impl FixtureScope {
    /// Lifetime rank; a fixture may only depend on fixtures of equal or
    /// higher rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Test => 0,
            Self::Worker => 1,
            Self::Suite => 2,
        }
    }
}

impl fmt::Display for FixtureScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Test => write!(f, "test"),
            Self::Worker => write!(f, "worker"),
            Self::Suite => write!(f, "suite"),
        }
    }
}

/// Setup and teardown behavior of a fixture.
#[async_trait]
pub trait FixtureHooks: Send + Sync {
    /// Produce the fixture value. `args.fixtures` holds the realized
    /// dependencies.
    ///
    /// # Errors
    ///
    /// A failed setup fails the requesting unit with `SetupFailed`.
    async fn setup(&self, args: TestArgs) -> Result<FixtureValue, TestError>;

    /// Release the fixture value.
    ///
    /// # Errors
    ///
    /// A failed teardown is recorded as a secondary error.
    async fn teardown(&self, value: FixtureValue, args: TestArgs) -> Result<(), TestError> {
        let _ = (value, args);
        Ok(())
    }
}

/// A named fixture declaration.
#[derive(Clone)]
pub struct FixtureSpec {
    pub name: String,
    pub depends: Vec<String>,
    pub scope: FixtureScope,
    /// Instantiated for every test, requested or not.
    pub auto: bool,
    pub hooks: Arc<dyn FixtureHooks>,
}

impl FixtureSpec {
    pub fn new(name: impl Into<String>, scope: FixtureScope, hooks: impl FixtureHooks + 'static) -> Self {
        Self {
            name: name.into(),
            depends: Vec::new(),
            scope,
            auto: false,
            hooks: Arc::new(hooks),
        }
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn auto(mut self) -> Self {
        self.auto = true;
        self
    }
}

impl fmt::Debug for FixtureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureSpec")
            .field("name", &self.name)
            .field("depends", &self.depends)
            .field("scope", &self.scope)
            .field("auto", &self.auto)
            .finish_non_exhaustive()
    }
}

type SetupFn = Box<dyn Fn(TestArgs) -> BoxFuture<'static, Result<FixtureValue, TestError>> + Send + Sync>;
type TeardownFn =
    Box<dyn Fn(FixtureValue, TestArgs) -> BoxFuture<'static, Result<(), TestError>> + Send + Sync>;

/// Fixture hooks built from async closures.
pub struct FnFixture {
    setup: SetupFn,
    teardown: Option<TeardownFn>,
}

impl FnFixture {
    /// Build hooks from a setup closure returning any `Send + Sync` value.
    pub fn new<F, Fut, V>(setup: F) -> Self
    where
        F: Fn(TestArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, TestError>> + Send + 'static,
        V: Any + Send + Sync,
    {
        Self {
            setup: Box::new(move |args| {
                let fut = setup(args);
                Box::pin(async move { fut.await.map(|v| Arc::new(v) as FixtureValue) })
            }),
            teardown: None,
        }
    }

    pub fn with_teardown<F, Fut>(mut self, teardown: F) -> Self
    where
        F: Fn(FixtureValue, TestArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        self.teardown = Some(Box::new(move |value, args| Box::pin(teardown(value, args))));
        self
    }
}

#[async_trait]
impl FixtureHooks for FnFixture {
    async fn setup(&self, args: TestArgs) -> Result<FixtureValue, TestError> {
        (self.setup)(args).await
    }

    async fn teardown(&self, value: FixtureValue, args: TestArgs) -> Result<(), TestError> {
        match &self.teardown {
            Some(teardown) => teardown(value, args).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_rank_orders_lifetimes() {
        assert!(FixtureScope::Test.rank() < FixtureScope::Worker.rank());
        assert!(FixtureScope::Worker.rank() < FixtureScope::Suite.rank());
    }

    #[test]
    fn scope_display() {
        assert_eq!(FixtureScope::Test.to_string(), "test");
        assert_eq!(FixtureScope::Worker.to_string(), "worker");
        assert_eq!(FixtureScope::Suite.to_string(), "suite");
    }

    #[test]
    fn scope_deserializes_lowercase() {
        let scope: FixtureScope = serde_yaml::from_str("worker").unwrap();
        assert_eq!(scope, FixtureScope::Worker);
    }

    #[test]
    fn spec_builder_collects_dependencies() {
        let spec = FixtureSpec::new(
            "page",
            FixtureScope::Test,
            FnFixture::new(|_args| async { Ok(()) }),
        )
        .depends_on(["browser", "context"])
        .auto();
        assert_eq!(spec.depends, vec!["browser", "context"]);
        assert!(spec.auto);
        assert!(format!("{spec:?}").contains("page"));
    }
}
