use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::runner::result::{TestError, TestErrorKind};
use crate::suite::body::{FixtureValue, Fixtures, TestArgs};
use crate::suite::fixture::{FixtureScope, FixtureSpec};

/// A fixture value that has been set up and still owes a teardown.
struct Realized {
    index: usize,
    value: FixtureValue,
    args: TestArgs,
}

/// Realized values of one scope with their teardown stack.
///
/// Teardown pops one entry at a time so that a teardown interrupted by a
/// deadline leaves the remaining entries in place for a second pass.
#[derive(Default)]
struct ScopeCache {
    values: HashMap<usize, FixtureValue>,
    stack: Vec<Realized>,
    /// Entry whose teardown was cut off by a deadline.
    interrupted: Option<usize>,
    errors: Vec<TestError>,
}

impl ScopeCache {
    async fn get_or_setup(
        &mut self,
        index: usize,
        spec: &FixtureSpec,
        args: TestArgs,
    ) -> Result<FixtureValue, TestError> {
        if let Some(value) = self.values.get(&index) {
            return Ok(FixtureValue::clone(value));
        }
        debug!(fixture = %spec.name, scope = %spec.scope, "setting up fixture");
        let value = spec
            .hooks
            .setup(args.clone())
            .await
            .map_err(|e| rekind(e, TestErrorKind::SetupFailed, &spec.name))?;
        self.values.insert(index, FixtureValue::clone(&value));
        self.stack.push(Realized {
            index,
            value: FixtureValue::clone(&value),
            args,
        });
        Ok(value)
    }

    async fn teardown(&mut self, specs: &[FixtureSpec]) {
        self.record_interrupted(specs);
        while let Some(realized) = self.stack.pop() {
            let spec = &specs[realized.index];
            self.values.remove(&realized.index);
            debug!(fixture = %spec.name, scope = %spec.scope, "tearing down fixture");
            self.interrupted = Some(realized.index);
            let result = AssertUnwindSafe(spec.hooks.teardown(realized.value, realized.args))
                .catch_unwind()
                .await;
            self.interrupted = None;
            let error = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => rekind(e, TestErrorKind::TeardownFailed, &spec.name),
                Err(_) => TestError::new(
                    TestErrorKind::TeardownFailed,
                    format!("fixture \"{}\": teardown panicked", spec.name),
                ),
            };
            warn!(fixture = %spec.name, error = %error, "fixture teardown failed");
            self.errors.push(error);
        }
    }

    /// Record that the remaining entries will never be torn down.
    fn abandon(&mut self, specs: &[FixtureSpec]) {
        self.record_interrupted(specs);
        for realized in self.stack.drain(..).rev() {
            let name = &specs[realized.index].name;
            warn!(fixture = %name, "fixture teardown abandoned");
            self.errors.push(TestError::new(
                TestErrorKind::TeardownFailed,
                format!("fixture \"{name}\": teardown abandoned after grace timeout"),
            ));
        }
        self.values.clear();
    }

    fn record_interrupted(&mut self, specs: &[FixtureSpec]) {
        if let Some(index) = self.interrupted.take() {
            let name = &specs[index].name;
            warn!(fixture = %name, "fixture teardown interrupted");
            self.errors.push(TestError::new(
                TestErrorKind::TeardownFailed,
                format!("fixture \"{name}\": teardown interrupted by timeout"),
            ));
        }
    }
}

fn rekind(error: TestError, kind: TestErrorKind, fixture: &str) -> TestError {
    TestError {
        kind,
        message: format!("fixture \"{fixture}\": {}", error.message),
        detail: error.detail,
    }
}

// ── Test scope ──────────────────────────────────────────────────────

/// Fixtures realized for one RunUnit.
///
/// Lives outside the unit's timed future: if the deadline drops the future
/// mid-acquisition, everything already set up is still on the stack.
#[derive(Default)]
pub struct TestScope {
    cache: ScopeCache,
    fixtures: Fixtures,
}

impl TestScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set up every fixture in `plan` in order, reusing worker- and
    /// suite-scoped values already realized. Returns the fixtures the body
    /// receives.
    ///
    /// # Errors
    ///
    /// Returns the first setup failure as `SetupFailed`. Fixtures set up
    /// before it remain registered for teardown.
    pub async fn acquire(
        &mut self,
        specs: &[FixtureSpec],
        plan: &[usize],
        base: &TestArgs,
        worker: &mut WorkerScope,
        suite: &SuiteScope,
    ) -> Result<Fixtures, TestError> {
        for &index in plan {
            let spec = &specs[index];
            let args = base.with_fixtures(self.fixtures.clone());
            let value = match spec.scope {
                FixtureScope::Test => self.cache.get_or_setup(index, spec, args).await?,
                FixtureScope::Worker => worker.cache.get_or_setup(index, spec, args).await?,
                FixtureScope::Suite => suite.get_or_setup(index, spec, args).await?,
            };
            self.fixtures.insert(&spec.name, value);
        }
        Ok(self.fixtures.clone())
    }

    /// Tear down test-scoped fixtures in reverse setup order.
    pub async fn teardown(&mut self, specs: &[FixtureSpec]) {
        self.cache.teardown(specs).await;
    }

    pub fn abandon(&mut self, specs: &[FixtureSpec]) {
        self.cache.abandon(specs);
    }

    /// Number of test-scoped fixtures still awaiting teardown.
    pub fn pending(&self) -> usize {
        self.cache.stack.len()
    }

    /// Teardown failures collected so far.
    pub fn take_errors(&mut self) -> Vec<TestError> {
        std::mem::take(&mut self.cache.errors)
    }
}

// ── Worker scope ────────────────────────────────────────────────────

/// Fixtures owned by one worker for its whole life.
#[derive(Default)]
pub struct WorkerScope {
    cache: ScopeCache,
}

impl WorkerScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tear down worker fixtures when the worker retires.
    pub async fn teardown(&mut self, specs: &[FixtureSpec]) {
        self.cache.teardown(specs).await;
    }

    pub fn abandon(&mut self, specs: &[FixtureSpec]) {
        self.cache.abandon(specs);
    }

    pub fn take_errors(&mut self) -> Vec<TestError> {
        std::mem::take(&mut self.cache.errors)
    }
}

// ── Suite scope ─────────────────────────────────────────────────────

/// Fixtures shared by every worker of a run.
///
/// Setup happens under the lock, so concurrent requests for the same
/// fixture wait for the first one instead of racing it.
#[derive(Default)]
pub struct SuiteScope {
    cache: tokio::sync::Mutex<ScopeCache>,
}

impl SuiteScope {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get_or_setup(
        &self,
        index: usize,
        spec: &FixtureSpec,
        args: TestArgs,
    ) -> Result<FixtureValue, TestError> {
        self.cache.lock().await.get_or_setup(index, spec, args).await
    }

    /// Tear down suite fixtures after every worker has retired.
    pub async fn teardown(&self, specs: &[FixtureSpec]) {
        self.cache.lock().await.teardown(specs).await;
    }

    pub async fn abandon(&self, specs: &[FixtureSpec]) {
        self.cache.lock().await.abandon(specs);
    }

    pub async fn take_errors(&self) -> Vec<TestError> {
        std::mem::take(&mut self.cache.lock().await.errors)
    }
}
