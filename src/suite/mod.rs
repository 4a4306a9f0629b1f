//! The immutable suite model: test identities, test cases, fixture
//! declarations and the programmatic [`Suite`] builder.

pub mod body;
pub mod fixture;
pub mod script;
pub mod tags;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

pub use body::{FixtureValue, Fixtures, FnBody, TestArgs, TestBody, TestInfo, body};
pub use fixture::{FixtureHooks, FixtureScope, FixtureSpec, FnFixture};
pub use tags::TagSet;

// ── Identity ────────────────────────────────────────────────────────

/// Identity of a test: suite file plus the title chain from nested groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TestId {
    pub file: String,
    pub titles: Vec<String>,
}

impl TestId {
    pub fn new<I, S>(file: impl Into<String>, titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            file: file.into(),
            titles: titles.into_iter().map(Into::into).collect(),
        }
    }

    /// Title chain joined with " > ".
    pub fn title(&self) -> String {
        self.titles.join(" > ")
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file)?;
        for title in &self.titles {
            write!(f, " > {title}")?;
        }
        Ok(())
    }
}

// ── Test cases ──────────────────────────────────────────────────────

/// A discovered test. Immutable after discovery.
#[derive(Clone)]
pub struct TestCase {
    pub id: TestId,
    pub tags: TagSet,
    /// Fixture names the test requested, in declaration order.
    pub fixtures: Vec<String>,
    pub body: Arc<dyn TestBody>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub skip: bool,
    pub only: bool,
    /// Indices into the run's fixture table in setup order: requested and
    /// `auto` fixtures plus their transitive dependencies.
    pub fixture_plan: Vec<usize>,
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("id", &self.id)
            .field("tags", &self.tags)
            .field("fixtures", &self.fixtures)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("skip", &self.skip)
            .field("only", &self.only)
            .field("fixture_plan", &self.fixture_plan)
            .finish_non_exhaustive()
    }
}

/// A test as declared, before discovery resolves its fixtures.
#[derive(Clone)]
pub struct TestDef {
    pub titles: Vec<String>,
    pub tags: TagSet,
    pub fixtures: Vec<String>,
    pub body: Arc<dyn TestBody>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub skip: bool,
    pub only: bool,
}

impl TestDef {
    fn new(titles: Vec<String>, body: Arc<dyn TestBody>) -> Self {
        let mut tags = TagSet::new();
        for title in &titles {
            tags.extend_from_title(title);
        }
        Self {
            titles,
            tags,
            fixtures: Vec::new(),
            body,
            timeout: None,
            retries: None,
            skip: false,
            only: false,
        }
    }

    pub fn tag(&mut self, tag: &str) -> &mut Self {
        self.tags.insert(tag);
        self
    }

    /// Request fixtures by name.
    pub fn uses<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fixtures.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(&mut self, retries: u32) -> &mut Self {
        self.retries = Some(retries);
        self
    }

    pub fn skip(&mut self) -> &mut Self {
        self.skip = true;
        self
    }

    pub fn only(&mut self) -> &mut Self {
        self.only = true;
        self
    }
}

// ── Suite builder ───────────────────────────────────────────────────

/// One suite file: its fixtures and tests in source order.
///
/// ```ignore
/// let mut suite = Suite::new("checkout.spec");
/// suite.describe("cart", |s| {
///     s.test("adds item @smoke", body(|args| async move { Ok(()) }))
///         .uses(["page"]);
/// });
/// ```
#[derive(Default)]
pub struct Suite {
    pub file: String,
    pub fixtures: Vec<FixtureSpec>,
    pub tests: Vec<TestDef>,
    groups: Vec<String>,
    group_tags: Vec<TagSet>,
}

impl Suite {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Self::default()
        }
    }

    pub fn fixture(&mut self, spec: FixtureSpec) -> &mut Self {
        self.fixtures.push(spec);
        self
    }

    /// Declare a test inside the current group chain.
    pub fn test(&mut self, title: impl Into<String>, body: impl TestBody + 'static) -> &mut TestDef {
        self.test_arc(title, Arc::new(body))
    }

    pub(crate) fn test_arc(&mut self, title: impl Into<String>, body: Arc<dyn TestBody>) -> &mut TestDef {
        let mut titles = self.groups.clone();
        titles.push(title.into());
        let mut def = TestDef::new(titles, body);
        for tags in &self.group_tags {
            def.tags.extend(tags);
        }
        let idx = self.tests.len();
        self.tests.push(def);
        &mut self.tests[idx]
    }

    /// Group tests under a title. Groups nest.
    pub fn describe(&mut self, title: impl Into<String>, build: impl FnOnce(&mut Self)) -> &mut Self {
        self.describe_tagged(title, TagSet::new(), build)
    }

    /// Group tests under a title, tagging every test inside.
    pub fn describe_tagged(
        &mut self,
        title: impl Into<String>,
        tags: TagSet,
        build: impl FnOnce(&mut Self),
    ) -> &mut Self {
        self.groups.push(title.into());
        self.group_tags.push(tags);
        build(self);
        self.groups.pop();
        self.group_tags.pop();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty() && self.fixtures.is_empty()
    }
}

impl fmt::Debug for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suite")
            .field("file", &self.file)
            .field("fixtures", &self.fixtures)
            .field("tests", &self.tests.len())
            .finish()
    }
}
