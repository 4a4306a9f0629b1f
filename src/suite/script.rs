//! Declarative YAML suite files.
//!
//! ```yaml
//! describe: checkout
//! tags: [shop]
//! fixtures:
//!   - name: server
//!     scope: worker
//!     setup:
//!       - action: exec
//!         with: { command: "echo http://localhost:3000" }
//! tests:
//!   - title: loads the cart @smoke
//!     use: [server]
//!     timeout: 2000
//!     steps:
//!       - action: navigate
//!         with: { url: "${server}/cart" }
//!       - wait: 100
//!   - describe: guest
//!     tests:
//!       - title: cannot pay
//!         steps:
//!           - fail: not implemented
//! ```
//!
//! `${name}` in step arguments is replaced with the JSON value of fixture
//! `name`; `${name.field}` reaches into objects. A string consisting of a
//! single placeholder keeps the value's JSON type.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::config::error::{ConfigError, ConfigErrorKind};
use crate::runner::result::{TestError, TestErrorKind};
use crate::suite::body::{FixtureValue, Fixtures, TestArgs, TestBody};
use crate::suite::fixture::{FixtureHooks, FixtureScope, FixtureSpec};
use crate::suite::{Suite, TagSet};

// ── File format ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SuiteFile {
    describe: Option<String>,
    tags: Vec<String>,
    fixtures: Vec<FixtureDecl>,
    tests: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct FixtureDecl {
    name: String,
    #[serde(default)]
    scope: FixtureScope,
    #[serde(default)]
    depends: Vec<String>,
    #[serde(default)]
    auto: bool,
    #[serde(default)]
    setup: Vec<Step>,
    #[serde(default)]
    teardown: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Entry {
    Group {
        describe: String,
        #[serde(default)]
        tags: Vec<String>,
        tests: Vec<Entry>,
    },
    Test(Box<TestDecl>),
}

#[derive(Debug, Deserialize)]
struct TestDecl {
    title: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default, rename = "use")]
    uses: Vec<String>,
    /// Milliseconds.
    timeout: Option<u64>,
    retries: Option<u32>,
    #[serde(default)]
    skip: bool,
    #[serde(default)]
    only: bool,
    #[serde(default)]
    steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Step {
    Action {
        action: String,
        #[serde(default, rename = "with")]
        args: Value,
        expect: Option<Value>,
    },
    Wait {
        /// Milliseconds.
        wait: u64,
    },
    Fail {
        fail: String,
    },
}

// ── Loading ─────────────────────────────────────────────────────────

/// Read and parse a suite file. `file` is the identity recorded on each test.
///
/// # Errors
///
/// `UnreadableFile` if the file cannot be read, `MalformedFile` if it does
/// not parse.
pub fn load_suite(path: &Path, file: &str) -> Result<Suite, ConfigError> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::new(
            ConfigErrorKind::UnreadableFile,
            format!("cannot read {}", path.display()),
        )
        .with_detail(e.to_string())
    })?;
    parse_suite(file, &source)
}

/// Parse suite YAML into a [`Suite`].
///
/// # Errors
///
/// Returns `MalformedFile` with the parser message as detail.
pub fn parse_suite(file: &str, source: &str) -> Result<Suite, ConfigError> {
    let mut suite = Suite::new(file);
    if source.trim().is_empty() {
        return Ok(suite);
    }

    let parsed: SuiteFile = serde_yaml::from_str(source).map_err(|e| {
        ConfigError::new(ConfigErrorKind::MalformedFile, format!("{file} is not a valid suite"))
            .with_detail(e.to_string())
    })?;

    for decl in parsed.fixtures {
        let mut spec = FixtureSpec::new(
            decl.name.clone(),
            decl.scope,
            ScriptFixture {
                name: decl.name,
                setup: decl.setup,
                teardown: decl.teardown,
            },
        )
        .depends_on(decl.depends);
        spec.auto = decl.auto;
        suite.fixture(spec);
    }

    let tags: TagSet = parsed.tags.iter().collect();
    match parsed.describe {
        Some(title) => {
            suite.describe_tagged(title, tags, |s| add_entries(s, parsed.tests));
        }
        None if tags.is_empty() => add_entries(&mut suite, parsed.tests),
        None => add_tagged(&mut suite, &tags, parsed.tests),
    }
    Ok(suite)
}

fn add_tagged(suite: &mut Suite, tags: &TagSet, entries: Vec<Entry>) {
    let first = suite.tests.len();
    add_entries(suite, entries);
    for def in &mut suite.tests[first..] {
        def.tags.extend(tags);
    }
}

fn add_entries(suite: &mut Suite, entries: Vec<Entry>) {
    for entry in entries {
        match entry {
            Entry::Group {
                describe,
                tags,
                tests,
            } => {
                let tags: TagSet = tags.iter().collect();
                suite.describe_tagged(describe, tags, |s| add_entries(s, tests));
            }
            Entry::Test(decl) => add_test(suite, *decl),
        }
    }
}

fn add_test(suite: &mut Suite, decl: TestDecl) {
    let def = suite.test_arc(decl.title, Arc::new(ScriptBody { steps: decl.steps }));
    for tag in &decl.tags {
        def.tag(tag);
    }
    def.uses(decl.uses);
    if let Some(ms) = decl.timeout {
        def.timeout(Duration::from_millis(ms));
    }
    if let Some(retries) = decl.retries {
        def.retries(retries);
    }
    def.skip = decl.skip;
    def.only = decl.only;
}

// ── Execution ───────────────────────────────────────────────────────

struct ScriptBody {
    steps: Vec<Step>,
}

#[async_trait]
impl TestBody for ScriptBody {
    async fn run(&self, args: TestArgs) -> Result<(), TestError> {
        run_steps(&self.steps, &args).await.map(|_| ())
    }
}

/// A fixture whose value is the reply of its last setup step.
struct ScriptFixture {
    name: String,
    setup: Vec<Step>,
    teardown: Vec<Step>,
}

#[async_trait]
impl FixtureHooks for ScriptFixture {
    async fn setup(&self, args: TestArgs) -> Result<FixtureValue, TestError> {
        let value = run_steps(&self.setup, &args).await?;
        Ok(Arc::new(value))
    }

    async fn teardown(&self, value: FixtureValue, args: TestArgs) -> Result<(), TestError> {
        let mut fixtures = args.fixtures.clone();
        fixtures.insert(&self.name, value);
        let args = args.with_fixtures(fixtures);
        run_steps(&self.teardown, &args).await.map(|_| ())
    }
}

async fn run_steps(steps: &[Step], args: &TestArgs) -> Result<Value, TestError> {
    let mut last = Value::Null;
    for step in steps {
        last = match step {
            Step::Action {
                action,
                args: call,
                expect,
            } => {
                let call = interpolate(call, &args.fixtures)?;
                let reply = args.invoke(action, call).await?;
                if let Some(expected) = expect
                    && *expected != reply
                {
                    return Err(TestError::assertion(format!(
                        "{action}: expected {expected}, got {reply}"
                    )));
                }
                reply
            }
            Step::Wait { wait } => {
                tokio::time::sleep(Duration::from_millis(*wait)).await;
                Value::Null
            }
            Step::Fail { fail } => return Err(TestError::assertion(fail.clone())),
        };
    }
    Ok(last)
}

// ── Interpolation ───────────────────────────────────────────────────

fn interpolate(value: &Value, fixtures: &Fixtures) -> Result<Value, TestError> {
    match value {
        Value::String(s) => interpolate_str(s, fixtures),
        Value::Array(items) => items
            .iter()
            .map(|v| interpolate(v, fixtures))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), interpolate(v, fixtures)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn interpolate_str(s: &str, fixtures: &Fixtures) -> Result<Value, TestError> {
    if let Some(path) = s.strip_prefix("${").and_then(|r| r.strip_suffix('}'))
        && !path.contains("${")
    {
        return lookup(path, fixtures);
    }

    let mut out = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(Value::String(out));
        };
        match lookup(&after[..end], fixtures)? {
            Value::String(v) => out.push_str(&v),
            v => out.push_str(&v.to_string()),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

fn lookup(path: &str, fixtures: &Fixtures) -> Result<Value, TestError> {
    let mut parts = path.split('.');
    let name = parts.next().unwrap_or_default();
    let unresolved = || {
        TestError::new(
            TestErrorKind::SetupFailed,
            format!("cannot resolve \"${{{path}}}\""),
        )
    };
    let mut value = fixtures.json(name).ok_or_else(unresolved)?;
    for part in parts {
        value = value.get(part).cloned().ok_or_else(unresolved)?;
    }
    Ok(value)
}
