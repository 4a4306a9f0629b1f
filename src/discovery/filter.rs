use regex::Regex;

use crate::config::error::{ConfigError, ConfigErrorKind};
use crate::suite::{TagSet, TestId};

/// A predicate for filtering tests by tags.
#[derive(Debug, Clone, PartialEq)]
pub enum TagPredicate {
    Include(String),
    Exclude(String),
    And(Vec<TagPredicate>),
    Or(Vec<TagPredicate>),
}

impl TagPredicate {
    pub fn matches(&self, tags: &TagSet) -> bool {
        match self {
            Self::Include(tag) => tags.contains(tag),
            Self::Exclude(tag) => !tags.contains(tag),
            Self::And(preds) => preds.iter().all(|p| p.matches(tags)),
            Self::Or(preds) => preds.iter().any(|p| p.matches(tags)),
        }
    }

    /// Predicate from include and exclude lists: any include (or no includes
    /// at all) and none of the excludes.
    pub fn from_lists(include: &[String], exclude: &[String]) -> Option<Self> {
        let mut preds = Vec::new();
        match include {
            [] => {}
            [one] => preds.push(Self::Include(strip_at(one))),
            many => preds.push(Self::Or(
                many.iter().map(|t| Self::Include(strip_at(t))).collect(),
            )),
        }
        preds.extend(exclude.iter().map(|t| Self::Exclude(strip_at(t))));
        match preds.len() {
            0 => None,
            1 => preds.pop(),
            _ => Some(Self::And(preds)),
        }
    }
}

fn strip_at(tag: &str) -> String {
    let tag = tag.trim();
    tag.strip_prefix('@').unwrap_or(tag).to_owned()
}

/// Parse a filter string into a `TagPredicate`.
///
/// Supports:
/// - Single tag: `"smoke"` → `Include("smoke")`
/// - Comma-separated (OR): `"smoke,critical"` → `Or([Include("smoke"), Include("critical")])`
/// - NOT prefix: `"NOT slow"` → `Exclude("slow")`
/// - AND NOT: `"smoke AND NOT slow"` → `And([Include("smoke"), Exclude("slow")])`
///
/// A leading `@` on a tag is ignored.
///
/// # Errors
///
/// Returns an `InvalidFilter` error if the string is empty or has an empty
/// term.
pub fn parse_filter(input: &str) -> Result<TagPredicate, ConfigError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(invalid("empty filter string", input));
    }

    if input.contains(" AND ") {
        let preds: Result<Vec<TagPredicate>, ConfigError> =
            input.split(" AND ").map(|p| parse_single(p, input)).collect();
        return Ok(TagPredicate::And(preds?));
    }

    if input.contains(',') {
        let preds: Result<Vec<TagPredicate>, ConfigError> =
            input.split(',').map(|p| parse_single(p, input)).collect();
        return Ok(TagPredicate::Or(preds?));
    }

    parse_single(input, input)
}

fn parse_single(term: &str, whole: &str) -> Result<TagPredicate, ConfigError> {
    let term = term.trim();
    if term.is_empty() {
        return Err(invalid("empty tag in filter", whole));
    }

    let negated = term
        .strip_prefix("NOT")
        .filter(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace));
    let tag = strip_at(negated.unwrap_or(term));
    if tag.is_empty() {
        return Err(invalid(
            if negated.is_some() { "empty tag after NOT" } else { "empty tag in filter" },
            whole,
        ));
    }
    // Tags never contain whitespace; a leftover space means a dangling
    // operator such as "smoke AND".
    if tag.contains(char::is_whitespace) {
        return Err(invalid("malformed tag term", whole));
    }
    Ok(match negated {
        Some(_) => TagPredicate::Exclude(tag),
        None => TagPredicate::Include(tag),
    })
}

fn invalid(message: &str, input: &str) -> ConfigError {
    ConfigError::new(ConfigErrorKind::InvalidFilter, message).with_detail(format!("filter: \"{input}\""))
}

/// Compile a title pattern.
///
/// # Errors
///
/// Returns `InvalidFilter` if the pattern is not a valid regex.
pub fn compile_grep(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| {
        ConfigError::new(
            ConfigErrorKind::InvalidFilter,
            format!("invalid grep pattern \"{pattern}\""),
        )
        .with_detail(e.to_string())
    })
}

/// Launch-time filters applied during discovery.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    /// Keep tests whose file path contains any of these substrings.
    pub files: Vec<String>,
    /// Keep tests whose full title (`file > group > title`) matches.
    pub grep: Option<Regex>,
    pub tags: Option<TagPredicate>,
}

impl Filters {
    /// Build filters from raw CLI strings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter` for a bad regex or tag expression.
    pub fn parse(files: &[String], grep: Option<&str>, tags: Option<&str>) -> Result<Self, ConfigError> {
        Ok(Self {
            files: files.to_vec(),
            grep: grep.map(compile_grep).transpose()?,
            tags: tags.map(parse_filter).transpose()?,
        })
    }

    pub fn matches(&self, id: &TestId, tags: &TagSet) -> bool {
        if !self.files.is_empty() && !self.files.iter().any(|f| id.file.contains(f.as_str())) {
            return false;
        }
        if let Some(grep) = &self.grep
            && !grep.is_match(&id.to_string())
        {
            return false;
        }
        self.tags.as_ref().is_none_or(|p| p.matches(tags))
    }
}
