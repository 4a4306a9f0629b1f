use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The set of tags attached to a test at discovery time.
///
/// Tags are stored without the leading `@` so that `@smoke` in a title and
/// `smoke` in a tag list name the same tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag, stripping a leading `@`. Empty tags are ignored.
    pub fn insert(&mut self, tag: &str) {
        let tag = normalize(tag);
        if !tag.is_empty() {
            self.0.insert(tag.to_owned());
        }
    }

    /// Merge every `@tag` token that appears in a title.
    pub fn extend_from_title(&mut self, title: &str) {
        for token in title.split_whitespace() {
            if token.len() > 1 && token.starts_with('@') {
                self.insert(token);
            }
        }
    }

    pub fn extend(&mut self, other: &TagSet) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(normalize(tag))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for tag in iter {
            set.insert(tag.as_ref());
        }
        set
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<String> = self.0.iter().map(|t| format!("@{t}")).collect();
        write!(f, "{}", tags.join(" "))
    }
}

fn normalize(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix('@').unwrap_or(tag)
}
