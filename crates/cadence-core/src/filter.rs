//! Material filters: ant-style path patterns that decide whether a change
//! to a material is interesting to a pipeline.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// A single ant-style pattern (`**`, `*`, `?`) matched against modified file paths.
///
/// The pattern is compiled on first use and reused afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IgnoredFiles {
    pattern: String,
    #[serde(skip)]
    compiled: OnceLock<Option<Regex>>,
}

impl PartialEq for IgnoredFiles {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for IgnoredFiles {}

impl Hash for IgnoredFiles {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pattern.hash(state);
    }
}

impl IgnoredFiles {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            compiled: OnceLock::new(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Check whether `path` matches this pattern.
    ///
    /// When `folder` is set, paths under that folder are also matched
    /// relative to it.
    pub fn should_ignore(&self, folder: Option<&str>, path: &str) -> bool {
        let Some(regex) = self.regex() else {
            return false;
        };
        let path = normalize(path);
        if regex.is_match(&path) {
            return true;
        }
        match folder.map(normalize) {
            Some(folder) if !folder.is_empty() => path
                .strip_prefix(folder.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .is_some_and(|relative| regex.is_match(relative)),
            _ => false,
        }
    }

    /// The compiled pattern, or `None` if it could not be compiled.
    fn regex(&self) -> Option<&Regex> {
        self.compiled
            .get_or_init(|| match Regex::new(&self.to_regex()) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    tracing::warn!(
                        pattern = %self.pattern,
                        error = %e,
                        "Ignoring filter pattern that does not compile"
                    );
                    None
                }
            })
            .as_ref()
    }

    fn to_regex(&self) -> String {
        let pattern = normalize(&self.pattern);
        let mut out = String::from("^");
        let mut literal = String::new();
        let mut chars = pattern.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '*' | '?' => {
                    out.push_str(&regex::escape(&literal));
                    literal.clear();
                    if c == '?' {
                        out.push_str("[^/]");
                    } else if chars.peek() == Some(&'*') {
                        chars.next();
                        if chars.peek() == Some(&'/') {
                            chars.next();
                            out.push_str("(?:[^/]*/)*");
                        } else {
                            out.push_str(".*");
                        }
                    } else {
                        out.push_str("[^/]*");
                    }
                }
                other => literal.push(other),
            }
        }
        out.push_str(&regex::escape(&literal));
        out.push('$');
        out
    }
}

/// Filter attached to a material configuration.
///
/// A plain filter lists paths whose changes are ignored. An inverted filter
/// turns the patterns into a whitelist: changes outside them are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub ignore: Vec<IgnoredFiles>,
    #[serde(default)]
    pub invert: bool,
}

impl Filter {
    pub fn new(ignore: Vec<IgnoredFiles>) -> Self {
        Self {
            ignore,
            invert: false,
        }
    }

    /// An inverted (whitelist) filter.
    pub fn whitelist(patterns: Vec<IgnoredFiles>) -> Self {
        Self {
            ignore: patterns,
            invert: true,
        }
    }

    pub fn should_never_ignore(&self) -> bool {
        self.ignore.is_empty()
    }

    /// Whether any pattern of this filter matches `path`.
    pub fn matches(&self, folder: Option<&str>, path: &str) -> bool {
        self.ignore.iter().any(|p| p.should_ignore(folder, path))
    }
}

fn normalize(path: &str) -> String {
    let unix = path.replace('\\', "/");
    unix.trim_start_matches('/').to_string()
}
