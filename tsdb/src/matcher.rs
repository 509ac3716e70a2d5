//! Label matchers used by the query path.
//!
//! Regex matchers are compiled fully anchored (`^(?:...)$`) so a pattern
//! must cover the whole label value, matching the usual metrics-query
//! semantics. A label that is absent from a series matches as if its value
//! were the empty string.

use regex::Regex;

use crate::error::{Result, TsdbError};
use crate::model::LabelSet;

/// A single selector over one label name.
#[derive(Debug, Clone)]
pub struct Matcher {
    name: String,
    kind: MatcherKind,
}

#[derive(Debug, Clone)]
enum MatcherKind {
    Equal(String),
    NotEqual(String),
    Regex(Regex),
    NotRegex(Regex),
}

impl Matcher {
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Matcher {
        Matcher {
            name: name.into(),
            kind: MatcherKind::Equal(value.into()),
        }
    }

    pub fn not_equal(name: impl Into<String>, value: impl Into<String>) -> Matcher {
        Matcher {
            name: name.into(),
            kind: MatcherKind::NotEqual(value.into()),
        }
    }

    pub fn regex(name: impl Into<String>, pattern: &str) -> Result<Matcher> {
        Ok(Matcher {
            name: name.into(),
            kind: MatcherKind::Regex(compile_anchored(pattern)?),
        })
    }

    pub fn not_regex(name: impl Into<String>, pattern: &str) -> Result<Matcher> {
        Ok(Matcher {
            name: name.into(),
            kind: MatcherKind::NotRegex(compile_anchored(pattern)?),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the series identified by `labels` satisfies this matcher.
    pub fn matches(&self, labels: &LabelSet) -> bool {
        let value = labels.get(&self.name).unwrap_or("");
        match &self.kind {
            MatcherKind::Equal(v) => value == v,
            MatcherKind::NotEqual(v) => value != v,
            MatcherKind::Regex(re) => re.is_match(value),
            MatcherKind::NotRegex(re) => !re.is_match(value),
        }
    }
}

fn compile_anchored(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| TsdbError::InvalidInput(format!("invalid matcher regex: {}", e)))
}
