//! Attribute filters shared by link, node and results lookups.
//!
//! A filter is a set of `key -> expected` pairs checked against the
//! attribute dictionary of a candidate element (`id`, `text`, `title`,
//! `class` and any other attribute). Every pair must pass for the element
//! to match; an empty expected value is skipped.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Attribute dictionary of an element.
pub type Attributes = BTreeMap<String, String>;

/// How an expected filter value is compared with the actual attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchMode {
    /// Actual value equals the expected one.
    #[default]
    Equal,
    /// Actual value differs from the expected one.
    NotEqual,
    /// Expected value is a substring of the actual one.
    In,
    /// Expected value is not a substring of the actual one.
    NotIn,
}

impl MatchMode {
    /// Compare one expected value with an actual attribute value.
    pub fn test(self, expected: &str, actual: &str) -> bool {
        match self {
            MatchMode::Equal => actual == expected,
            MatchMode::NotEqual => actual != expected,
            MatchMode::In => actual.contains(expected),
            MatchMode::NotIn => !actual.contains(expected),
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMode::Equal => write!(f, "EQUAL"),
            MatchMode::NotEqual => write!(f, "NOT_EQUAL"),
            MatchMode::In => write!(f, "IN"),
            MatchMode::NotIn => write!(f, "NOT_IN"),
        }
    }
}

impl FromStr for MatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "EQUAL" | "EQ" => Ok(MatchMode::Equal),
            "NOT_EQUAL" | "NE" => Ok(MatchMode::NotEqual),
            "IN" => Ok(MatchMode::In),
            "NOT_IN" => Ok(MatchMode::NotIn),
            other => Err(format!(
                "unknown match mode '{}' (expected EQUAL, NOT_EQUAL, IN or NOT_IN)",
                other
            )),
        }
    }
}

/// Check `attributes` against every `(key, expected)` pair in `filters`.
///
/// Empty expected values are skipped. A key missing from `attributes`
/// fails the whole match, whatever the mode. No filters means a match.
pub fn matches(
    attributes: &Attributes,
    filters: &BTreeMap<String, String>,
    mode: MatchMode,
) -> bool {
    filters.iter().all(|(key, expected)| {
        if expected.is_empty() {
            return true;
        }
        match attributes.get(key) {
            Some(actual) => mode.test(expected, actual),
            None => false,
        }
    })
}

/// A reusable set of criteria plus the mode used to compare them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub criteria: BTreeMap<String, String>,
    #[serde(default)]
    pub mode: MatchMode,
}

impl Filter {
    /// Create an empty filter (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a criterion.
    pub fn with(mut self, key: impl Into<String>, expected: impl Into<String>) -> Self {
        self.criteria.insert(key.into(), expected.into());
        self
    }

    /// Set the comparison mode.
    pub fn mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// Check an element's attributes against this filter.
    pub fn matches(&self, attributes: &Attributes) -> bool {
        matches(attributes, &self.criteria, self.mode)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Filter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            criteria: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            mode: MatchMode::Equal,
        }
    }
}
