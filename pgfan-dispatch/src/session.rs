//! Session settings applied to every connection before it runs a search.
//!
//! Index tuning knobs such as `hnsw.ef_search` or `ivfflat.probes` are
//! per-session in PostgreSQL, so every pooled connection gets the same
//! `set name=value;` statement right after it connects.
//!
//! Values are written verbatim: names are not quoted and single quotes
//! inside string values are not escaped. Options come from the caller and
//! are trusted like the search template itself.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A session setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionValue {
    /// Boolean, written unquoted.
    Bool(bool),
    /// Integer, written unquoted.
    Int(i64),
    /// Float, written unquoted.
    Float(f64),
    /// String, written in single quotes.
    String(String),
}

impl fmt::Display for SessionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<bool> for SessionValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SessionValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for SessionValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for SessionValue {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for SessionValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SessionValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for SessionValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Named session settings, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionOptions {
    entries: IndexMap<String, SessionValue>,
}

impl SessionOptions {
    /// Create an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a setting, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SessionValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Add or replace a setting.
    ///
    /// Replacing keeps the setting's original position.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<SessionValue>) {
        self.entries.insert(name.into(), value.into());
    }

    /// Look up a setting.
    pub fn get(&self, name: &str) -> Option<&SessionValue> {
        self.entries.get(name)
    }

    /// Number of settings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no settings.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over settings in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SessionValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The statement to run on each new connection, if any.
    pub fn to_set_statements(&self) -> Option<String> {
        build_set_statements(Some(self))
    }
}

impl<K, V> FromIterator<(K, V)> for SessionOptions
where
    K: Into<String>,
    V: Into<SessionValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Build the session statement for `options`.
///
/// Returns `None` when there is nothing to set, so no statement is sent.
/// Otherwise each setting becomes `set <name>=<value>;` and the pieces are
/// joined with single spaces, in insertion order.
pub fn build_set_statements(options: Option<&SessionOptions>) -> Option<String> {
    let options = options.filter(|o| !o.is_empty())?;

    Some(
        options
            .iter()
            .map(|(name, value)| format!("set {}={};", name, value))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mixed_values() {
        let options = SessionOptions::new().with("a", 1).with("b", "x");
        assert_eq!(
            build_set_statements(Some(&options)).as_deref(),
            Some("set a=1; set b='x';")
        );
    }

    #[test]
    fn test_empty_or_absent() {
        assert_eq!(build_set_statements(None), None);
        assert_eq!(build_set_statements(Some(&SessionOptions::new())), None);
    }

    #[test]
    fn test_value_formatting() {
        assert_eq!(SessionValue::from(true).to_string(), "true");
        assert_eq!(SessionValue::from(40).to_string(), "40");
        assert_eq!(SessionValue::from(0.5).to_string(), "0.5");
        assert_eq!(SessionValue::from(2.0).to_string(), "2");
        assert_eq!(SessionValue::from("on").to_string(), "'on'");
    }

    #[test]
    fn test_quotes_not_escaped() {
        let options = SessionOptions::new().with("search_path", "it's");
        assert_eq!(
            options.to_set_statements().as_deref(),
            Some("set search_path='it's';")
        );
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut options = SessionOptions::new()
            .with("hnsw.ef_search", 40)
            .with("enable_seqscan", false);
        options.set("hnsw.ef_search", 200);

        assert_eq!(
            options.to_set_statements().as_deref(),
            Some("set hnsw.ef_search=200; set enable_seqscan=false;")
        );
    }

    #[test]
    fn test_deserialize_from_json() {
        let options: SessionOptions =
            serde_json::from_str(r#"{"ivfflat.probes": 10, "jit": "off"}"#).unwrap();
        assert_eq!(options.get("ivfflat.probes"), Some(&SessionValue::Int(10)));
        assert_eq!(
            options.to_set_statements().as_deref(),
            Some("set ivfflat.probes=10; set jit='off';")
        );
    }
}
