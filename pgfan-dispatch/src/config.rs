//! Dispatch options that are usually fixed per deployment.
//!
//! ```toml
//! max_concurrency = 8
//!
//! [session]
//! "hnsw.ef_search" = 100
//! jit = "off"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};
use crate::session::{SessionOptions, SessionValue};

/// Default upper bound on concurrently running queries.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Concurrency and session settings shared by many dispatch calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchOptions {
    /// Maximum number of concurrently running queries (and pooled
    /// connections) per call.
    pub max_concurrency: usize,
    /// Settings applied to every connection before it runs a search.
    pub session: SessionOptions,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            session: SessionOptions::new(),
        }
    }
}

impl DispatchOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum concurrency.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Add a session setting.
    #[must_use]
    pub fn with_session(mut self, name: impl Into<String>, value: impl Into<SessionValue>) -> Self {
        self.session.set(name, value);
        self
    }

    /// Parse options from TOML text.
    pub fn from_toml_str(content: &str) -> DispatchResult<Self> {
        let options: Self = toml::from_str(content)
            .map_err(|e| DispatchError::config(format!("invalid dispatch options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> DispatchResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DispatchError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Check the options are usable.
    pub fn validate(&self) -> DispatchResult<()> {
        if self.max_concurrency == 0 {
            return Err(DispatchError::config(
                "max concurrency must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let options = DispatchOptions::default();
        assert_eq!(options.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert!(options.session.is_empty());
    }

    #[test]
    fn test_from_toml() {
        let options = DispatchOptions::from_toml_str(
            r#"
            max_concurrency = 8

            [session]
            "hnsw.ef_search" = 100
            jit = "off"
            "#,
        )
        .unwrap();

        assert_eq!(options.max_concurrency, 8);
        assert_eq!(
            options.session.to_set_statements().as_deref(),
            Some("set hnsw.ef_search=100; set jit='off';")
        );
    }

    #[test]
    fn test_from_toml_rejects_zero_concurrency() {
        let err = DispatchOptions::from_toml_str("max_concurrency = 0").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        assert!(DispatchOptions::from_toml_str("threads = 3").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pgfan.toml");
        std::fs::write(&path, "[session]\n\"ivfflat.probes\" = 10\n").unwrap();

        let options = DispatchOptions::from_file(&path).unwrap();
        assert_eq!(options.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(
            options.session.get("ivfflat.probes"),
            Some(&SessionValue::Int(10))
        );
    }
}
