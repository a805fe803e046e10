//! The opaque configuration document handed through to passes.
//!
//! The framework treats configuration as a read-only structured document: a
//! JSON object keyed by pass name, where each pass interprets (and defaults)
//! its own section. An empty or null document means "defaults for every
//! pass". The framework itself recognizes nothing in it and never mutates it.
//!
//! ```rust
//! use dexopt::Configuration;
//! use serde_json::json;
//!
//! let config = Configuration::from_value(json!({
//!     "SynthPass": { "max_rounds": 3 }
//! }));
//! # let _ = config;
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{Error, Result};

/// Read-only configuration for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    doc: Value,
}

impl Configuration {
    /// A configuration meaning "defaults for every pass".
    #[must_use]
    pub fn empty() -> Self {
        Self { doc: Value::Null }
    }

    /// Wraps a structured document.
    #[must_use]
    pub fn from_value(doc: Value) -> Self {
        Self { doc }
    }

    /// The raw document.
    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.doc
    }

    /// Deserializes the options section for `pass`, falling back to
    /// `T::default()` when the section is absent or the whole document is
    /// empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a present section fails to
    /// deserialize - a misspelled or mistyped option should stop the run, not
    /// be silently ignored.
    pub fn pass_options<T>(&self, pass: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match self.doc.get(pass) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(section) => serde_json::from_value(section.clone())
                .map_err(|e| Error::Config(format!("invalid options for {pass}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::Configuration;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(default)]
    struct DemoOptions {
        rounds: usize,
        strict: bool,
    }

    impl Default for DemoOptions {
        fn default() -> Self {
            Self {
                rounds: 5,
                strict: false,
            }
        }
    }

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = Configuration::empty();
        let options: DemoOptions = config.pass_options("DemoPass").unwrap();
        assert_eq!(options, DemoOptions::default());
    }

    #[test]
    fn test_section_overrides_defaults() {
        let config = Configuration::from_value(json!({
            "DemoPass": { "rounds": 2 }
        }));
        let options: DemoOptions = config.pass_options("DemoPass").unwrap();
        assert_eq!(options.rounds, 2);
        assert!(!options.strict);
    }

    #[test]
    fn test_mistyped_section_is_an_error() {
        let config = Configuration::from_value(json!({
            "DemoPass": { "rounds": "many" }
        }));
        let result: crate::Result<DemoOptions> = config.pass_options("DemoPass");
        assert!(result.is_err());
    }
}
