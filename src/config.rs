//! Instrumentation configuration
//!
//! Configuration reaches the weaver from two places:
//! - A `tejer.toml` file with `enabled` and `annotations` keys
//! - Repeated `KEY=VALUE` plugin options, processed one at a time the way a
//!   compiler plugin's command-line processor receives them
//!
//! # Example tejer.toml
//!
//! ```toml
//! enabled = true
//! annotations = ["org.example.DebugLog", "org.example.Timed"]
//! ```
//!
//! A configuration with `enabled = true` and no annotations is rejected by
//! [`InstrumentationConfig::validate`] before any method is processed.

use crate::method::normalize_annotation;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Plugin option key toggling instrumentation
pub const OPTION_ENABLED: &str = "enabled";

/// Plugin option key appending one marker annotation
pub const OPTION_ANNOTATIONS: &str = "annotations";

/// Configuration errors; all of them are fatal for the whole pass
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("method tracing is enabled, but no annotations were set")]
    EmptyMarkers,

    #[error("unexpected config option {0}")]
    UnexpectedOption(String),

    #[error("invalid value {value:?} for option {option} (expected true or false)")]
    InvalidValue { option: String, value: String },

    #[error("malformed plugin option {0:?}: expected KEY=VALUE")]
    MalformedOption(String),
}

/// `{ enabled, markers }` as consumed by the selector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstrumentationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Fully-qualified marker annotation names, in configuration order
    #[serde(default, alias = "annotations")]
    pub markers: Vec<String>,
}

impl InstrumentationConfig {
    pub fn new(enabled: bool, markers: Vec<String>) -> Self {
        Self { enabled, markers }
    }

    /// Enabled configuration selecting the given markers
    pub fn enabled_with<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: true,
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Self::from_toml_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML")
    }

    /// Apply one plugin option
    ///
    /// `enabled` overwrites the flag; `annotations` appends to the marker
    /// list. Any other key is rejected.
    pub fn apply_option(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key.trim() {
            OPTION_ENABLED => {
                self.enabled = parse_bool(value).ok_or_else(|| ConfigError::InvalidValue {
                    option: OPTION_ENABLED.to_string(),
                    value: value.to_string(),
                })?;
            }
            OPTION_ANNOTATIONS => {
                self.markers.push(value.trim().to_string());
            }
            other => return Err(ConfigError::UnexpectedOption(other.to_string())),
        }
        Ok(())
    }

    /// Apply a `KEY=VALUE` plugin option string
    pub fn apply_option_str(&mut self, option: &str) -> Result<(), ConfigError> {
        let (key, value) = option
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedOption(option.to_string()))?;
        self.apply_option(key, value)
    }

    /// Reject `enabled = true` with an empty marker list
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.markers.iter().all(|m| m.trim().is_empty()) {
            return Err(ConfigError::EmptyMarkers);
        }
        Ok(())
    }

    /// Whether `annotation` is one of the configured markers
    pub fn is_marker(&self, annotation: &str) -> bool {
        let annotation = normalize_annotation(annotation);
        self.markers
            .iter()
            .any(|m| normalize_annotation(m) == annotation)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
