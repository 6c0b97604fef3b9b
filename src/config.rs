//! Run configuration.
//!
//! The surface mirrors the classic module parameters: `timeout`, `wait`,
//! `source`, `target` and `delay`. [`Config::apply_param`] accepts them in
//! `key=value` form so the binary can take them positionally.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::invoke::Completion;

/// Logical CPU number as the OS numbers it.
pub type CoreId = usize;

/// Configuration for one `IpiStorm` run. Fixed before any task starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Run duration in seconds (default: 10).
    pub timeout_secs: u64,

    /// Whether each remote call blocks until the target ran it
    /// (default: `Wait`).
    ///
    /// `Posted` times only the posting cost; the timestamp read right after
    /// may be stale or not yet written.
    pub completion: Completion,

    /// Core issuing the calls (default: 0).
    pub source: CoreId,

    /// Core receiving the calls (default: 1). Must differ from `source`.
    pub target: CoreId,

    /// Randomized pause between calls in microseconds (default: 0 = none).
    ///
    /// Each pause is drawn uniformly from `[delay_us, delay_us + 1)` µs.
    pub delay_us: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            completion: Completion::Wait,
            source: 0,
            target: 1,
            delay_us: 0,
        }
    }
}

impl Config {
    /// Check the configuration before any thread is created.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source == self.target {
            return Err(ConfigError::SameCore { core: self.source });
        }
        Ok(())
    }

    /// Apply one `key=value` parameter.
    ///
    /// Keys: `timeout`, `wait`, `source`, `target`, `delay`. `wait` takes
    /// kernel-style booleans (`y`/`n`, `1`/`0`, `on`/`off`, `true`/`false`).
    pub fn apply_param(&mut self, param: &str) -> Result<(), ConfigError> {
        let (key, value) = param
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedParam(param.to_string()))?;
        let key = key.trim();
        let value = value.trim();

        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "timeout" => self.timeout_secs = value.parse().map_err(|_| invalid())?,
            "wait" => self.completion = Completion::from_wait(parse_bool(value).ok_or_else(invalid)?),
            "source" => self.source = value.parse().map_err(|_| invalid())?,
            "target" => self.target = value.parse().map_err(|_| invalid())?,
            "delay" => self.delay_us = value.parse().map_err(|_| invalid())?,
            _ => return Err(ConfigError::UnknownParam(key.to_string())),
        }
        Ok(())
    }
}

/// Parse a kernel-style boolean.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "1" | "on" | "true" => Some(true),
        "n" | "no" | "0" | "off" | "false" => Some(false),
        _ => None,
    }
}

/// Configuration rejected before the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Source and target name the same core.
    SameCore {
        /// The core named twice.
        core: CoreId,
    },
    /// Parameter key not recognised.
    UnknownParam(String),
    /// Parameter not in `key=value` form.
    MalformedParam(String),
    /// Value could not be parsed for its key.
    InvalidValue {
        /// Parameter key.
        key: String,
        /// Rejected value.
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::SameCore { core } => {
                write!(f, "source and target must be different cores (both are CPU {})", core)
            }
            ConfigError::UnknownParam(key) => write!(f, "unknown parameter '{}'", key),
            ConfigError::MalformedParam(raw) => {
                write!(f, "parameter '{}' is not of the form key=value", raw)
            }
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value '{}' for parameter '{}'", value, key)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
