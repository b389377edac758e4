//! Configuration file management for tlsbatch.
//!
//! Settings are layered, later layers winning:
//!
//! 1. Default values
//! 2. Configuration file (`tlsbatch.toml` in the working directory, or `--config`)
//! 3. Command-line arguments
//!
//! # Example Configuration File
//!
//! ```toml
//! input = "hosts.txt"
//! output = "report.csv"
//! workers = 20
//! queue_capacity = 200
//! timeout_secs = 5
//! flush_interval_ms = 1000
//! summary = "text"
//! exit_code = 2
//!
//! [prometheus]
//! enabled = true
//! address = "http://localhost:9091"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::pipeline::PipelineConfig;

/// Name of the configuration file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tlsbatch.toml";

/// Main configuration structure.
///
/// All fields are optional so partial configurations can be merged.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Task list, one host or URL per line; `-` for stdin
    pub input: Option<String>,
    /// Result table path; `-` for stdout
    pub output: Option<String>,
    /// Number of concurrent workers
    pub workers: Option<usize>,
    /// Pending tasks buffered before reading pauses
    pub queue_capacity: Option<usize>,
    /// Per-host deadline in seconds
    pub timeout_secs: Option<u64>,
    /// Output flush cadence in milliseconds
    pub flush_interval_ms: Option<u64>,
    /// Run summary format: text, json, none
    pub summary: Option<String>,
    /// Exit code to use when at least one host is BAD
    pub exit_code: Option<i32>,
    pub prometheus: Option<PrometheusConfig>,
}

/// Prometheus Push Gateway settings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PrometheusConfig {
    pub enabled: Option<bool>,
    /// Push gateway address (e.g., "http://localhost:9091")
    pub address: Option<String>,
}

impl Default for Config {
    /// Defaults match the classic `input.txt` -> `output.csv` batch run.
    fn default() -> Self {
        let pipeline = PipelineConfig::default();
        Config {
            input: Some("input.txt".to_string()),
            output: Some("output.csv".to_string()),
            workers: Some(pipeline.pool_size),
            queue_capacity: Some(pipeline.queue_capacity),
            timeout_secs: Some(pipeline.timeout.as_secs()),
            flush_interval_ms: Some(pipeline.flush_interval.as_millis() as u64),
            summary: Some("text".to_string()),
            exit_code: Some(0),
            prometheus: Some(PrometheusConfig {
                enabled: Some(false),
                address: Some("http://localhost:9091".to_string()),
            }),
        }
    }
}

impl Config {
    /// Configuration with every field unset; the starting point for CLI overrides.
    pub fn empty() -> Self {
        Config {
            input: None,
            output: None,
            workers: None,
            queue_capacity: None,
            timeout_secs: None,
            flush_interval_ms: None,
            summary: None,
            exit_code: None,
            prometheus: None,
        }
    }

    /// Loads configuration from a TOML file.
    ///
    /// ```no_run
    /// # use tlsbatch::config::Config;
    /// let config = Config::from_file("tlsbatch.toml")?;
    /// # Ok::<(), tlsbatch::config::ConfigError>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    /// Reads the explicitly requested file, or `tlsbatch.toml` when present.
    ///
    /// A missing default file is not an error; a missing explicit one is.
    pub fn discover(explicit: Option<&Path>) -> Result<Option<Self>, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path).map(Some),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(DEFAULT_CONFIG_FILE).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Merges this configuration with another, prioritizing the other's values.
    pub fn merge_with(mut self, other: Config) -> Self {
        if other.input.is_some() {
            self.input = other.input;
        }
        if other.output.is_some() {
            self.output = other.output;
        }
        if other.workers.is_some() {
            self.workers = other.workers;
        }
        if other.queue_capacity.is_some() {
            self.queue_capacity = other.queue_capacity;
        }
        if other.timeout_secs.is_some() {
            self.timeout_secs = other.timeout_secs;
        }
        if other.flush_interval_ms.is_some() {
            self.flush_interval_ms = other.flush_interval_ms;
        }
        if other.summary.is_some() {
            self.summary = other.summary;
        }
        if other.exit_code.is_some() {
            self.exit_code = other.exit_code;
        }
        if let Some(other_prom) = other.prometheus {
            if let Some(ref mut self_prom) = self.prometheus {
                if other_prom.enabled.is_some() {
                    self_prom.enabled = other_prom.enabled;
                }
                if other_prom.address.is_some() {
                    self_prom.address = other_prom.address;
                }
            } else {
                self.prometheus = Some(other_prom);
            }
        }
        self
    }

    /// Pipeline tunables, falling back to defaults for unset fields.
    pub fn pipeline(&self) -> Result<PipelineConfig, ConfigError> {
        let defaults = PipelineConfig::default();
        let config = PipelineConfig {
            pool_size: self.workers.unwrap_or(defaults.pool_size),
            queue_capacity: self.queue_capacity.unwrap_or(defaults.queue_capacity),
            timeout: self
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            flush_interval: self
                .flush_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.flush_interval),
        };
        config
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        Ok(config)
    }

    /// Prometheus push gateway address when pushing is enabled.
    pub fn prometheus_address(&self) -> Option<&str> {
        let prometheus = self.prometheus.as_ref()?;
        if prometheus.enabled.unwrap_or(false) {
            prometheus.address.as_deref()
        } else {
            None
        }
    }

    /// Generates an example configuration file in TOML format.
    ///
    /// ```
    /// # use tlsbatch::config::Config;
    /// let example = Config::example_toml();
    /// assert!(example.contains("workers"));
    /// ```
    pub fn example_toml() -> String {
        let example = Config {
            input: Some("hosts.txt".to_string()),
            output: Some("report.csv".to_string()),
            workers: Some(20),
            queue_capacity: Some(200),
            timeout_secs: Some(5),
            flush_interval_ms: Some(1000),
            summary: Some("text".to_string()),
            exit_code: Some(2),
            prometheus: Some(PrometheusConfig {
                enabled: Some(true),
                address: Some("http://localhost:9091".to_string()),
            }),
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error (file not found, permission denied, etc.)
    Io(String),
    /// TOML parsing error (invalid syntax, type mismatch, etc.)
    Parse(String),
    /// Validation error (zero workers, zero timeout, etc.)
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "IO Error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Parse Error: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
