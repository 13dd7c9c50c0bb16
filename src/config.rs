//! Configuration loading and validation.
//!
//! Every section is optional. Missing values fall back to the defaults the
//! service has always run with (127 visits per 60 s cycle, 5 minute bans,
//! 50 visits restored per cycle).

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0}")]
    OutOfRange(ValidationError),
    #[error("invalid configuration: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

/// Validation errors for configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("persistence.ban_list_path must not be empty")]
    BanListPathEmpty,
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Visit counting and ban parameters.
    #[serde(default)]
    pub guard: GuardConfig,
    /// Permanent ban list persistence.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Optional country allow-list.
    #[serde(default)]
    pub country_mask: CountryMaskConfig,
    /// HTTP listener.
    #[serde(default)]
    pub http: HttpConfig,
    /// Log output.
    #[serde(default)]
    pub log: LogConfig,
}

/// Visit counting and ban parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    /// Visits allowed per cycle before a ban, `[0, 127]`.
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Sweep interval in seconds, `[1, 3600]`.
    #[serde(default = "default_cycle_seconds")]
    pub cycle_seconds: i64,
    /// Ban length in minutes when the limit is hit, `[1, 127]`.
    #[serde(default = "default_ban_minutes")]
    pub ban_minutes: i64,
    /// Visits restored to every counter on each sweep, `[1, 127]`.
    #[serde(default = "default_per_cycle_allowance")]
    pub per_cycle_allowance: i64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            cycle_seconds: default_cycle_seconds(),
            ban_minutes: default_ban_minutes(),
            per_cycle_allowance: default_per_cycle_allowance(),
        }
    }
}

fn default_limit() -> i64 {
    127
}

fn default_cycle_seconds() -> i64 {
    60
}

fn default_ban_minutes() -> i64 {
    5
}

fn default_per_cycle_allowance() -> i64 {
    50
}

/// Permanent ban list persistence.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Gzip file holding 4-byte permanently banned addresses.
    #[serde(default = "default_ban_list_path")]
    pub ban_list_path: PathBuf,
    /// Refuse to start when the ban list exists but cannot be decoded.
    /// When false, startup continues with no permanent bans.
    #[serde(default)]
    pub abort_on_corrupt: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            ban_list_path: default_ban_list_path(),
            abort_on_corrupt: false,
        }
    }
}

fn default_ban_list_path() -> PathBuf {
    PathBuf::from("data/ban_ip.gz")
}

/// Country allow-list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CountryMaskConfig {
    /// Line-delimited CIDR file. Unset or missing file means no index.
    pub path: Option<PathBuf>,
    /// Reject addresses outside the loaded ranges. Off by default: the
    /// index is consulted and logged but never blocks.
    #[serde(default)]
    pub enforce: bool,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Address to bind to (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Serve `/metrics` for Prometheus.
    #[serde(default = "default_true")]
    pub metrics: bool,
    /// Take the client address from the first `X-Forwarded-For` entry.
    /// Only enable behind a trusted reverse proxy.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            metrics: true,
            trust_forwarded_for: false,
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_true() -> bool {
    true
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Log configuration. Levels come from `RUST_LOG`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate a configuration, returning all errors found.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = self.guard.range_errors();

        let ban_list = &self.persistence.ban_list_path;
        if ban_list.as_os_str().is_empty() {
            errors.push(ValidationError::BanListPathEmpty);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl GuardConfig {
    /// Range checks shared by `Config::validate` and `GuardSettings`.
    pub(crate) fn range_errors(&self) -> Vec<ValidationError> {
        [
            check_range("guard.limit", self.limit, 0, 127),
            check_range("guard.cycle_seconds", self.cycle_seconds, 1, 3600),
            check_range("guard.ban_minutes", self.ban_minutes, 1, 127),
            check_range("guard.per_cycle_allowance", self.per_cycle_allowance, 1, 127),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

pub(crate) fn check_range(
    field: &'static str,
    value: i64,
    min: i64,
    max: i64,
) -> Option<ValidationError> {
    (!(min..=max).contains(&value)).then_some(ValidationError::OutOfRange {
        field,
        value,
        min,
        max,
    })
}
