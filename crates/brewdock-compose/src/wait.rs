//! Readiness strategies.
//!
//! A `waitFor` block carries a `strategy` discriminator and an optional
//! `waitForStrategy` parameter object. The parameters are decoded only
//! once the discriminator is known, so each variant of [`WaitStrategy`]
//! holds exactly its own settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Readiness check that gates when a created container is considered ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWaitFor", into = "RawWaitFor")]
pub enum WaitStrategy {
    /// Wait until a pattern appears in the container logs.
    LogPattern(LogWait),
    /// Wait until an HTTP endpoint answers with the expected status.
    HttpCheck(HttpWait),
    /// Wait until the container's own health check reports healthy.
    HealthCheck(HealthCheckWait),
    /// Wait until a port accepts TCP connections.
    PortOpen(PortWait),
}

impl WaitStrategy {
    /// Returns the discriminator used in definition documents.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::LogPattern(_) => "log",
            Self::HttpCheck(_) => "http",
            Self::HealthCheck(_) => "healthcheck",
            Self::PortOpen(_) => "port",
        }
    }

    /// Returns the timeout set on the strategy, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        let secs = match self {
            Self::LogPattern(w) => w.timeout_secs,
            Self::HttpCheck(w) => w.timeout_secs,
            Self::HealthCheck(w) => w.timeout_secs,
            Self::PortOpen(w) => w.timeout_secs,
        };
        secs.map(Duration::from_secs)
    }
}

/// Parameters of the `log` strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LogWait {
    /// Text or regular expression to look for.
    pub log: String,
    /// Number of matches required.
    #[serde(default = "default_occurrence")]
    pub occurrence: usize,
    /// Whether `log` is a regular expression.
    #[serde(default)]
    pub is_regexp: bool,
    /// Timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Parameters of the `http` strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpWait {
    /// Container port to probe, e.g. `8080/tcp`.
    pub port: String,
    /// Request path.
    #[serde(default = "default_path")]
    pub path: String,
    /// Expected status code.
    #[serde(default = "default_status")]
    pub status_code: u16,
    /// HTTP method.
    #[serde(default = "default_method")]
    pub method: String,
    /// Whether to use HTTPS (certificates are not verified).
    #[serde(default)]
    pub tls: bool,
    /// Timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Parameters of the `healthcheck` strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HealthCheckWait {
    /// Timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Parameters of the `port` strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PortWait {
    /// Container port to probe, e.g. `5432/tcp`.
    pub port: String,
    /// Timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

const fn default_occurrence() -> usize {
    1
}

fn default_path() -> String {
    "/".to_string()
}

const fn default_status() -> u16 {
    200
}

fn default_method() -> String {
    "GET".to_string()
}

/// Failure to turn a `waitFor` block into a [`WaitStrategy`].
#[derive(Debug, Error)]
pub enum WaitDecodeError {
    /// The discriminator names no known strategy.
    #[error("unknown wait strategy \"{0}\" (expected log, http, healthcheck or port)")]
    UnknownStrategy(String),
    /// The parameters do not fit the named strategy.
    #[error("invalid parameters for wait strategy \"{strategy}\": {message}")]
    Params {
        /// Discriminator that was decoded.
        strategy: String,
        /// Decoder message.
        message: String,
    },
}

/// Wire shape of a `waitFor` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawWaitFor {
    strategy: String,
    #[serde(
        default,
        rename = "waitForStrategy",
        skip_serializing_if = "Option::is_none"
    )]
    params: Option<serde_yaml::Value>,
}

fn decode_params<T: serde::de::DeserializeOwned>(
    strategy: &str,
    params: Option<serde_yaml::Value>,
) -> Result<T, WaitDecodeError> {
    let value = params.unwrap_or_else(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    serde_yaml::from_value(value).map_err(|e| WaitDecodeError::Params {
        strategy: strategy.to_string(),
        message: e.to_string(),
    })
}

impl TryFrom<RawWaitFor> for WaitStrategy {
    type Error = WaitDecodeError;

    fn try_from(raw: RawWaitFor) -> Result<Self, Self::Error> {
        let strategy = raw.strategy.as_str();
        match strategy {
            "log" => decode_params(strategy, raw.params).map(Self::LogPattern),
            "http" => decode_params(strategy, raw.params).map(Self::HttpCheck),
            "healthcheck" => decode_params(strategy, raw.params).map(Self::HealthCheck),
            "port" => decode_params(strategy, raw.params).map(Self::PortOpen),
            other => Err(WaitDecodeError::UnknownStrategy(other.to_string())),
        }
    }
}

impl From<WaitStrategy> for RawWaitFor {
    fn from(strategy: WaitStrategy) -> Self {
        let kind = strategy.kind().to_string();
        let params = match strategy {
            WaitStrategy::LogPattern(p) => serde_yaml::to_value(p),
            WaitStrategy::HttpCheck(p) => serde_yaml::to_value(p),
            WaitStrategy::HealthCheck(p) => serde_yaml::to_value(p),
            WaitStrategy::PortOpen(p) => serde_yaml::to_value(p),
        };
        Self {
            strategy: kind,
            params: params.ok(),
        }
    }
}
