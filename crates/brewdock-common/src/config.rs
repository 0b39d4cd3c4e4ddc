//! Tunables for building, tearing down, and supervising a stack.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for brewdock operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrewdockConfig {
    /// Grace period given to each container on stop, in seconds.
    pub stop_grace_secs: u64,
    /// Pause between teardown and rebuild during a reload, in milliseconds.
    pub reload_delay_ms: u64,
    /// First delay between removal-confirmation polls, in milliseconds.
    pub removal_initial_backoff_ms: u64,
    /// Upper bound of the removal-confirmation poll delay, in milliseconds.
    pub removal_max_backoff_ms: u64,
    /// Deadline for all containers of a stack to disappear, in seconds.
    pub removal_timeout_secs: u64,
    /// Timeout applied to wait strategies that do not set their own, in seconds.
    pub default_wait_timeout_secs: u64,
    /// Name of the scratch directory created under the context directory.
    pub scratch_dir_name: String,
    /// Name of the resolved-definition dump written into the context directory.
    pub dump_file_name: String,
}

impl Default for BrewdockConfig {
    fn default() -> Self {
        Self {
            stop_grace_secs: 5,
            reload_delay_ms: 5_000,
            removal_initial_backoff_ms: 100,
            removal_max_backoff_ms: 2_000,
            removal_timeout_secs: 60,
            default_wait_timeout_secs: 60,
            scratch_dir_name: crate::constants::SCRATCH_DIR_NAME.to_string(),
            dump_file_name: crate::constants::DUMP_FILE_NAME.to_string(),
        }
    }
}

impl BrewdockConfig {
    /// Stop grace period per component.
    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Delay between teardown and rebuild.
    #[must_use]
    pub const fn reload_delay(&self) -> Duration {
        Duration::from_millis(self.reload_delay_ms)
    }

    /// Removal-confirmation backoff policy.
    #[must_use]
    pub const fn removal_policy(&self) -> RemovalPolicy {
        RemovalPolicy {
            initial_backoff: Duration::from_millis(self.removal_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.removal_max_backoff_ms),
            timeout: Duration::from_secs(self.removal_timeout_secs),
        }
    }

    /// Default wait-strategy timeout.
    #[must_use]
    pub const fn default_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.default_wait_timeout_secs)
    }
}

/// Bounded exponential backoff used while confirming container removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalPolicy {
    /// Delay before the second poll.
    pub initial_backoff: Duration,
    /// Maximum delay between polls.
    pub max_backoff: Duration,
    /// Total time allowed before giving up.
    pub timeout: Duration,
}

impl RemovalPolicy {
    /// Returns the delay that follows `current`.
    #[must_use]
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = BrewdockConfig::default();
        assert_eq!(cfg.stop_grace(), Duration::from_secs(5));
        assert_eq!(cfg.reload_delay(), Duration::from_secs(5));
        assert_eq!(cfg.scratch_dir_name, "brewdock_temp");
    }

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let policy = BrewdockConfig::default().removal_policy();
        let mut delay = policy.initial_backoff;
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(delay);
            delay = policy.next_backoff(delay);
        }
        assert_eq!(seen[1], Duration::from_millis(200));
        assert_eq!(*seen.last().expect("delay"), Duration::from_secs(2));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: BrewdockConfig =
            serde_json::from_str(r#"{"stop_grace_secs": 1}"#).expect("deserialize");
        assert_eq!(cfg.stop_grace_secs, 1);
        assert_eq!(cfg.removal_timeout_secs, 60);
    }
}
