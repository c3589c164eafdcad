// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for stevedore-environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use stevedore_core::pull::PullerConfig;
use stevedore_core::retry::RetryPolicy;

use crate::hooks::WaitPolicy;

/// Environment configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum package transfers in flight; negative means unbounded
    pub pull_parallel: i32,
    /// Total time spent retrying transient failures of one operation
    pub transient_timeout: Duration,
    /// Pause between transient retries
    pub retry_interval: Duration,
    /// Namespace hook jobs run in
    pub hook_namespace: String,
    /// Number of hook waits attempted across lost connections
    pub hook_wait_attempts: u32,
    /// Pause between hook wait attempts
    pub hook_wait_retry: Duration,
    /// Interval between hook job status polls
    pub hook_poll_interval: Duration,
    /// Scratch space for unpacking bundles
    pub data_dir: PathBuf,
}

fn parse_var<T: FromStr>(
    key: &'static str,
    default: &str,
    reason: &'static str,
) -> Result<T, ConfigError> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(key, reason))
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `STEVEDORE_PULL_PARALLEL`: Puller parallelism (default: -1)
    /// - `STEVEDORE_TRANSIENT_TIMEOUT_SECS`: Transient retry budget (default: 300)
    /// - `STEVEDORE_RETRY_INTERVAL_MS`: Transient retry interval (default: 1000)
    /// - `STEVEDORE_HOOK_NAMESPACE`: Hook job namespace (default: kube-system)
    /// - `STEVEDORE_HOOK_WAIT_ATTEMPTS`: Hook wait attempts (default: 60)
    /// - `STEVEDORE_HOOK_WAIT_RETRY_MS`: Hook wait retry interval (default: 5000)
    /// - `STEVEDORE_HOOK_POLL_MS`: Hook status poll interval (default: 1000)
    /// - `DATA_DIR`: Scratch directory (default: .data)
    pub fn from_env() -> Result<Self, ConfigError> {
        let pull_parallel: i32 =
            parse_var("STEVEDORE_PULL_PARALLEL", "-1", "must be an integer")?;

        let transient_timeout_secs: u64 = parse_var(
            "STEVEDORE_TRANSIENT_TIMEOUT_SECS",
            "300",
            "must be a number of seconds",
        )?;

        let retry_interval_ms: u64 = parse_var(
            "STEVEDORE_RETRY_INTERVAL_MS",
            "1000",
            "must be a number of milliseconds",
        )?;

        let hook_namespace = std::env::var("STEVEDORE_HOOK_NAMESPACE")
            .unwrap_or_else(|_| "kube-system".to_string());
        if hook_namespace.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "STEVEDORE_HOOK_NAMESPACE",
                "must not be empty",
            ));
        }

        let hook_wait_attempts: u32 = parse_var(
            "STEVEDORE_HOOK_WAIT_ATTEMPTS",
            "60",
            "must be a positive integer",
        )?;
        if hook_wait_attempts == 0 {
            return Err(ConfigError::Invalid(
                "STEVEDORE_HOOK_WAIT_ATTEMPTS",
                "must be a positive integer",
            ));
        }

        let hook_wait_retry_ms: u64 = parse_var(
            "STEVEDORE_HOOK_WAIT_RETRY_MS",
            "5000",
            "must be a number of milliseconds",
        )?;

        let hook_poll_ms: u64 = parse_var(
            "STEVEDORE_HOOK_POLL_MS",
            "1000",
            "must be a number of milliseconds",
        )?;

        let data_dir =
            PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| ".data".to_string()));

        Ok(Self {
            pull_parallel,
            transient_timeout: Duration::from_secs(transient_timeout_secs),
            retry_interval: Duration::from_millis(retry_interval_ms),
            hook_namespace,
            hook_wait_attempts,
            hook_wait_retry: Duration::from_millis(hook_wait_retry_ms),
            hook_poll_interval: Duration::from_millis(hook_poll_ms),
            data_dir,
        })
    }

    /// Transient failure retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: self.retry_interval,
            timeout: self.transient_timeout,
        }
    }

    /// Puller settings with the configured parallelism and retry policy.
    pub fn puller_config(&self) -> PullerConfig {
        PullerConfig {
            parallel: self.pull_parallel,
            retry: self.retry_policy(),
            ..PullerConfig::default()
        }
    }

    /// Hook wait reconnect policy.
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            attempts: self.hook_wait_attempts,
            interval: self.hook_wait_retry,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
