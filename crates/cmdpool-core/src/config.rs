//! Pool configuration.
//!
//! Read from the environment:
//! - `CMDPOOL_WORKERS`: number of workers (default: available parallelism)
//! - `CMDPOOL_TIMEOUT_MS`: deadline relative to pool construction
//! - `CMDPOOL_DEADLINE`: absolute RFC 3339 deadline
//!
//! When both a timeout and a deadline are given the earlier one applies.

use std::env;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::domain::PoolError;

pub const ENV_WORKERS: &str = "CMDPOOL_WORKERS";
pub const ENV_TIMEOUT_MS: &str = "CMDPOOL_TIMEOUT_MS";
pub const ENV_DEADLINE: &str = "CMDPOOL_DEADLINE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout_ms: None,
            deadline: None,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

impl PoolConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, PoolError> {
        Self::from_lookup(env_opt)
    }

    /// Build config from any key lookup (the environment, a map in tests, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PoolError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_WORKERS) {
            let workers: usize = raw
                .trim()
                .parse()
                .map_err(|e| PoolError::Config(format!("{ENV_WORKERS}={raw:?}: {e}")))?;
            if workers == 0 {
                return Err(PoolError::InvalidWorkerCount(0));
            }
            config.workers = workers;
        }

        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            let ms = raw
                .trim()
                .parse()
                .map_err(|e| PoolError::Config(format!("{ENV_TIMEOUT_MS}={raw:?}: {e}")))?;
            config.timeout_ms = Some(ms);
        }

        if let Some(raw) = lookup(ENV_DEADLINE) {
            let deadline = DateTime::parse_from_rfc3339(raw.trim())
                .map_err(|e| PoolError::Config(format!("{ENV_DEADLINE}={raw:?}: {e}")))?;
            config.deadline = Some(deadline.with_timezone(&Utc));
        }

        Ok(config)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Resolve the configured timeout/deadline into a monotonic instant, measured from now.
    ///
    /// A bound too far away to represent is treated as no bound.
    pub fn deadline_instant(&self) -> Option<Instant> {
        let now = Instant::now();
        let from_timeout = self
            .timeout_ms
            .and_then(|ms| now.checked_add(Duration::from_millis(ms)));
        let from_deadline = self
            .deadline
            .and_then(|at| now.checked_add(remaining_until(at)));

        match (from_timeout, from_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Wall-clock time left until `at`; zero if it is already in the past.
pub fn remaining_until(at: DateTime<Utc>) -> Duration {
    (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}
