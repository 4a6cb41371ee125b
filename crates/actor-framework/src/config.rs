//! # Configuration
//!
//! Plain serde structs with defaults. Every struct has a `validate()` that
//! constructors call, so an invalid value fails at startup with a [`ConfigError`]
//! instead of misbehaving later.
//!
//! | Struct | Used by | Validated |
//! |--------|---------|-----------|
//! | [`RunnerConfig`] | [`Runner`](crate::runner::Runner) | `workers > 0`, `max_resident > 0`, `retry_backoff > 0` |
//! | [`LineConfig`] | [`SimpleLine`](crate::line::SimpleLine), [`PerKbLine`](crate::line::PerKbLine) | probabilities in `[0, 1]`, `max_send >= 1` |

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_retry_backoff() -> Duration {
    Duration::from_millis(100)
}

/// Worker pool and residency settings for a runner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Number of worker tasks. Defaults to the number of available cores.
    pub workers: usize,
    /// Serialize actors into the store after every turn instead of keeping the live
    /// instance in memory. Requires every coroutine to be registered.
    pub persist_actors: bool,
    /// Upper bound on live actors kept in memory. Beyond it, idle actors are offered
    /// to the cacher.
    pub max_resident: Option<usize>,
    /// Pause between retries of a transient store failure.
    pub retry_backoff: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            persist_actors: false,
            max_resident: None,
            retry_backoff: default_retry_backoff(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        if self.max_resident == Some(0) {
            return Err(ConfigError::invalid("max_resident", "must be at least 1"));
        }
        if self.retry_backoff.is_zero() {
            return Err(ConfigError::invalid("retry_backoff", "must be positive"));
        }
        Ok(())
    }
}

/// Parameters of an unreliable line.
///
/// For [`PerKbLine`](crate::line::PerKbLine) every field except `max_send` and `seed`
/// is a per-kilobyte rate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    pub min_delay: Duration,
    pub max_jitter: Duration,
    pub drop_chance: f64,
    pub repeat_chance: f64,
    pub max_send: u32,
    pub seed: u64,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
            drop_chance: 0.0,
            repeat_chance: 0.0,
            max_send: 1,
            seed: 0,
        }
    }
}

impl LineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_probability("drop_chance", self.drop_chance)?;
        check_probability("repeat_chance", self.repeat_chance)?;
        if self.max_send == 0 {
            return Err(ConfigError::invalid("max_send", "must be at least 1"));
        }
        Ok(())
    }
}

fn check_probability(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("{value} is not a probability in [0, 1]"),
        ))
    }
}
