use std::{env, str::FromStr, time::Duration};

use crate::error::{CoordinatorError, Result};

pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What the coordinator does once a dispatched task expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Any expired task ends the round, whatever completed so far is aggregated.
    #[default]
    AbortOnAnyExpiry,
    /// Expired tasks are given up on, the round still waits for the live ones.
    ExcludeExpired,
}

/// What aggregation does when no task completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyRoundPolicy {
    /// Return an empty `RoundResult`.
    #[default]
    Empty,
    /// Fail with `CoordinatorError::NoResults`.
    Error,
}

/// Tunables for a dispatch and gather round.
#[derive(Debug, Clone)]
pub struct RoundConfig {
    /// How long a dispatched task may stay incomplete before it's considered expired.
    pub task_timeout: Duration,
    /// How recent a device's heartbeat must be for it to count as available.
    pub freshness_window: Duration,
    /// How often the expiry check runs while awaiting completions.
    pub poll_interval: Duration,
    pub timeout_policy: TimeoutPolicy,
    pub empty_policy: EmptyRoundPolicy,
    /// Identifier of this coordinator on the broker.
    pub consumer_id: u64,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            task_timeout: DEFAULT_TASK_TIMEOUT,
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout_policy: TimeoutPolicy::default(),
            empty_policy: EmptyRoundPolicy::default(),
            consumer_id: 0,
        }
    }
}

impl RoundConfig {
    /// Builds a config from the defaults overridden by `ROUND_*` environment variables.
    ///
    /// # Returns
    /// The config, or `InvalidInput` if a variable is set to something unparsable.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = read_var::<u64>("ROUND_TASK_TIMEOUT_MS")? {
            config.task_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = read_var::<u64>("ROUND_FRESHNESS_SECS")? {
            config.freshness_window = Duration::from_secs(secs);
        }
        if let Some(ms) = read_var::<u64>("ROUND_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(policy) = read_var::<String>("ROUND_TIMEOUT_POLICY")? {
            config.timeout_policy = match policy.as_str() {
                "abort" => TimeoutPolicy::AbortOnAnyExpiry,
                "exclude" => TimeoutPolicy::ExcludeExpired,
                other => return Err(invalid_var("ROUND_TIMEOUT_POLICY", other)),
            };
        }
        if let Some(policy) = read_var::<String>("ROUND_EMPTY_POLICY")? {
            config.empty_policy = match policy.as_str() {
                "empty" => EmptyRoundPolicy::Empty,
                "error" => EmptyRoundPolicy::Error,
                other => return Err(invalid_var("ROUND_EMPTY_POLICY", other)),
            };
        }
        if let Some(id) = read_var::<u64>("ROUND_CONSUMER_ID")? {
            config.consumer_id = id;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the intervals are usable.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(CoordinatorError::InvalidInput(
                "poll interval must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

fn read_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid_var(name, &value)),
        Err(_) => Ok(None),
    }
}

fn invalid_var(name: &str, value: &str) -> CoordinatorError {
    CoordinatorError::InvalidInput(format!("invalid value for {name}: {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_constants() {
        let config = RoundConfig::default();
        assert_eq!(config.task_timeout, Duration::from_secs(2));
        assert_eq!(config.freshness_window, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.timeout_policy, TimeoutPolicy::AbortOnAnyExpiry);
        assert_eq!(config.empty_policy, EmptyRoundPolicy::Empty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let config = RoundConfig {
            poll_interval: Duration::ZERO,
            ..RoundConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoordinatorError::InvalidInput(_))
        ));
    }
}
