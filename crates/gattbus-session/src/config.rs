//! Session timing and health policy.
//!
//! Every duration serializes as integer milliseconds under a `_ms` key so a
//! JSON override file reads naturally:
//!
//! ```json
//! { "exchange_timeout_ms": 2000, "backoff_ms": [0, 500, 1500] }
//! ```

use std::time::Duration;

use gattbus_protocol::GroupId;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::error::{Result, SessionError};

/// Tunable session policy. Missing JSON keys keep their defaults.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Connection attempts per `connect` call.
    pub connect_attempts: u32,
    /// Delay before attempt *n*; the last entry repeats.
    #[serde(rename = "backoff_ms")]
    #[serde_as(as = "Vec<DurationMilliSeconds<u64>>")]
    pub backoff: Vec<Duration>,
    /// Link budget (ATT MTU) the device must grant exactly.
    pub link_budget: u16,

    #[serde(rename = "connect_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
    #[serde(rename = "discovery_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub discovery_timeout: Duration,
    #[serde(rename = "mtu_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub mtu_timeout: Duration,
    #[serde(rename = "notify_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub notify_timeout: Duration,
    #[serde(rename = "disconnect_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub disconnect_timeout: Duration,

    /// Wait for one matching response.
    #[serde(rename = "exchange_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub exchange_timeout: Duration,
    /// Bound on the whole initial read round.
    #[serde(rename = "initial_read_window_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_read_window: Duration,
    /// Bound on one write transaction; a bulk apply gets this times its count.
    #[serde(rename = "transaction_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub transaction_timeout: Duration,

    #[serde(rename = "tick_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub tick: Duration,
    /// Silence after which notifications are resubscribed.
    #[serde(rename = "watchdog_silence_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub watchdog_silence: Duration,
    /// First-due offsets per group, in priority order.
    #[serde(rename = "stagger_ms")]
    #[serde_as(as = "Vec<DurationMilliSeconds<u64>>")]
    pub stagger: Vec<Duration>,
    /// Delay before reconnecting after an unexpected drop or health trigger.
    #[serde(rename = "reconnect_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reconnect_delay: Duration,

    pub invalid_frame_threshold: u32,
    pub run_state_threshold: u32,
    pub temperature_threshold: u32,
    pub constant_threshold: u32,
    /// Largest difference between the two temperature readings that still agrees.
    pub temperature_tolerance_c: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            backoff: ms(&[0, 1000, 3000, 5000]),
            link_budget: 247,
            connect_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(5),
            mtu_timeout: Duration::from_secs(3),
            notify_timeout: Duration::from_secs(3),
            disconnect_timeout: Duration::from_secs(2),
            exchange_timeout: Duration::from_millis(1500),
            initial_read_window: Duration::from_secs(12),
            transaction_timeout: Duration::from_secs(5),
            tick: Duration::from_millis(40),
            watchdog_silence: Duration::from_secs(5),
            stagger: ms(&[0, 120, 240, 740, 1240, 1740, 4000]),
            reconnect_delay: Duration::from_secs(2),
            invalid_frame_threshold: 5,
            run_state_threshold: 3,
            temperature_threshold: 3,
            constant_threshold: 3,
            temperature_tolerance_c: 3,
        }
    }
}

impl SessionConfig {
    /// Parse a JSON override document on top of the defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| SessionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_attempts == 0 {
            return Err(SessionError::Config("connect_attempts must be at least 1".into()));
        }
        if self.backoff.is_empty() {
            return Err(SessionError::Config("backoff_ms must not be empty".into()));
        }
        if self.stagger.len() != GroupId::ALL.len() {
            return Err(SessionError::Config(format!(
                "stagger_ms needs {} entries, got {}",
                GroupId::ALL.len(),
                self.stagger.len()
            )));
        }
        if self.tick.is_zero() || self.exchange_timeout.is_zero() {
            return Err(SessionError::Config("tick and exchange timeout must be nonzero".into()));
        }
        for (name, value) in [
            ("invalid_frame_threshold", self.invalid_frame_threshold),
            ("run_state_threshold", self.run_state_threshold),
            ("temperature_threshold", self.temperature_threshold),
            ("constant_threshold", self.constant_threshold),
        ] {
            if value == 0 {
                return Err(SessionError::Config(format!("{name} must be at least 1")));
            }
        }
        Ok(())
    }

    /// Delay before the zero-based `attempt`.
    pub fn backoff_before(&self, attempt: usize) -> Duration {
        self.backoff
            .get(attempt)
            .or(self.backoff.last())
            .copied()
            .unwrap_or_default()
    }

    pub fn stagger_for(&self, group: GroupId) -> Duration {
        self.stagger.get(group as usize).copied().unwrap_or_default()
    }
}

fn ms(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_millis).collect()
}
