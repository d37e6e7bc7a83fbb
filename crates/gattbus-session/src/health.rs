//! Link health heuristics.
//!
//! Every anomaly is tracked by a [`StreakCounter`] that resets on the next
//! good sample. A streak reaching its threshold yields a
//! [`ReconnectReason`]; the controller decides what to do with it.

use std::fmt;
use std::time::Duration;

use gattbus_protocol::{DeviceStatusSnapshot, ParsedFrame};
use serde::Serialize;
use tokio::time::Instant;

use crate::config::SessionConfig;

/// Why the controller is tearing the link down and reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    /// The link went down without a caller disconnect.
    LinkDropped { status: u8 },
    /// Notifications stayed silent and resubscribing failed.
    Silence,
    InvalidFrames,
    AmbiguousRunState,
    TemperatureMismatch,
    NonzeroConstants,
}

impl fmt::Display for ReconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconnectReason::LinkDropped { status } => {
                write!(f, "link dropped (status {status})")
            }
            ReconnectReason::Silence => f.write_str("notifications silent after resubscribe"),
            ReconnectReason::InvalidFrames => f.write_str("consecutive invalid frames"),
            ReconnectReason::AmbiguousRunState => f.write_str("consecutive ambiguous run states"),
            ReconnectReason::TemperatureMismatch => {
                f.write_str("consecutive temperature mismatches")
            }
            ReconnectReason::NonzeroConstants => f.write_str("consecutive nonzero constant fields"),
        }
    }
}

/// Counts consecutive anomalies; any good sample resets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakCounter {
    count: u32,
    threshold: u32,
}

impl StreakCounter {
    pub const fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold,
        }
    }

    /// Record one sample. Returns true when the streak reaches the
    /// threshold, after which the counter starts over.
    pub fn record(&mut self, anomalous: bool) -> bool {
        if !anomalous {
            self.count = 0;
            return false;
        }
        self.count += 1;
        if self.count >= self.threshold {
            self.count = 0;
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Point-in-time view of the health record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HealthReport {
    pub invalid_frames: u32,
    pub ambiguous_run_states: u32,
    pub temperature_mismatches: u32,
    pub nonzero_constants: u32,
    pub desync: bool,
    pub frames_received: u64,
}

/// Health record owned by the transport I/O critical section.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    invalid_frames: StreakCounter,
    run_state: StreakCounter,
    temperature: StreakCounter,
    constants: StreakCounter,
    temperature_tolerance: u32,
    desync: bool,
    last_rx: Option<Instant>,
    frames_received: u64,
}

impl HealthMonitor {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            invalid_frames: StreakCounter::new(config.invalid_frame_threshold),
            run_state: StreakCounter::new(config.run_state_threshold),
            temperature: StreakCounter::new(config.temperature_threshold),
            constants: StreakCounter::new(config.constant_threshold),
            temperature_tolerance: config.temperature_tolerance_c,
            desync: false,
            last_rx: None,
            frames_received: 0,
        }
    }

    /// Forget everything observed on the previous link.
    pub fn reset(&mut self) {
        self.invalid_frames.reset();
        self.run_state.reset();
        self.temperature.reset();
        self.constants.reset();
        self.desync = false;
        self.last_rx = None;
        self.frames_received = 0;
    }

    /// Account for one inbound notification.
    ///
    /// Only checksum and length failures count toward the invalid-frame
    /// streak; an intact exception reply is neither good nor bad.
    pub fn record_frame(&mut self, frame: &ParsedFrame, now: Instant) -> Option<ReconnectReason> {
        self.last_rx = Some(now);
        self.frames_received += 1;
        if frame.is_invalid() && !frame.is_malformed() {
            return None;
        }
        self.invalid_frames
            .record(frame.is_malformed())
            .then_some(ReconnectReason::InvalidFrames)
    }

    /// Run the telemetry plausibility checks on a decoded status poll.
    ///
    /// All three streaks are updated even when one trips.
    pub fn record_status(&mut self, snapshot: &DeviceStatusSnapshot) -> Option<ReconnectReason> {
        let run_state = self.run_state.record(snapshot.run_state.is_ambiguous());
        let temperature = self
            .temperature
            .record(snapshot.temperature_delta() > self.temperature_tolerance);
        let constants = self.constants.record(!snapshot.constants_nominal());

        if run_state {
            Some(ReconnectReason::AmbiguousRunState)
        } else if temperature {
            Some(ReconnectReason::TemperatureMismatch)
        } else if constants {
            Some(ReconnectReason::NonzeroConstants)
        } else {
            None
        }
    }

    pub fn mark_desync(&mut self) {
        self.desync = true;
    }

    pub fn clear_desync(&mut self) {
        self.desync = false;
    }

    pub fn is_desynced(&self) -> bool {
        self.desync
    }

    /// True once a notification has been seen and none arrived for `limit`.
    pub fn silence_exceeded(&self, now: Instant, limit: Duration) -> bool {
        self.last_rx
            .is_some_and(|last| now.saturating_duration_since(last) >= limit)
    }

    /// Restart the silence window, e.g. after a successful resubscribe.
    pub fn touch(&mut self, now: Instant) {
        if self.last_rx.is_some() {
            self.last_rx = Some(now);
        }
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            invalid_frames: self.invalid_frames.count(),
            ambiguous_run_states: self.run_state.count(),
            temperature_mismatches: self.temperature.count(),
            nonzero_constants: self.constants.count(),
            desync: self.desync,
            frames_received: self.frames_received,
        }
    }
}
