//! Reconnecting polling session for GATT Modbus devices.
//!
//! [`SessionController`] owns one device session end to end:
//! - connect with retry and backoff, then an initial read of every group
//! - a single-flight polling loop on a priority schedule
//! - health tracking that turns sustained anomalies into a reconnect
//! - read-back-verified writes that degrade polling while in flight
//!
//! Collaborators observe the session through a phase watch channel,
//! snapshot accessors and an injected [`LogSink`].

pub mod config;
pub mod controller;
pub mod error;
mod exchange;
pub mod health;
pub mod log;
pub mod phase;
pub mod schedule;
pub mod simulator;

pub use config::SessionConfig;
pub use controller::{SessionController, WriteFailure, WriteOutcome};
pub use error::{Result, SessionError};
pub use health::{HealthMonitor, HealthReport, ReconnectReason, StreakCounter};
pub use log::{Direction, LogChannel, LogEvent, LogLevel, LogSink, NullSink, TracingSink};
pub use phase::SessionPhase;
pub use schedule::Schedule;
pub use simulator::{SimFactory, SimulatedDevice};
