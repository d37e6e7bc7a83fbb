//! Structured log events for collaborators.
//!
//! The controller never formats for display. It hands [`LogEvent`]s to an
//! injected [`LogSink`]; [`TracingSink`] forwards them to `tracing`.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Which part of the session produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogChannel {
    Session,
    Link,
    Poll,
    Write,
    Health,
}

impl fmt::Display for LogChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogChannel::Session => "session",
            LogChannel::Link => "link",
            LogChannel::Poll => "poll",
            LogChannel::Write => "write",
            LogChannel::Health => "health",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    pub level: LogLevel,
    pub channel: LogChannel,
    pub direction: Direction,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
}

impl LogEvent {
    pub fn new(level: LogLevel, channel: LogChannel, message: impl Into<String>) -> Self {
        Self {
            level,
            channel,
            direction: Direction::Internal,
            message: message.into(),
            hex: None,
        }
    }

    /// A frame sent to the device.
    pub fn outbound(channel: LogChannel, message: impl Into<String>, frame: &[u8]) -> Self {
        Self {
            direction: Direction::Outbound,
            hex: Some(gattbus_frame::to_hex(frame)),
            ..Self::new(LogLevel::Debug, channel, message)
        }
    }

    /// A frame received from the device.
    pub fn inbound(channel: LogChannel, message: impl Into<String>, frame: &[u8]) -> Self {
        Self {
            direction: Direction::Inbound,
            hex: Some(gattbus_frame::to_hex(frame)),
            ..Self::new(LogLevel::Debug, channel, message)
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }
}

/// Receives session log events. Must not block.
pub trait LogSink: Send + Sync {
    fn emit(&self, event: LogEvent);
}

impl<F> LogSink for F
where
    F: Fn(LogEvent) + Send + Sync,
{
    fn emit(&self, event: LogEvent) {
        self(event)
    }
}

/// Forwards events to `tracing` at their own level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, event: LogEvent) {
        let LogEvent {
            level,
            channel,
            direction,
            message,
            hex,
        } = event;
        let hex = hex.as_deref().unwrap_or("");
        match level {
            LogLevel::Debug => {
                tracing::debug!(%channel, ?direction, hex, "{message}")
            }
            LogLevel::Info => tracing::info!(%channel, ?direction, hex, "{message}"),
            LogLevel::Warn => tracing::warn!(%channel, ?direction, hex, "{message}"),
            LogLevel::Error => tracing::error!(%channel, ?direction, hex, "{message}"),
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn emit(&self, _event: LogEvent) {}
}
