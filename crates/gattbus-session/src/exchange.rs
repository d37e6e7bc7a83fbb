//! One request/response exchange over the link.
//!
//! Callers hold the transport I/O lock for the whole exchange, so the reply
//! can always be attributed to the request just sent.

use std::time::Duration;

use bytes::Bytes;
use gattbus_link::{GattLink, LinkError};
use gattbus_protocol::{parse_frame, GroupId, ParsedFrame, WriteTransaction};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use crate::health::{HealthMonitor, ReconnectReason};
use crate::log::{LogChannel, LogEvent, LogLevel, LogSink};

/// How an exchange ended without a matching response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ExchangeError {
    Timeout,
    Link(LinkError),
    /// A health streak tripped while waiting.
    Unhealthy(ReconnectReason),
    Cancelled,
}

impl ExchangeError {
    pub(crate) fn into_session_error(self, what: &str, after: Duration) -> SessionError {
        match self {
            ExchangeError::Timeout => {
                SessionError::TransportTimeout(format!("{what}: no response within {after:?}"))
            }
            ExchangeError::Link(err) => err.into(),
            ExchangeError::Unhealthy(reason) => reason.into(),
            ExchangeError::Cancelled => SessionError::Cancelled,
        }
    }
}

/// A matched read response.
#[derive(Debug, Clone)]
pub(crate) struct ReadReply {
    pub registers: Vec<u16>,
    pub raw: Bytes,
}

pub(crate) struct Exchange<'a> {
    pub link: &'a GattLink,
    pub health: &'a mut HealthMonitor,
    pub sink: &'a dyn LogSink,
    pub timeout: Duration,
    pub cancel: &'a CancellationToken,
}

impl Exchange<'_> {
    /// Read one register group.
    pub(crate) async fn read(
        &mut self,
        channel: LogChannel,
        group: GroupId,
    ) -> Result<ReadReply, ExchangeError> {
        let descriptor = group.descriptor();
        let request = descriptor.request();
        let frame = self
            .round_trip(channel, &format!("read {group}"), &request, |frame| {
                frame.matches_read(descriptor.function_code, descriptor.quantity)
            })
            .await?;
        match frame {
            ParsedFrame::ReadResponse { registers, raw, .. } => Ok(ReadReply { registers, raw }),
            _ => Err(ExchangeError::Timeout),
        }
    }

    /// Send a transaction's write frame and wait for its exact acknowledgement.
    pub(crate) async fn write(&mut self, tx: &WriteTransaction) -> Result<(), ExchangeError> {
        let expected = tx.expected_ack;
        self.round_trip(
            LogChannel::Write,
            &format!("write {}", tx.title),
            &tx.request,
            |frame| frame.matches_ack(&expected),
        )
        .await
        .map(|_| ())
    }

    async fn round_trip<F>(
        &mut self,
        channel: LogChannel,
        what: &str,
        request: &[u8],
        matches: F,
    ) -> Result<ParsedFrame, ExchangeError>
    where
        F: Fn(&ParsedFrame) -> bool,
    {
        let stale = self.link.drain_notifications().await;
        if !stale.is_empty() {
            self.sink.emit(LogEvent::new(
                LogLevel::Debug,
                channel,
                format!("discarded {} stale notifications", stale.len()),
            ));
        }

        self.link.send_frame(request).map_err(ExchangeError::Link)?;
        self.sink.emit(LogEvent::outbound(channel, what, request));

        let deadline = Instant::now() + self.timeout;
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Err(ExchangeError::Cancelled),
                next = tokio::time::timeout_at(deadline, self.link.next_notification()) => next,
            };
            let bytes = match next {
                Err(_) => return Err(ExchangeError::Timeout),
                Ok(None) => return Err(ExchangeError::Link(LinkError::Closed)),
                Ok(Some(bytes)) => bytes,
            };

            let parsed = parse_frame(&bytes);
            let tripped = self.health.record_frame(&parsed, Instant::now());
            if let ParsedFrame::Invalid { reason, .. } = &parsed {
                let level = if reason.is_malformed() {
                    LogLevel::Warn
                } else {
                    LogLevel::Debug
                };
                self.sink.emit(
                    LogEvent::inbound(channel, format!("invalid frame: {reason}"), &bytes)
                        .with_level(level),
                );
            }
            if let Some(reason) = tripped {
                return Err(ExchangeError::Unhealthy(reason));
            }
            if parsed.is_invalid() {
                continue;
            }
            if matches(&parsed) {
                self.sink
                    .emit(LogEvent::inbound(channel, format!("{what} answered"), &bytes));
                return Ok(parsed);
            }
            self.sink.emit(LogEvent::inbound(
                channel,
                format!("{what}: skipping unrelated frame"),
                &bytes,
            ));
        }
    }
}
