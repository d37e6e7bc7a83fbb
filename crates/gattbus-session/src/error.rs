use gattbus_link::LinkError;
use gattbus_protocol::ProtocolError;

use crate::health::ReconnectReason;

/// Errors that can occur in session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// A transport operation or exchange ran out of time.
    #[error("transport timeout: {0}")]
    TransportTimeout(String),

    /// The link, service, or a characteristic is missing or went away.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Too many frames failed checksum or length validation.
    #[error("invalid frames: {0}")]
    FrameInvalid(String),

    /// The device answered with something the protocol does not allow.
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// A write was acknowledged but the read-back did not match.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// A mandatory group failed during the initial read round.
    #[error("initialization incomplete: {0}")]
    InitializationIncomplete(String),

    /// An exclusive operation is already running.
    #[error("{0} already in progress")]
    Busy(&'static str),

    /// The operation needs a ready session.
    #[error("not connected")]
    NotConnected,

    /// A connect or disconnect superseded the operation.
    #[error("cancelled")]
    Cancelled,

    /// Session configuration is unusable.
    #[error("invalid config: {0}")]
    Config(String),

    /// Protocol-level encoding or validation error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl From<LinkError> for SessionError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Timeout { .. } => SessionError::TransportTimeout(err.to_string()),
            other => SessionError::TransportUnavailable(other.to_string()),
        }
    }
}

impl From<ReconnectReason> for SessionError {
    fn from(reason: ReconnectReason) -> Self {
        let message = reason.to_string();
        match reason {
            ReconnectReason::LinkDropped { .. } => SessionError::TransportUnavailable(message),
            ReconnectReason::Silence => SessionError::TransportTimeout(message),
            ReconnectReason::InvalidFrames => SessionError::FrameInvalid(message),
            ReconnectReason::AmbiguousRunState
            | ReconnectReason::TemperatureMismatch
            | ReconnectReason::NonzeroConstants => SessionError::ProtocolMismatch(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn link_timeouts_stay_timeouts() {
        let err: SessionError = LinkError::Timeout {
            op: "connect",
            after: Duration::from_secs(1),
        }
        .into();
        assert!(matches!(err, SessionError::TransportTimeout(_)));

        let err: SessionError = LinkError::Closed.into();
        assert_eq!(err, SessionError::TransportUnavailable("link closed".to_string()));
    }

    #[test]
    fn reconnect_reasons_map_to_taxonomy() {
        assert!(matches!(
            SessionError::from(ReconnectReason::InvalidFrames),
            SessionError::FrameInvalid(_)
        ));
        assert!(matches!(
            SessionError::from(ReconnectReason::TemperatureMismatch),
            SessionError::ProtocolMismatch(_)
        ));
    }
}
