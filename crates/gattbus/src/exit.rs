use std::fmt;
use std::io;

use gattbus_frame::FrameError;
use gattbus_protocol::ProtocolError;
use gattbus_session::SessionError;

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => USAGE,
        io::ErrorKind::TimedOut => TIMEOUT,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn json_error(context: &str, err: serde_json::Error) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn protocol_error(context: &str, err: ProtocolError) -> CliError {
    match err {
        ProtocolError::Frame(err) => frame_error(context, err),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    let code = match &err {
        SessionError::TransportTimeout(_) => TIMEOUT,
        SessionError::TransportUnavailable(_) | SessionError::ProtocolMismatch(_) => {
            TRANSPORT_ERROR
        }
        SessionError::FrameInvalid(_) | SessionError::ValidationFailed(_) => DATA_INVALID,
        SessionError::InitializationIncomplete(_) => HEALTH_CHECK_FAILED,
        SessionError::Config(_) => USAGE,
        SessionError::Protocol(_) => DATA_INVALID,
        SessionError::Busy(_) | SessionError::NotConnected | SessionError::Cancelled => FAILURE,
    };
    CliError::new(code, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_map_to_distinct_codes() {
        let code = |err| session_error("simulate", err).code;
        assert_eq!(code(SessionError::TransportTimeout("x".into())), TIMEOUT);
        assert_eq!(
            code(SessionError::TransportUnavailable("x".into())),
            TRANSPORT_ERROR
        );
        assert_eq!(
            code(SessionError::InitializationIncomplete("x".into())),
            HEALTH_CHECK_FAILED
        );
        assert_eq!(code(SessionError::Config("x".into())), USAGE);
        assert_eq!(code(SessionError::NotConnected), FAILURE);
    }

    #[test]
    fn messages_carry_context() {
        let err = frame_error("parse", FrameError::TooShort { len: 2, min: 4 });
        assert_eq!(err.code, DATA_INVALID);
        assert!(err.message.starts_with("parse: "));
    }
}
