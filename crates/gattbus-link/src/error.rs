use std::time::Duration;

/// Errors that can occur in link operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// A lifecycle operation did not complete in time.
    ///
    /// The link must be considered unusable afterwards; recreate it instead
    /// of retrying on the same handle.
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    /// The link, service, or a required characteristic is missing.
    #[error("link unavailable: {0}")]
    Unavailable(String),

    /// The platform backend rejected or failed an operation.
    #[error("{op} failed with status {status}")]
    Backend { op: &'static str, status: u8 },

    /// An operation of the same kind is already in flight.
    #[error("{0} already in progress")]
    Busy(&'static str),

    /// The link has been closed.
    #[error("link closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, LinkError>;
