/// Errors that can occur while decoding device data or building writes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A register block was shorter than its decoder needs.
    #[error("expected at least {needed} registers, got {got}")]
    TooFewRegisters { needed: usize, got: usize },

    /// A setting is outside the range the device accepts.
    #[error("invalid setting {field}: {message}")]
    InvalidSetting {
        field: &'static str,
        message: String,
    },

    /// The mirror has not observed every configuration group yet.
    #[error("mirror incomplete: {0} not observed yet")]
    MirrorIncomplete(&'static str),

    /// Frame construction failed.
    #[error("frame error: {0}")]
    Frame(#[from] gattbus_frame::FrameError),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
