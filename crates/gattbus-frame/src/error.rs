/// Errors that can occur while building or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The frame is shorter than the smallest checksummed frame.
    #[error("frame too short ({len} bytes, min {min})")]
    TooShort { len: usize, min: usize },

    /// The trailing checksum does not match the computed one.
    #[error("checksum mismatch (computed 0x{computed:04X}, received 0x{received:04X})")]
    ChecksumMismatch { computed: u16, received: u16 },

    /// A multi-register write was asked for an unsupported register count.
    #[error("invalid register count {count} (allowed 1..={max})")]
    RegisterCount { count: usize, max: usize },

    /// The register data ends before the declared byte count.
    #[error("register data truncated (need {needed} bytes, have {available})")]
    Truncated { needed: usize, available: usize },

    /// A hex string could not be decoded.
    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

pub type Result<T> = std::result::Result<T, FrameError>;
