//! Error types for mothkit

use thiserror::Error;

/// Result type alias for mothkit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classes of PPS reconciliation anomaly surfaced by Sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PpsAnomalyKind {
    /// One or more PPS events were not recorded
    Missed,
    /// A PPS row disagrees with the sample counter beyond tolerance
    Misaligned,
    /// An interval's corrected rate still differs from the average
    UnusualRate,
}

impl std::fmt::Display for PpsAnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PpsAnomalyKind::Missed => write!(f, "missed PPS event"),
            PpsAnomalyKind::Misaligned => write!(f, "misaligned PPS event"),
            PpsAnomalyKind::UnusualRate => write!(f, "unusual sample rate"),
        }
    }
}

/// Main error type for mothkit
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parameter type or range check failed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Filename does not match the operation's accepted shapes
    #[error("Invalid filename: {0}")]
    FilenameInvalid(String),

    /// WAV header is missing or malformed
    #[error("Invalid WAV header: {0}")]
    HeaderInvalid(String),

    /// Filename fields disagree with the WAV comment or artist
    #[error("Metadata mismatch: {0}")]
    MetadataMismatch(String),

    /// A read from the input file failed
    #[error("Input read failed: {0}")]
    InputReadFailed(String),

    /// A write to an output file failed
    #[error("Output write failed: {0}")]
    OutputWriteFailed(String),

    /// Input file has no content
    #[error("Input file is empty")]
    FileSizeZero,

    /// Output would exceed the RIFF 32-bit size limit
    #[error("File size exceeds limit: {0}")]
    FileSizeExceedsLimit(String),

    /// GPS time source log could not be used
    #[error("Invalid time source: {0}")]
    TimeSourceInvalid(String),

    /// Fewer than two committed GPS fixes
    #[error("Insufficient GPS fixes: {0}")]
    InsufficientFixes(String),

    /// Fewer PPS events than the planner requires
    #[error("Insufficient PPS events: {0}")]
    InsufficientEvents(String),

    /// PPS reconciliation anomaly (fails Sync unless auto-resolving)
    #[error("PPS anomaly ({kind}): {message}")]
    PpsAnomaly {
        kind: PpsAnomalyKind,
        message: String,
    },

    /// Recording falls outside the committed GPS fix span
    #[error("Recording outside GPS fixes: {0}")]
    RecordingOutsideFixes(String),

    /// Derived sample rate disagrees with the WAV header
    #[error("Sample rate mismatch: {0}")]
    SampleRateMismatch(String),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create a filename error
    pub fn filename<S: Into<String>>(msg: S) -> Self {
        Error::FilenameInvalid(msg.into())
    }

    /// Create a header error
    pub fn header<S: Into<String>>(msg: S) -> Self {
        Error::HeaderInvalid(msg.into())
    }

    /// Create a metadata mismatch error
    pub fn metadata<S: Into<String>>(msg: S) -> Self {
        Error::MetadataMismatch(msg.into())
    }

    /// Create an input read error
    pub fn read<S: Into<String>>(msg: S) -> Self {
        Error::InputReadFailed(msg.into())
    }

    /// Create an output write error
    pub fn write<S: Into<String>>(msg: S) -> Self {
        Error::OutputWriteFailed(msg.into())
    }

    /// Create a PPS anomaly error
    pub fn pps<S: Into<String>>(kind: PpsAnomalyKind, msg: S) -> Self {
        Error::PpsAnomaly {
            kind,
            message: msg.into(),
        }
    }
}
