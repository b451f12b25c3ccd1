/// Result alias that carries the custom [`SonografiError`] type.
pub type Result<T> = std::result::Result<T, SonografiError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum SonografiError {
    /// No analysis primitive could be obtained (no audio session, or the
    /// analyser has been detached or poisoned). Per-frame consumers degrade to
    /// a no-op when they see this.
    #[error("audio analysis unavailable: {0}")]
    InitializationUnavailable(String),
    /// The decoder rejected its input. Surfaced to the caller of the decode
    /// entry point and never retried.
    #[error("audio decoding failed: {0}")]
    Decode(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("fft error: {0}")]
    Fft(#[from] realfft::FftError),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Free-form message for conditions without a dedicated variant.
    #[error("{0}")]
    Message(String),
}

impl SonografiError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid_config<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn unavailable<T: Into<String>>(msg: T) -> Self {
        Self::InitializationUnavailable(msg.into())
    }

    /// Returns `true` when the error means the analysis source is missing
    /// rather than broken.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::InitializationUnavailable(_))
    }
}

impl From<hound::Error> for SonografiError {
    fn from(value: hound::Error) -> Self {
        // Decoding always runs over an in-memory buffer, so hound's IO errors
        // mean a truncated stream rather than a filesystem problem.
        Self::Decode(value.to_string())
    }
}

impl From<&str> for SonografiError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SonografiError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
