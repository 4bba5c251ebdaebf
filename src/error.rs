use thiserror::Error;

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The crate-wide error type.
///
/// Kept decoupled from `anyhow` in the public API so downstream crates (and the HTTP adapter)
/// can match on a concrete, stable taxonomy instead of re-parsing error strings. Internal
/// modules build up context with `anyhow` and convert to this type at module boundaries.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured artifact directory or model file does not exist. Startup-fatal.
    #[error("engine artifacts missing: {0}")]
    ArtifactMissing(String),

    /// The native engine failed to initialize a model context. Startup-fatal.
    #[error("failed to initialize model context: {0}")]
    ModelInitError(String),

    /// The remote audio URL could not be parsed or resolved.
    #[error("invalid audio url: {0}")]
    InvalidUrl(String),

    /// Missing or invalid `X-API-Key`.
    #[error("unauthorized")]
    Unauthorized,

    /// Non-2xx status, connection failure, or other transport error while downloading.
    #[error("download failed: {0}")]
    DownloadError(String),

    /// The download exceeded `max_upload_size_mb` and was aborted.
    #[error("payload exceeds maximum upload size")]
    PayloadTooLarge,

    /// The download did not complete within the configured deadline.
    #[error("download timed out")]
    DownloadTimeout,

    /// Probing or decoding the audio failed.
    #[error("audio decode failed: {0}")]
    AudioDecodeError(String),

    /// Slicing a chunk out of the source audio failed.
    #[error("audio slice failed: {0}")]
    AudioSliceError(String),

    /// Disk-full or other I/O failure while writing temp files.
    #[error("transient storage error: {0}")]
    TransientStorageError(String),

    /// The native engine returned a non-zero/failure result for a single call.
    #[error("engine error: {0}")]
    EngineError(String),

    /// A single chunk exceeded its transcription deadline.
    #[error("chunk transcription timed out")]
    ChunkTimeout,

    /// The overall request deadline was exceeded before all chunks finished.
    #[error("request timed out")]
    OverallTimeout,

    /// The client disconnected before transcription of any chunk began.
    #[error("cancelled by client")]
    CancelledByClient,
}

impl Error {
    /// Whether this error should be logged as an alert (background work left running,
    /// or a condition that indicates a misconfigured deployment rather than bad input).
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            Error::ChunkTimeout
                | Error::ArtifactMissing(_)
                | Error::ModelInitError(_)
                | Error::TransientStorageError(_)
        )
    }

    /// A short, stable kind name for structured logging (`error_kind` field).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ArtifactMissing(_) => "ArtifactMissing",
            Error::ModelInitError(_) => "ModelInitError",
            Error::InvalidUrl(_) => "InvalidUrl",
            Error::Unauthorized => "Unauthorized",
            Error::DownloadError(_) => "DownloadError",
            Error::PayloadTooLarge => "PayloadTooLarge",
            Error::DownloadTimeout => "DownloadTimeout",
            Error::AudioDecodeError(_) => "AudioDecodeError",
            Error::AudioSliceError(_) => "AudioSliceError",
            Error::TransientStorageError(_) => "TransientStorageError",
            Error::EngineError(_) => "EngineError",
            Error::ChunkTimeout => "ChunkTimeout",
            Error::OverallTimeout => "OverallTimeout",
            Error::CancelledByClient => "CancelledByClient",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::TransientStorageError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(Error::Unauthorized.kind(), "Unauthorized");
        assert_eq!(Error::ChunkTimeout.kind(), "ChunkTimeout");
    }

    #[test]
    fn chunk_timeout_is_an_alert() {
        assert!(Error::ChunkTimeout.is_alert());
        assert!(!Error::PayloadTooLarge.is_alert());
    }
}
