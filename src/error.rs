use thiserror::Error;

/// Failure text markers that indicate a transient stream problem.
///
/// A stream failure whose message contains one of these is worth a single
/// teardown-and-reconnect attempt; anything else is permanent.
const TRANSIENT_MARKERS: &[&str] = &["unavailable", "timeout", "closed", "session not active"];

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Connection failed: {0}")]
    ConnectError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Microphone unavailable: {0}")]
    MicUnavailable(String),

    #[error("Audio error: {0}")]
    AudioError(String),

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Whether this failure is transient for retry purposes.
    ///
    /// Matches the failure text case-insensitively against the known
    /// transient markers. Only connection and stream failures qualify;
    /// decode failures in particular are never transient.
    pub fn is_transient(&self) -> bool {
        let msg = match self {
            Self::ConnectError(m) | Self::StreamError(m) => m,
            _ => return false,
        };
        let msg = msg.to_lowercase();
        TRANSIENT_MARKERS.iter().any(|marker| msg.contains(marker))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_markers_match() {
        assert!(AppError::StreamError("service unavailable".to_string()).is_transient());
        assert!(AppError::StreamError("request timeout".to_string()).is_transient());
        assert!(AppError::StreamError("connection closed".to_string()).is_transient());
        assert!(AppError::StreamError("session not active".to_string()).is_transient());
        assert!(!AppError::StreamError("invalid payload".to_string()).is_transient());
    }

    #[test]
    fn test_transient_match_is_case_insensitive() {
        assert!(AppError::StreamError("Deadline TIMEOUT exceeded".to_string()).is_transient());
        assert!(AppError::ConnectError("Service Unavailable".to_string()).is_transient());
    }

    #[test]
    fn test_decode_failures_never_transient() {
        assert!(!AppError::DecodeFailed("stream closed mid-file".to_string()).is_transient());
        assert!(!AppError::UploadFailed("timeout".to_string()).is_transient());
    }
}
