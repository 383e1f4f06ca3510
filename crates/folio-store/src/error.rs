//! Error types for page store operations.

/// Error type for page store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Page version was never written, has been evicted, or its session was removed.
    #[error("Page not found: {0}")]
    NotFound(String),

    /// Backend unreachable, timed out, or compare-and-swap retries exhausted.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Rejected input (zero quota, malformed session id, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Tracking record could not be encoded or decoded.
    #[error("Tracking record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Configuration could not be parsed.
    #[error("failed to parse page store config: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    /// Whether the caller can treat this as a cold page (no retained state).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether the failure came from the backend rather than the request.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_))
    }
}

/// Result type for page store operations.
pub type Result<T> = std::result::Result<T, Error>;
