//! Types d'erreurs du cache de flux

/// Result type alias for stream cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur while caching or prefetching a stream
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Span index error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Upstream HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success status
    #[error("HTTP status {status} for {uri}")]
    HttpStatus { uri: String, status: u16 },

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Adaptive manifest could not be parsed or used
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Construction outside of a tokio runtime
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// The cache was closed
    #[error("Stream cache is closed")]
    Closed,
}

impl CacheError {
    pub fn manifest(message: impl Into<String>) -> Self {
        CacheError::Manifest(message.into())
    }
}
