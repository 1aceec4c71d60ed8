//! Error types for the relay.

use thiserror::Error;

/// Relay error type.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The backend could not be reached before any reply element arrived.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    /// The backend stream carried a malformed or failed element.
    #[error("backend protocol error: {0}")]
    BackendProtocol(String),
    /// The backend stopped producing elements for longer than the idle timeout.
    #[error("backend stream idle for more than {0} seconds")]
    BackendTimeout(u64),
    /// The transcript page could not be rendered.
    #[error("template render error: {0}")]
    TemplateRender(#[from] minijinja::Error),
    /// The submitted prompt was rejected before any state change.
    #[error("invalid prompt: {0}")]
    InvalidPrompt(String),
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// HTTP client construction error.
    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl RelayError {
    /// Whether the error originates from the completion backend.
    #[must_use]
    pub const fn is_backend(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::BackendProtocol(_) | Self::BackendTimeout(_)
        )
    }

    /// Whether opening the backend stream may be attempted again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}

/// Convenience result alias for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
