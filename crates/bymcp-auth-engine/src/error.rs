//! Error types for the auth engine crate.
//!
//! All auth engine operations surface errors through [`AuthEngineError`].
//! Each variant carries enough context for callers to decide whether to
//! retry, re-authorize, or report.

/// Unified error type for the bymcp auth engine.
#[derive(Debug, thiserror::Error)]
pub enum AuthEngineError {
    /// No usable token is cached and it cannot be refreshed.
    #[error("token expired for provider {provider}")]
    TokenExpired {
        /// The provider whose token expired.
        provider: String,
    },

    /// The authorization code exchange or refresh grant was rejected by the
    /// authorization server.
    #[error("invalid grant: {reason}")]
    InvalidGrant {
        /// Explanation from the authorization server.
        reason: String,
    },

    /// An HTTP request to the authorization server failed.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Persisting or clearing a token file failed.
    #[error("token storage error: {0}")]
    Store(#[from] bymcp_store::StoreError),

    /// Configuration is missing or malformed.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// There is no authorization in progress to complete.
    #[error("no pending authorization for {provider}")]
    NoPendingFlow {
        /// The provider that was asked to complete a flow.
        provider: String,
    },

    /// The overall authentication flow failed for a non-specific reason.
    #[error("authentication flow failed: {reason}")]
    FlowFailed {
        /// Details about why the flow failed.
        reason: String,
    },

    /// Waiting for the user timed out.
    #[error("callback timed out after {timeout_secs} seconds")]
    CallbackTimeout {
        /// How many seconds we waited before giving up.
        timeout_secs: u64,
    },

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (e.g. from the callback TCP listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthEngineError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
