//! Adapter error types.
//!
//! All adapter subsystems surface errors through [`AdapterError`].  Each
//! variant carries enough context for callers to decide how to handle the
//! failure without inspecting opaque strings.

use bymcp_auth_engine::AuthEngineError;
use bymcp_store::StoreError;

/// Unified error type for bymcp adapters.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// An I/O operation failed within the adapter.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// The requested tool does not exist on this adapter.
    #[error("tool not found: `{tool_name}` on adapter `{adapter_id}`")]
    ToolNotFound {
        adapter_id: String,
        tool_name: String,
    },

    /// The parameters supplied to a tool are invalid.
    #[error("invalid parameters for tool `{tool_name}`: {reason}")]
    InvalidParams { tool_name: String, reason: String },

    /// A tool invocation failed.
    #[error("execution failed for tool `{tool_name}`: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    /// The remote API needs a (new) user authorization.
    #[error("authentication required for `{adapter_id}`: provider={provider}")]
    AuthRequired {
        adapter_id: String,
        provider: String,
    },

    /// A remote API answered with an unexpected HTTP status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// A request never produced an HTTP response.
    #[error("{service} request failed: {reason}")]
    Request { service: String, reason: String },

    /// A token flow failed.
    #[error(transparent)]
    Auth(#[from] AuthEngineError),

    /// The transfer ledger or a state file failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A PDF could not be read or written.
    #[error("pdf error: {0}")]
    Pdf(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// An operation exceeded its time limit.
    #[error("timeout after {seconds}s: {reason}")]
    Timeout { seconds: u64, reason: String },

    /// Required configuration is missing or malformed.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal adapter error: {0}")]
    Internal(String),
}

impl AdapterError {
    /// Whether the user has to (re-)authorize before retrying.
    pub fn needs_authorization(&self) -> bool {
        matches!(
            self,
            Self::AuthRequired { .. }
                | Self::Auth(AuthEngineError::TokenExpired { .. })
                | Self::Auth(AuthEngineError::InvalidGrant { .. })
        )
    }

    /// The HTTP status of a remote API failure, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<lopdf::Error> for AdapterError {
    fn from(err: lopdf::Error) -> Self {
        Self::Pdf(err.to_string())
    }
}

/// Convenience alias used throughout the adapters crate.
pub type Result<T> = std::result::Result<T, AdapterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_need_authorization() {
        let err = AdapterError::AuthRequired {
            adapter_id: "receipts".into(),
            provider: "microsoft".into(),
        };
        assert!(err.needs_authorization());

        let err = AdapterError::from(AuthEngineError::TokenExpired {
            provider: "microsoft".into(),
        });
        assert!(err.needs_authorization());

        let err = AdapterError::Http {
            status: 404,
            message: "list not found".into(),
        };
        assert!(!err.needs_authorization());
        assert_eq!(err.http_status(), Some(404));
        assert_eq!(err.to_string(), "HTTP 404: list not found");
    }
}
