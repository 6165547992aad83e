//! Error types for the MCP transport.

use thiserror::Error;

/// Alias for `Result<T, McpError>`.
pub type Result<T> = std::result::Result<T, McpError>;

/// Errors that end a transport session.
///
/// Malformed requests never surface here; they are answered with JSON-RPC
/// error responses instead.
#[derive(Debug, Error)]
pub enum McpError {
    /// Reading from or writing to the transport failed.
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A response could not be serialized.
    #[error("failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),
}
