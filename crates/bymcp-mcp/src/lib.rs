//! # bymcp-mcp
//!
//! Model Context Protocol server for bymcp.  [`McpServer`] answers
//! JSON-RPC 2.0 requests by dispatching `tools/call` to the registered
//! skills; [`serve`] drives it over a newline-delimited stream such as
//! stdin/stdout.

pub mod error;
pub mod server;
pub mod transport;

pub use error::{McpError, Result};
pub use server::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpContent, McpServer, McpToolDefinition,
    McpToolResult,
};
pub use transport::{serve, serve_stdio};
