//! Core adapter trait and supporting types.
//!
//! Every skill (payroll, receipts, invoices) implements the [`Adapter`]
//! trait, giving the MCP server a uniform interface to discover and invoke
//! tools.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// The kind of business workflow an adapter automates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterType {
    /// Outgoing payments (salary transfers).
    Payments,
    /// Mailbox access (receipts found in Outlook mail).
    Mail,
    /// Document intake into business systems.
    Documents,
}

impl std::fmt::Display for AdapterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Payments => write!(f, "payments"),
            Self::Mail => write!(f, "mail"),
            Self::Documents => write!(f, "documents"),
        }
    }
}

/// The health status of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Connected and fully configured.
    Healthy,
    /// Connected, but some tools will fail for lack of configuration.
    Degraded,
    /// Not connected.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// A tool exposed by an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Machine-readable tool name (e.g. `payroll_process`).
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema describing the tool's input parameters.
    pub parameters: serde_json::Value,
}

/// Authentication requirements for an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequirement {
    /// The credential provider name (`qonto`, `microsoft`).
    pub provider: String,
    /// The scopes or permissions required.
    pub scopes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Core trait
// ---------------------------------------------------------------------------

/// The universal adapter interface.
///
/// The MCP server discovers available tools via [`Adapter::tools`] and
/// executes them via [`Adapter::execute_tool`].
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Return the unique identifier for this adapter instance.
    fn id(&self) -> &str;

    /// Return the kind of workflow this adapter automates.
    fn adapter_type(&self) -> AdapterType;

    /// Prepare the adapter for tool calls.
    async fn connect(&mut self) -> Result<()>;

    /// Release resources held by the adapter.
    async fn disconnect(&mut self) -> Result<()>;

    /// Check whether the adapter is operational.
    async fn health_check(&self) -> Result<HealthStatus>;

    /// Return the list of tools this adapter exposes.
    fn tools(&self) -> Vec<ToolDefinition>;

    /// Execute a named tool with the given JSON parameters.
    ///
    /// Skills return their report as a JSON string.
    async fn execute_tool(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value>;

    /// Return the authentication requirements for this adapter, if any.
    fn required_auth(&self) -> Option<AuthRequirement>;
}
