//! Business skills for bymcp: payroll, receipts, invoices.
//!
//! Each skill implements the [`Adapter`] trait defined in [`traits`],
//! providing a uniform interface for tool discovery and execution.  The
//! supporting modules wrap the external services (Qonto, Microsoft Graph)
//! and the document formats (CSV rosters, PDF payslips and invoices).

pub mod config;
pub mod error;
pub mod graph;
pub mod iban;
pub mod invoices;
pub mod money;
pub mod params;
pub mod payroll;
pub mod pdf;
pub mod qonto;
pub mod receipts;
pub mod report;
pub mod traits;

pub use config::{DataDir, MicrosoftConfig, QontoConfig, SharePointConfig};
pub use error::{AdapterError, Result};
pub use graph::{GraphClient, SharePointClient};
pub use invoices::InvoicesAdapter;
pub use payroll::PayrollAdapter;
pub use qonto::{QontoClient, RetryPolicy, ScaPolicy};
pub use receipts::{MicrosoftAccess, ReceiptsAdapter};
pub use traits::{Adapter, AdapterType, AuthRequirement, HealthStatus, ToolDefinition};
