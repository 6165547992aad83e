//! Invoices skill.
//!
//! `invoice_extract` reads an invoice PDF (local file or mail attachment),
//! pulls out header fields and line items and keeps the result as pending
//! state.  `invoice_import` writes the pending invoice into two SharePoint
//! lists: one item for the header, one linked item per position.

pub mod extractor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bymcp_store::StateFile;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::config::SharePointConfig;
use crate::error::{AdapterError, Result};
use crate::graph::{
    GraphClient, SharePointClient, find_lookup_column, map_invoice_fields, map_position_fields,
};
use crate::params::optional_str;
use crate::pdf::PdfFile;
use crate::traits::{Adapter, AdapterType, AuthRequirement, HealthStatus, ToolDefinition};

pub use extractor::{
    InvoiceData, InvoicePosition, extract_invoice_from_text, extract_positions, guess_supplier,
    normalize_date,
};

const PREVIEW_POSITIONS: usize = 5;
const RULE_WIDTH: usize = 60;

/// Invoices adapter: PDF extraction and SharePoint import.
pub struct InvoicesAdapter {
    /// Unique identifier for this adapter instance.
    id: String,
    /// Whether the adapter has been connected.
    connected: bool,
    /// The last extracted invoice, waiting for import.
    pending: StateFile<InvoiceData>,
    graph: std::result::Result<Arc<GraphClient>, String>,
    sharepoint_config: std::result::Result<SharePointConfig, String>,
    /// Built on connect from the Graph client and the site configuration.
    sharepoint: Option<SharePointClient>,
}

impl InvoicesAdapter {
    /// Create an adapter that stores pending state at `pending_path`.
    pub fn new(id: &str, pending_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.to_string(),
            connected: false,
            pending: StateFile::new(pending_path),
            graph: Err("missing environment variables: MS_CLIENT_ID".into()),
            sharepoint_config: Err("missing environment variables: SHAREPOINT_SITE_URL".into()),
            sharepoint: None,
        }
    }

    pub fn with_graph(mut self, graph: Arc<GraphClient>) -> Self {
        self.graph = Ok(graph);
        self
    }

    pub fn with_graph_error(mut self, reason: impl Into<String>) -> Self {
        self.graph = Err(reason.into());
        self
    }

    pub fn with_sharepoint(mut self, config: SharePointConfig) -> Self {
        self.sharepoint_config = Ok(config);
        self
    }

    pub fn with_sharepoint_error(mut self, reason: impl Into<String>) -> Self {
        self.sharepoint_config = Err(reason.into());
        self
    }

    // -----------------------------------------------------------------------
    // Tool implementations
    // -----------------------------------------------------------------------

    /// Extract an invoice and save it as pending state.
    async fn tool_extract(&self, params: Value) -> Result<Value> {
        let tool = "invoice_extract";
        let pdf_path = optional_str(&params, "pdf_path");
        let message_id = optional_str(&params, "message_id");
        let attachment_id = optional_str(&params, "attachment_id");

        let (bytes, source) = match (pdf_path, message_id, attachment_id) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(AdapterError::InvalidParams {
                    tool_name: tool.into(),
                    reason: "give either `pdf_path` or `message_id` + `attachment_id`, not both"
                        .into(),
                });
            }
            (Some(path), None, None) => match read_local_pdf(Path::new(path)).await {
                Ok(found) => found,
                Err(message) => return Ok(Value::String(message)),
            },
            (None, Some(message_id), Some(attachment_id)) => {
                match self.download_pdf(message_id, attachment_id).await {
                    Ok(found) => found,
                    Err(message) => return Ok(Value::String(message)),
                }
            }
            _ => {
                return Err(AdapterError::InvalidParams {
                    tool_name: tool.into(),
                    reason: "give either `pdf_path` (local file) or `message_id` + \
                             `attachment_id` (mail attachment)"
                        .into(),
                });
            }
        };

        let text_source = source.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            PdfFile::from_bytes(&bytes)
                .map(|pdf| extract_invoice_from_text(&pdf.full_text(), Some(text_source.as_str())))
        })
        .await
        .map_err(|e| AdapterError::Internal(format!("extraction task failed: {e}")))?;
        let (invoice, warnings) = match extracted {
            Ok(result) => result,
            Err(e) => return Ok(Value::String(format!("Error during PDF extraction: {e}"))),
        };

        self.pending.save(&invoice)?;
        info!(source = %source, path = %self.pending.path().display(), "pending invoice saved");

        Ok(Value::String(preview(&invoice, &warnings)))
    }

    async fn download_pdf(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> std::result::Result<(Vec<u8>, String), String> {
        let graph = self
            .graph
            .as_ref()
            .map_err(|reason| format!("Microsoft configuration missing: {reason}"))?;
        match graph.download_attachment(message_id, attachment_id).await {
            Ok(bytes) => {
                let short: String = attachment_id.chars().take(8).collect();
                Ok((bytes, format!("email-attachment-{short}.pdf")))
            }
            Err(e) if e.needs_authorization() => Err(format!(
                "Office 365 error: {e}\nPlease call 'receipts_authorize'."
            )),
            Err(e) => Err(format!("Error while downloading the attachment: {e}")),
        }
    }

    /// Import the pending invoice into SharePoint.
    async fn tool_import(&self) -> Result<Value> {
        if !self.pending.exists() {
            return Ok(Value::String(
                "No pending invoice found.\nPlease call 'invoice_extract' first.".into(),
            ));
        }
        let Some(invoice) = self.pending.load() else {
            return Ok(Value::String(format!(
                "Pending invoice could not be read: {}",
                self.pending.path().display()
            )));
        };

        let config = match &self.sharepoint_config {
            Ok(config) => config,
            Err(reason) => {
                return Ok(Value::String(format!(
                    "SharePoint configuration missing: {reason}\n\
                     Example: SHAREPOINT_SITE_URL=https://company.sharepoint.com/sites/mySite"
                )));
            }
        };
        let sharepoint = match (&self.sharepoint, &self.graph) {
            (Some(sharepoint), _) => sharepoint,
            (None, Err(reason)) => {
                return Ok(Value::String(format!(
                    "Microsoft configuration missing: {reason}"
                )));
            }
            (None, Ok(_)) => {
                return Err(AdapterError::ExecutionFailed {
                    tool_name: "invoice_import".into(),
                    reason: "SharePoint client not initialized".into(),
                });
            }
        };

        let invoice_columns = match sharepoint.list_columns(&config.invoices_list).await {
            Ok(columns) => columns,
            Err(e) => {
                return Ok(Value::String(column_error(
                    &e,
                    &config.invoices_list,
                    "SHAREPOINT_INVOICES_LIST",
                )));
            }
        };
        let position_columns = match sharepoint.list_columns(&config.positions_list).await {
            Ok(columns) => columns,
            Err(e) => {
                return Ok(Value::String(column_error(
                    &e,
                    &config.positions_list,
                    "SHAREPOINT_POSITIONS_LIST",
                )));
            }
        };

        let mut lines = vec!["SharePoint import".to_string(), "-".repeat(40)];

        let (header_fields, header_warnings) = map_invoice_fields(&invoice, &invoice_columns);
        if !header_warnings.is_empty() {
            lines.push("Header warnings:".into());
            lines.extend(header_warnings.iter().map(|w| format!("  ! {w}")));
        }

        let header_id = match sharepoint
            .create_item(&config.invoices_list, header_fields)
            .await
        {
            Ok(id) => id,
            Err(e) if e.needs_authorization() => {
                return Ok(Value::String(format!(
                    "Authorization error: {e}\nPlease call 'receipts_authorize'."
                )));
            }
            Err(e) if e.http_status() == Some(403) => {
                return Ok(Value::String(
                    "Access denied (403) while creating the invoice item.\n\
                     Check the Sites.ReadWrite.All permission."
                        .into(),
                ));
            }
            Err(e) => {
                return Ok(Value::String(format!(
                    "Error while creating the invoice item: {e}"
                )));
            }
        };
        lines.push(format!(
            "Invoice created: {} item #{header_id}",
            config.invoices_list
        ));

        let lookup = find_lookup_column(&position_columns);
        if lookup.is_none() && !invoice.positions.is_empty() {
            lines.push(format!(
                "! No lookup column found in '{}', positions are created without a link.",
                config.positions_list
            ));
        }

        let mut failed = 0usize;
        for (i, position) in invoice.positions.iter().enumerate() {
            let number = i + 1;
            let (fields, warnings) =
                map_position_fields(position, &position_columns, lookup.as_deref(), header_id);
            lines.extend(
                warnings
                    .iter()
                    .map(|w| format!("  ! Position {number}: {w}")),
            );
            match sharepoint.create_item(&config.positions_list, fields).await {
                Ok(id) => lines.push(format!("  Position {number} created: item #{id}")),
                Err(e) => {
                    warn!(position = number, error = %e, "position import failed");
                    lines.push(format!("  Position {number} failed: {e}"));
                    failed += 1;
                }
            }
        }

        lines.push(String::new());
        if failed == 0 {
            if let Err(e) = self.pending.clear() {
                warn!(error = %e, "pending invoice could not be removed");
            }
            lines.push("Import finished. Pending invoice removed.".into());
        } else {
            lines.push(format!(
                "! {failed} position(s) failed.\nThe pending invoice is kept. Invoice item id: \
                 #{header_id}.\nPositions can be added manually once the problem is fixed."
            ));
        }
        info!(header_id, failed, "invoice import finished");

        Ok(Value::String(lines.join("\n")))
    }
}

/// Read a local invoice PDF, or explain why it cannot be used.
async fn read_local_pdf(path: &Path) -> std::result::Result<(Vec<u8>, String), String> {
    if !path.exists() {
        return Err(format!("File not found: {}", path.display()));
    }
    let is_pdf = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        return Err(format!("Not a PDF file: {}", path.display()));
    }
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| format!("Error while reading the file: {e}"))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok((bytes, name))
}

/// Explain a failed column lookup for `list`.
fn column_error(err: &AdapterError, list: &str, env_var: &str) -> String {
    if err.needs_authorization() {
        return format!("Authorization error: {err}\nPlease call 'receipts_authorize'.");
    }
    match err.http_status() {
        Some(403) => format!(
            "Access denied (403) on list '{list}'.\n\
             Make sure Sites.ReadWrite.All is granted in the Azure app registration and \
             admin consent was given.\nThen delete ms_tokens.json and authorize again."
        ),
        Some(404) => format!("List '{list}' not found (404).\nCheck {env_var} in .env."),
        _ => format!("SharePoint error while reading the columns of '{list}': {err}"),
    }
}

/// Human-readable summary of an extracted invoice.
pub fn preview(invoice: &InvoiceData, warnings: &[String]) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut lines = vec![
        rule.clone(),
        "  INVOICE: EXTRACTED DATA".to_string(),
        rule.clone(),
        String::new(),
    ];

    let header = [
        ("Invoice number", &invoice.invoice_number),
        ("Invoice date", &invoice.invoice_date),
        ("Supplier", &invoice.supplier),
        ("VAT id", &invoice.supplier_vat_id),
        ("Net amount", &invoice.net_amount),
        ("VAT amount", &invoice.vat_amount),
        ("Gross amount", &invoice.gross_amount),
        ("Due date", &invoice.due_date),
        ("Order number", &invoice.order_number),
    ];
    for (label, value) in header {
        lines.push(format!(
            "  {label:<22} {}",
            value.as_deref().filter(|v| !v.is_empty()).unwrap_or("–")
        ));
    }

    lines.push(String::new());
    if invoice.positions.is_empty() {
        lines.push("  Positions: none detected".into());
    } else {
        lines.push(format!("  Positions: {}", invoice.positions.len()));
        for position in invoice.positions.iter().take(PREVIEW_POSITIONS) {
            let description: String = position
                .description
                .as_deref()
                .unwrap_or_default()
                .chars()
                .take(40)
                .collect();
            lines.push(format!(
                "    * {description:<40}  {} {}  {}",
                position.quantity.as_deref().unwrap_or_default(),
                position.unit.as_deref().unwrap_or_default(),
                position.total.as_deref().unwrap_or_default()
            ));
        }
        if invoice.positions.len() > PREVIEW_POSITIONS {
            lines.push(format!(
                "    … and {} more",
                invoice.positions.len() - PREVIEW_POSITIONS
            ));
        }
    }

    if !warnings.is_empty() {
        lines.push(String::new());
        lines.push("  Warnings:".into());
        lines.extend(warnings.iter().map(|w| format!("    ! {w}")));
    }

    lines.push(String::new());
    lines.push(rule);
    lines.push("Pending invoice saved. Now call 'invoice_import'.".into());
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Tool definitions
// ---------------------------------------------------------------------------

/// Build the list of tool definitions exposed by the invoices adapter.
fn build_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "invoice_extract".into(),
            description: "Extract invoice data from a PDF (local file or mail attachment), show \
                          a preview and keep it for invoice_import"
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pdf_path": {
                        "type": "string",
                        "description": "Absolute path to a local PDF file"
                    },
                    "message_id": {
                        "type": "string",
                        "description": "Microsoft Graph message id (for a mail attachment)"
                    },
                    "attachment_id": {
                        "type": "string",
                        "description": "Microsoft Graph attachment id (for a mail attachment)"
                    }
                },
                "required": []
            }),
        },
        ToolDefinition {
            name: "invoice_import".into(),
            description: "Import the last extracted invoice into SharePoint: one item in the \
                          invoices list, one linked item per position in the positions list"
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
    ]
}

// ---------------------------------------------------------------------------
// Adapter trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Adapter for InvoicesAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Documents
    }

    async fn connect(&mut self) -> Result<()> {
        self.sharepoint = match (&self.graph, &self.sharepoint_config) {
            (Ok(graph), Ok(config)) => Some(SharePointClient::new(
                Arc::clone(graph),
                config.site_url.clone(),
            )),
            _ => None,
        };
        if self.sharepoint.is_none() {
            warn!(id = %self.id, "invoices adapter connected without SharePoint");
        } else {
            info!(id = %self.id, "invoices adapter connected");
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        info!(id = %self.id, "invoices adapter disconnected");
        self.sharepoint = None;
        self.connected = false;
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        if !self.connected {
            return Ok(HealthStatus::Unhealthy);
        }
        Ok(if self.sharepoint.is_some() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        })
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        build_tool_definitions()
    }

    async fn execute_tool(&self, name: &str, params: Value) -> Result<Value> {
        if !self.connected {
            return Err(AdapterError::ExecutionFailed {
                tool_name: name.to_string(),
                reason: format!("adapter `{}` is not connected", self.id),
            });
        }

        match name {
            "invoice_extract" => self.tool_extract(params).await,
            "invoice_import" => self.tool_import().await,
            _ => Err(AdapterError::ToolNotFound {
                adapter_id: self.id.clone(),
                tool_name: name.to_string(),
            }),
        }
    }

    fn required_auth(&self) -> Option<AuthRequirement> {
        Some(AuthRequirement {
            provider: "microsoft".into(),
            scopes: vec!["Mail.Read".into(), "Sites.ReadWrite.All".into()],
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
