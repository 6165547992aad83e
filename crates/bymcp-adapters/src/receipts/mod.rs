//! Receipts skill.
//!
//! Finds Qonto transactions without a receipt, looks for Outlook mails with
//! matching attachments and, once the user confirms a candidate, uploads the
//! attachment to the transaction.
//!
//! ```text
//! receipts_authorize ─► receipts_authorize_complete      (once)
//! receipts_find_candidates ─► receipts_attach            (per receipt)
//! ```

pub mod matching;

use std::sync::Arc;

use async_trait::async_trait;
use bymcp_auth_engine::MicrosoftSession;
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::{AdapterError, Result};
use crate::graph::{Attachment, GraphClient};
use crate::money::format_cents;
use crate::params::{f64_or, i64_or, required_str};
use crate::qonto::{QontoClient, Transaction};
use crate::traits::{Adapter, AdapterType, AuthRequirement, HealthStatus, ToolDefinition};

pub use matching::{Candidate, rank_candidates, score_match, transaction_time};

/// Upper bound on mails fetched per search.
const MAX_MESSAGES: usize = 500;
/// Candidates shown per transaction.
const SHOWN_CANDIDATES: usize = 3;

const MS_SETUP_HELP: &str = "Setup:\n\
  1. Azure portal -> App registrations -> New registration\n\
  2. API permissions: Microsoft Graph -> Mail.Read, offline_access\n\
  3. Authentication -> 'Allow public client flows' -> Yes\n\
  4. Put the client id (MS_CLIENT_ID) and tenant id (MS_TENANT_ID) into .env.";

/// Microsoft access used by the receipts and invoices skills.
#[derive(Clone)]
pub struct MicrosoftAccess {
    pub session: Arc<MicrosoftSession>,
    pub graph: Arc<GraphClient>,
}

/// Receipts adapter: matches Outlook attachments to Qonto transactions.
pub struct ReceiptsAdapter {
    /// Unique identifier for this adapter instance.
    id: String,
    /// Whether the adapter has been connected.
    connected: bool,
    qonto: std::result::Result<Arc<QontoClient>, String>,
    microsoft: std::result::Result<MicrosoftAccess, String>,
}

impl ReceiptsAdapter {
    /// Create an adapter with neither Qonto nor Microsoft configured.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            connected: false,
            qonto: Err("Qonto client not configured".into()),
            microsoft: Err("missing environment variables: MS_CLIENT_ID".into()),
        }
    }

    pub fn with_qonto(mut self, qonto: Arc<QontoClient>) -> Self {
        self.qonto = Ok(qonto);
        self
    }

    pub fn with_qonto_error(mut self, reason: impl Into<String>) -> Self {
        self.qonto = Err(reason.into());
        self
    }

    pub fn with_microsoft(mut self, access: MicrosoftAccess) -> Self {
        self.microsoft = Ok(access);
        self
    }

    pub fn with_microsoft_error(mut self, reason: impl Into<String>) -> Self {
        self.microsoft = Err(reason.into());
        self
    }

    // -----------------------------------------------------------------------
    // Tool implementations
    // -----------------------------------------------------------------------

    /// Start the device code flow.
    async fn tool_authorize(&self) -> Result<Value> {
        let access = match &self.microsoft {
            Ok(access) => access,
            Err(reason) => {
                return Ok(Value::String(format!(
                    "Microsoft configuration missing: {reason}\n\n{MS_SETUP_HELP}"
                )));
            }
        };

        if !access.session.needs_authorization().await {
            return Ok(Value::String("Already authorized. Token is valid.".into()));
        }

        let flow = access.session.start_device_flow().await?;
        Ok(Value::String(format!(
            "Please open this URL and enter the code:\n\n  URL:  {}\n  Code: {}\n\n\
             Then call 'receipts_authorize_complete'.",
            flow.verification_uri, flow.user_code
        )))
    }

    /// Wait for the user to confirm the device code.
    async fn tool_authorize_complete(&self) -> Result<Value> {
        let access = match &self.microsoft {
            Ok(access) => access,
            Err(reason) => {
                return Ok(Value::String(format!(
                    "Microsoft configuration missing: {reason}\n\n{MS_SETUP_HELP}"
                )));
            }
        };

        if access.session.pending_flow().is_none() {
            return Ok(Value::String(
                "No authorization in progress.\nPlease call 'receipts_authorize' first.".into(),
            ));
        }

        let text = match access.session.complete_device_flow().await {
            Ok(_) => "Authorization successful. Office 365 token saved.".to_string(),
            Err(e) => {
                warn!(error = %e, "device authorization failed");
                format!("Authorization failed: {e}")
            }
        };
        Ok(Value::String(text))
    }

    /// List receipt candidates for every transaction without a receipt.
    async fn tool_find_candidates(&self, params: Value) -> Result<Value> {
        let tool = "receipts_find_candidates";
        let days_back = i64_or(&params, "days_back", tool, 60)?;
        let min_score = f64_or(&params, "min_score", tool, 0.3)?;
        let window_days = i64_or(&params, "email_window_days", tool, 14)?;
        let lookback = day_span(tool, "days_back", days_back, 1)?;
        let window = day_span(tool, "email_window_days", window_days, 0)?;

        let qonto = match &self.qonto {
            Ok(qonto) => qonto,
            Err(reason) => {
                return Ok(Value::String(format!("Qonto configuration error: {reason}")));
            }
        };

        let now = Utc::now();
        let today = now.date_naive();
        let since = today
            .checked_sub_signed(lookback)
            .ok_or_else(|| out_of_range(tool, "days_back"))?;
        let transactions = qonto.transactions_without_receipts(since, today).await?;
        if transactions.is_empty() {
            return Ok(Value::String(format!(
                "No transactions without receipt in the last {days_back} days."
            )));
        }

        let access = match &self.microsoft {
            Ok(access) => access,
            Err(reason) => {
                return Ok(Value::String(format!(
                    "Microsoft configuration missing: {reason}\n\n{MS_SETUP_HELP}"
                )));
            }
        };

        let oldest = transactions
            .iter()
            .filter_map(Transaction::emitted_on)
            .min()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|t| t.and_utc())
            .unwrap_or(now);
        let mail_since = oldest
            .checked_sub_signed(window)
            .ok_or_else(|| out_of_range(tool, "email_window_days"))?;
        let messages = match access
            .graph
            .messages_with_attachments(mail_since, now, MAX_MESSAGES)
            .await
        {
            Ok(messages) => messages,
            Err(e) if e.needs_authorization() => {
                return Ok(Value::String(format!(
                    "Office 365 error: {e}\nPlease run 'receipts_authorize' first."
                )));
            }
            Err(e) => return Ok(Value::String(format!("Error while fetching mails: {e}"))),
        };
        info!(
            transactions = transactions.len(),
            messages = messages.len(),
            "matching receipts"
        );

        let mut lines = vec![
            format!("Transactions without receipt: {}", transactions.len()),
            format!("Mails with attachments in range: {}", messages.len()),
            String::new(),
        ];

        let mut found_any = false;
        for tx in &transactions {
            lines.push("-- Transaction ---------------------------------------------".into());
            lines.push(format!("   {}", format_transaction(tx)));
            lines.push(format!("   ID: {}", tx.id));

            let candidates = match transaction_time(tx) {
                Some(time) => rank_candidates(tx, time, &messages, window, min_score),
                None => Vec::new(),
            };
            if candidates.is_empty() {
                lines.push("   No matching mails found.".into());
                lines.push(String::new());
                continue;
            }

            found_any = true;
            lines.push(format!("   Candidates ({}):", candidates.len()));
            for (i, candidate) in candidates.iter().take(SHOWN_CANDIDATES).enumerate() {
                let msg = candidate.message;
                let attachments = match access.graph.list_attachments(&msg.id).await {
                    Ok(list) => list,
                    Err(e) => {
                        warn!(message = %msg.id, error = %e, "listing attachments failed");
                        Vec::new()
                    }
                };
                lines.push(String::new());
                lines.push(format!(
                    "   [{}] Score: {:.0}%",
                    i + 1,
                    candidate.score * 100.0
                ));
                lines.push(format!("       From:    {} <{}>", msg.from_name, msg.from_address));
                lines.push(format!("       Date:    {}", msg.date()));
                lines.push(format!("       Subject: {}", msg.subject));
                lines.push(format!("       Files:   {}", format_attachments(&attachments)));
                lines.push(format!("       Mail-ID: {}", msg.id));
                lines.push(format!(
                    "       Attachment-IDs: [{}]",
                    attachments
                        .iter()
                        .map(|a| a.id.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
            lines.push(String::new());
        }

        if found_any {
            lines.push(
                "To attach: receipts_attach(\n  transaction_id='<ID>',\n  \
                 message_id='<Mail-ID>',\n  attachment_id='<Attachment-ID>'\n)"
                    .into(),
            );
        } else {
            lines.push(
                "No matching mails found for the transactions.\n\
                 Hint: lower min_score or increase email_window_days."
                    .into(),
            );
        }

        Ok(Value::String(lines.join("\n")))
    }

    /// Download a mail attachment and upload it to a transaction.
    async fn tool_attach(&self, params: Value) -> Result<Value> {
        let tool = "receipts_attach";
        let transaction_id = required_str(&params, "transaction_id", tool)?;
        let message_id = required_str(&params, "message_id", tool)?;
        let attachment_id = required_str(&params, "attachment_id", tool)?;

        let access = match &self.microsoft {
            Ok(access) => access,
            Err(reason) => {
                return Ok(Value::String(format!(
                    "Microsoft configuration missing: {reason}\n\n{MS_SETUP_HELP}"
                )));
            }
        };

        let download = async {
            let attachments = access.graph.list_attachments(message_id).await?;
            let Some(attachment) = attachments.into_iter().find(|a| a.id == attachment_id) else {
                return Ok(None);
            };
            let bytes = access
                .graph
                .download_attachment(message_id, attachment_id)
                .await?;
            Ok::<_, AdapterError>(Some((attachment, bytes)))
        };
        let (attachment, bytes) = match download.await {
            Ok(Some(found)) => found,
            Ok(None) => {
                return Ok(Value::String(format!(
                    "Attachment '{attachment_id}' not found in mail '{message_id}'."
                )));
            }
            Err(e) if e.needs_authorization() => {
                return Ok(Value::String(format!(
                    "Office 365 error: {e}\nPlease run 'receipts_authorize'."
                )));
            }
            Err(e) => {
                return Ok(Value::String(format!(
                    "Error while downloading the attachment: {e}"
                )));
            }
        };

        let qonto = match &self.qonto {
            Ok(qonto) => qonto,
            Err(reason) => {
                return Ok(Value::String(format!("Qonto configuration error: {reason}")));
            }
        };

        let content_type = if attachment.content_type.is_empty() {
            "application/pdf"
        } else {
            attachment.content_type.as_str()
        };
        let uploaded = qonto
            .attach_receipt(transaction_id, &bytes, &attachment.name, content_type)
            .await;

        let text = if uploaded {
            format!(
                "Receipt attached.\n  Transaction: {transaction_id}\n  File:        {} ({} KB)\n  Type:        {content_type}",
                attachment.name,
                bytes.len() / 1024
            )
        } else {
            format!(
                "Receipt upload failed for transaction {transaction_id}.\n\
                 Please check the logs or upload the receipt manually in Qonto."
            )
        };
        Ok(Value::String(text))
    }
}

/// A whole number of days, at least `min`, as a duration.
fn day_span(tool: &str, field: &str, days: i64, min: i64) -> Result<Duration> {
    if days < min {
        return Err(AdapterError::InvalidParams {
            tool_name: tool.into(),
            reason: format!("field `{field}` must be at least {min}, got {days}"),
        });
    }
    Duration::try_days(days).ok_or_else(|| out_of_range(tool, field))
}

fn out_of_range(tool: &str, field: &str) -> AdapterError {
    AdapterError::InvalidParams {
        tool_name: tool.into(),
        reason: format!("field `{field}` is out of range"),
    }
}

fn format_transaction(tx: &Transaction) -> String {
    format!(
        "{}  {:<35}  {:>10} {}",
        tx.date(),
        tx.label,
        format_cents(tx.amount_cents),
        tx.currency
    )
}

fn format_attachments(attachments: &[Attachment]) -> String {
    if attachments.is_empty() {
        return "(no file attachments)".into();
    }
    attachments
        .iter()
        .map(|a| format!("{} ({} KB)", a.name, a.size_bytes / 1024))
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Tool definitions
// ---------------------------------------------------------------------------

/// Build the list of tool definitions exposed by the receipts adapter.
fn build_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "receipts_authorize".into(),
            description: "Start the Microsoft Office 365 authorization (device code flow). \
                          Returns a URL and a code for the user; afterwards call \
                          receipts_authorize_complete. Needed only once."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
        ToolDefinition {
            name: "receipts_authorize_complete".into(),
            description: "Wait until the user has entered the device code, then store the \
                          Office 365 token. Waits up to 15 minutes."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
        ToolDefinition {
            name: "receipts_find_candidates".into(),
            description: "Find Qonto transactions without a receipt and rank Outlook mails \
                          with attachments that may contain the receipt"
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "days_back": {
                        "type": "integer",
                        "description": "How many days back to look for transactions (default: 60)"
                    },
                    "min_score": {
                        "type": "number",
                        "description": "Minimum match score between 0.0 and 1.0 (default: 0.3)"
                    },
                    "email_window_days": {
                        "type": "integer",
                        "description": "Days before and after a transaction to search mails in (default: 14)"
                    }
                },
                "required": []
            }),
        },
        ToolDefinition {
            name: "receipts_attach".into(),
            description: "Attach a mail attachment as receipt to a Qonto transaction. Get the \
                          ids from receipts_find_candidates and let the user confirm first."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "transaction_id": {
                        "type": "string",
                        "description": "Qonto transaction id"
                    },
                    "message_id": {
                        "type": "string",
                        "description": "Microsoft Graph message id of the mail"
                    },
                    "attachment_id": {
                        "type": "string",
                        "description": "Microsoft Graph attachment id of the file"
                    }
                },
                "required": ["transaction_id", "message_id", "attachment_id"]
            }),
        },
    ]
}

// ---------------------------------------------------------------------------
// Adapter trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Adapter for ReceiptsAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Mail
    }

    async fn connect(&mut self) -> Result<()> {
        if let Err(reason) = &self.qonto {
            warn!(id = %self.id, reason = %reason, "receipts adapter has no Qonto access");
        }
        if let Err(reason) = &self.microsoft {
            warn!(id = %self.id, reason = %reason, "receipts adapter has no Microsoft access");
        }
        info!(id = %self.id, "receipts adapter connected");
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        info!(id = %self.id, "receipts adapter disconnected");
        self.connected = false;
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        if !self.connected {
            return Ok(HealthStatus::Unhealthy);
        }
        Ok(match (&self.qonto, &self.microsoft) {
            (Ok(_), Ok(_)) => HealthStatus::Healthy,
            _ => HealthStatus::Degraded,
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
            "receipts_authorize" => self.tool_authorize().await,
            "receipts_authorize_complete" => self.tool_authorize_complete().await,
            "receipts_find_candidates" => self.tool_find_candidates(params).await,
            "receipts_attach" => self.tool_attach(params).await,
            _ => Err(AdapterError::ToolNotFound {
                adapter_id: self.id.clone(),
                tool_name: name.to_string(),
            }),
        }
    }

    fn required_auth(&self) -> Option<AuthRequirement> {
        Some(AuthRequirement {
            provider: "microsoft".into(),
            scopes: vec!["Mail.Read".into(), "offline_access".into()],
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use bymcp_auth_engine::{MicrosoftAuthConfig, StaticToken};

    use super::*;

    async fn connected(adapter: ReceiptsAdapter) -> ReceiptsAdapter {
        let mut adapter = adapter;
        adapter.connect().await.unwrap();
        adapter
    }

    fn microsoft(dir: &std::path::Path) -> MicrosoftAccess {
        let session = Arc::new(MicrosoftSession::new(
            MicrosoftAuthConfig::new("client-id"),
            dir.join("ms_tokens.json"),
            dir.join("ms_device_flow.json"),
        ));
        let graph = Arc::new(
            GraphClient::new("http://127.0.0.1:9", Arc::new(StaticToken::new("t"))).unwrap(),
        );
        MicrosoftAccess { session, graph }
    }

    #[test]
    fn adapter_type_is_mail() {
        assert_eq!(ReceiptsAdapter::new("r").adapter_type(), AdapterType::Mail);
    }

    #[test]
    fn required_auth_returns_microsoft() {
        let auth = ReceiptsAdapter::new("r").required_auth().unwrap();
        assert_eq!(auth.provider, "microsoft");
        assert!(auth.scopes.contains(&"Mail.Read".to_string()));
    }

    #[test]
    fn tools_have_expected_names() {
        let names: Vec<String> = ReceiptsAdapter::new("r")
            .tools()
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(
            names,
            vec![
                "receipts_authorize",
                "receipts_authorize_complete",
                "receipts_find_candidates",
                "receipts_attach",
            ]
        );
    }

    #[test]
    fn attach_requires_all_ids() {
        let tools = ReceiptsAdapter::new("r").tools();
        let attach = tools.iter().find(|t| t.name == "receipts_attach").unwrap();
        assert_eq!(attach.parameters["required"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn health_check_returns_unhealthy_when_disconnected() {
        let status = ReceiptsAdapter::new("r").health_check().await.unwrap();
        assert_eq!(status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn health_is_degraded_without_configuration() {
        let adapter = connected(ReceiptsAdapter::new("r")).await;
        assert_eq!(adapter.health_check().await.unwrap(), HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn authorize_without_configuration_explains_setup() {
        let adapter = connected(ReceiptsAdapter::new("r")).await;
        let out = adapter
            .execute_tool("receipts_authorize", json!({}))
            .await
            .unwrap();
        let out = out.as_str().unwrap();
        assert!(out.starts_with("Microsoft configuration missing: missing environment variables: MS_CLIENT_ID"));
        assert!(out.contains("Mail.Read, offline_access"));
    }

    #[tokio::test]
    async fn complete_without_pending_flow() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = connected(ReceiptsAdapter::new("r").with_microsoft(microsoft(dir.path()))).await;
        let out = adapter
            .execute_tool("receipts_authorize_complete", json!({}))
            .await
            .unwrap();
        assert_eq!(
            out.as_str().unwrap(),
            "No authorization in progress.\nPlease call 'receipts_authorize' first."
        );
    }

    #[tokio::test]
    async fn find_candidates_without_qonto() {
        let adapter = connected(ReceiptsAdapter::new("r").with_qonto_error("missing environment variables: QONTO_LOGIN")).await;
        let out = adapter
            .execute_tool("receipts_find_candidates", json!({}))
            .await
            .unwrap();
        assert_eq!(
            out.as_str().unwrap(),
            "Qonto configuration error: missing environment variables: QONTO_LOGIN"
        );
    }

    fn qonto() -> Arc<QontoClient> {
        let config = crate::config::QontoConfig {
            login: "acme".into(),
            secret_key: "secret".into(),
            debit_iban: "DE89370400440532013000".into(),
            client_id: None,
            client_secret: None,
            api_base_url: "http://127.0.0.1:9/v2".into(),
            oauth_base_url: "http://127.0.0.1:9/oauth".into(),
        };
        Arc::new(QontoClient::new(config, None).unwrap())
    }

    #[tokio::test]
    async fn find_candidates_rejects_huge_day_counts() {
        let adapter = connected(ReceiptsAdapter::new("r").with_qonto(qonto())).await;
        for params in [
            json!({"days_back": 200_000_000_000_000_i64}),
            json!({"email_window_days": 200_000_000_000_000_i64}),
            json!({"days_back": i64::MAX}),
        ] {
            let err = adapter
                .execute_tool("receipts_find_candidates", params)
                .await
                .unwrap_err();
            assert!(matches!(err, AdapterError::InvalidParams { .. }), "{err}");
        }
    }

    #[tokio::test]
    async fn find_candidates_rejects_non_positive_days() {
        let adapter = connected(ReceiptsAdapter::new("r").with_qonto(qonto())).await;
        let err = adapter
            .execute_tool("receipts_find_candidates", json!({"days_back": 0}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("`days_back` must be at least 1, got 0"), "{err}");

        let err = adapter
            .execute_tool("receipts_find_candidates", json!({"email_window_days": -1}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("`email_window_days` must be at least 0"), "{err}");
    }

    #[tokio::test]
    async fn attach_requires_ids() {
        let adapter = connected(ReceiptsAdapter::new("r")).await;
        let err = adapter
            .execute_tool("receipts_attach", json!({"transaction_id": "t"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidParams { .. }));
    }

    #[test]
    fn formats_attachment_list() {
        let attachments = vec![
            Attachment {
                id: "a1".into(),
                name: "invoice.pdf".into(),
                content_type: "application/pdf".into(),
                size_bytes: 20_480,
            },
            Attachment {
                id: "a2".into(),
                name: "logo.png".into(),
                content_type: "image/png".into(),
                size_bytes: 512,
            },
        ];
        assert_eq!(
            format_attachments(&attachments),
            "invoice.pdf (20 KB), logo.png (0 KB)"
        );
        assert_eq!(format_attachments(&[]), "(no file attachments)");
    }
}
