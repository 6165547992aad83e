//! Outlook mail: messages with attachments, and attachment download.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::GraphClient;
use crate::error::{AdapterError, Result};

const PAGE_LIMIT: usize = 100;

/// An Outlook message that carries attachments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    pub id: String,
    pub subject: String,
    pub from_address: String,
    pub from_name: String,
    /// RFC 3339 receive time.
    pub received_at: String,
    pub body_preview: String,
}

impl MailMessage {
    fn from_json(value: &Value) -> Self {
        let sender = &value["from"]["emailAddress"];
        Self {
            id: text(&value["id"]),
            subject: text(&value["subject"]),
            from_address: text(&sender["address"]),
            from_name: text(&sender["name"]),
            received_at: text(&value["receivedDateTime"]),
            body_preview: text(&value["bodyPreview"]),
        }
    }

    pub fn received(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.received_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// The `YYYY-MM-DD` part of `received_at`.
    pub fn date(&self) -> &str {
        self.received_at.get(..10).unwrap_or(&self.received_at)
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub size_bytes: u64,
}

impl GraphClient {
    /// Messages with attachments received between `since` and `until`,
    /// newest first, at most `max`.
    pub async fn messages_with_attachments(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        max: usize,
    ) -> Result<Vec<MailMessage>> {
        let filter = format!(
            "hasAttachments eq true and receivedDateTime ge {} and receivedDateTime le {}",
            since.format("%Y-%m-%dT%H:%M:%SZ"),
            until.format("%Y-%m-%dT%H:%M:%SZ"),
        );
        let query = [
            ("$filter", filter),
            (
                "$select",
                "id,subject,from,receivedDateTime,bodyPreview".to_string(),
            ),
            ("$top", max.clamp(1, PAGE_LIMIT).to_string()),
            ("$orderby", "receivedDateTime desc".to_string()),
        ];

        let mut messages = Vec::new();
        let mut page = self.get_json("/me/messages", &query).await?;
        loop {
            if let Some(values) = page["value"].as_array() {
                messages.extend(values.iter().map(MailMessage::from_json));
            }
            if messages.len() >= max {
                break;
            }
            match page["@odata.nextLink"].as_str() {
                Some(next) if !next.is_empty() => {
                    let next = next.to_string();
                    page = self.get_json(&next, &[]).await?;
                }
                _ => break,
            }
        }
        messages.truncate(max);

        info!(count = messages.len(), "mails with attachments found");
        Ok(messages)
    }

    /// Non-inline attachments of a message.
    pub async fn list_attachments(&self, message_id: &str) -> Result<Vec<Attachment>> {
        let body = self
            .get_json(
                &format!("/me/messages/{message_id}/attachments"),
                &[("$select", "id,name,contentType,size,isInline".to_string())],
            )
            .await?;
        let attachments = body["value"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter(|a| !a["isInline"].as_bool().unwrap_or(false))
            .map(|a| Attachment {
                id: text(&a["id"]),
                name: a["name"].as_str().unwrap_or("attachment").to_string(),
                content_type: a["contentType"]
                    .as_str()
                    .unwrap_or("application/octet-stream")
                    .to_string(),
                size_bytes: a["size"].as_u64().unwrap_or(0),
            })
            .collect();
        Ok(attachments)
    }

    /// Raw bytes of an attachment.
    ///
    /// Falls back to the base64 `contentBytes` property when the `$value`
    /// endpoint fails for a reason other than authorization.
    pub async fn download_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let path = format!("/me/messages/{message_id}/attachments/{attachment_id}");
        match self.get_bytes(&format!("{path}/$value")).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.needs_authorization() => Err(e),
            Err(e) => {
                warn!(error = %e, "raw attachment download failed, using contentBytes");
                let body = self
                    .get_json(&path, &[("$select", "contentBytes".to_string())])
                    .await?;
                let encoded = body["contentBytes"].as_str().unwrap_or_default();
                STANDARD
                    .decode(encoded)
                    .map_err(|e| AdapterError::Internal(format!("invalid attachment encoding: {e}")))
            }
        }
    }
}

fn text(value: &Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}
