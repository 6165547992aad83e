//! Transaction listing and receipt upload.

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use super::{Auth, QontoClient, json_string, read_body, snippet};
use crate::error::Result;
use crate::qonto::transfers::extract_error;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const PAGE_SIZE: u32 = 100;

/// A completed bank transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub id: String,
    pub label: String,
    pub amount_cents: i64,
    pub currency: String,
    /// RFC 3339 timestamp as returned by Qonto.
    pub emitted_at: String,
    pub reference: String,
}

impl Transaction {
    fn from_json(value: &Value) -> Self {
        let amount = match &value["amount"] {
            Value::Number(n) => n.as_f64().unwrap_or_default(),
            Value::String(s) => s.trim().parse().unwrap_or_default(),
            _ => 0.0,
        };
        Self {
            id: json_string(&value["id"]).unwrap_or_default(),
            label: value["label"].as_str().unwrap_or_default().to_string(),
            amount_cents: (amount * 100.0).round() as i64,
            currency: value["currency"].as_str().unwrap_or("EUR").to_string(),
            emitted_at: value["emitted_at"].as_str().unwrap_or_default().to_string(),
            reference: value["reference"].as_str().unwrap_or_default().to_string(),
        }
    }

    /// The `YYYY-MM-DD` part of `emitted_at`.
    pub fn date(&self) -> &str {
        self.emitted_at.get(..10).unwrap_or(&self.emitted_at)
    }

    pub fn emitted_on(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.date(), "%Y-%m-%d").ok()
    }
}

impl QontoClient {
    /// Completed debit transactions between `from` and `to` that have no
    /// attachment yet.
    pub async fn transactions_without_receipts(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        let bank_account_id = self.bank_account_id().await?;
        let url = self.url("/transactions");
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();

        let mut transactions = Vec::new();
        let mut page: u64 = 1;
        loop {
            let page_param = page.to_string();
            let per_page = PAGE_SIZE.to_string();
            let query = [
                ("bank_account_id", bank_account_id.as_str()),
                ("status[]", "completed"),
                ("side", "debit"),
                ("emitted_at_from", from.as_str()),
                ("emitted_at_to", to.as_str()),
                ("per_page", per_page.as_str()),
                ("current_page", page_param.as_str()),
            ];
            let resp = self
                .send(Auth::ApiKey, "GET /transactions", |http| {
                    http.get(&url).query(&query)
                })
                .await?;
            let status = resp.status();
            let body = read_body(resp).await;
            if status != StatusCode::OK {
                error!(
                    status = status.as_u16(),
                    error = %snippet(&extract_error(&body), 200),
                    "listing Qonto transactions failed"
                );
                break;
            }

            let batch = body["transactions"].as_array().map(Vec::as_slice).unwrap_or_default();
            transactions.extend(
                batch
                    .iter()
                    .filter(|tx| {
                        tx["attachment_ids"]
                            .as_array()
                            .is_none_or(|ids| ids.is_empty())
                    })
                    .map(Transaction::from_json),
            );

            let total_pages = body["meta"]["total_pages"].as_u64().unwrap_or(1);
            if page >= total_pages {
                break;
            }
            page += 1;
        }

        info!(
            count = transactions.len(),
            from = %from,
            to = %to,
            "Qonto transactions without receipt"
        );
        Ok(transactions)
    }

    /// Upload a receipt and link it to a transaction.
    ///
    /// Returns whether Qonto accepted the file.
    pub async fn attach_receipt(
        &self,
        transaction_id: &str,
        bytes: &[u8],
        filename: &str,
        content_type: &str,
    ) -> bool {
        let url = self.url(&format!("/transactions/{transaction_id}/attachments"));
        let result = self
            .send(Auth::OAuth, "POST /transactions/attachments", |http| {
                let part = match Part::bytes(bytes.to_vec())
                    .file_name(filename.to_string())
                    .mime_str(content_type)
                {
                    Ok(part) => part,
                    Err(_) => Part::bytes(bytes.to_vec()).file_name(filename.to_string()),
                };
                http.post(&url)
                    .timeout(UPLOAD_TIMEOUT)
                    .multipart(Form::new().part("file", part))
            })
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                error!(transaction = %transaction_id, error = %e, "receipt upload failed");
                return false;
            }
        };

        let status = resp.status();
        match status.as_u16() {
            200 | 201 => {
                info!(transaction = %transaction_id, file = %filename, "receipt attached");
                true
            }
            422 => {
                let body = read_body(resp).await;
                warn!(
                    transaction = %transaction_id,
                    error = %snippet(&extract_error(&body), 300),
                    "receipt upload rejected"
                );
                false
            }
            code => {
                let body = read_body(resp).await;
                error!(
                    transaction = %transaction_id,
                    status = code,
                    error = %snippet(&extract_error(&body), 300),
                    "receipt upload failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn transaction_from_json() {
        let tx = Transaction::from_json(&json!({
            "id": "tx-1",
            "label": "Adobe Systems",
            "amount": 59.49,
            "currency": "EUR",
            "emitted_at": "2026-02-03T10:15:00.000Z",
            "reference": "INV-7",
        }));
        assert_eq!(tx.amount_cents, 5949);
        assert_eq!(tx.date(), "2026-02-03");
        assert_eq!(tx.emitted_on(), NaiveDate::from_ymd_opt(2026, 2, 3));
    }

    #[test]
    fn transaction_defaults() {
        let tx = Transaction::from_json(&json!({"id": 5, "amount": "12.1"}));
        assert_eq!(tx.id, "5");
        assert_eq!(tx.amount_cents, 1210);
        assert_eq!(tx.currency, "EUR");
        assert_eq!(tx.date(), "");
        assert_eq!(tx.emitted_on(), None);
    }
}
