//! SEPA transfers with verification of payee and SCA approval.

use std::time::Instant;

use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use super::{Auth, QontoClient, SERVICE, json_string, read_body, snippet};
use crate::error::{AdapterError, Result};
use crate::money::format_cents;
use crate::report::LogLevel;

/// Receives progress lines while a transfer is running.
pub type Progress<'a> = &'a mut (dyn FnMut(LogLevel, String) + Send);

/// One salary transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub name: String,
    pub iban: String,
    pub amount_cents: i64,
    /// `YYYY-MM`.
    pub period: String,
    pub idempotency_key: String,
}

/// What happened to a transfer request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOutcome {
    pub success: bool,
    pub transfer_id: Option<String>,
    /// Failure reason, or a note on a success (e.g. idempotent replay).
    pub error: String,
    /// Final HTTP status, when a response was received.
    pub status: Option<u16>,
}

impl TransferOutcome {
    fn failed(error: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            success: false,
            transfer_id: None,
            error: error.into(),
            status,
        }
    }
}

/// State of an SCA session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaDecision {
    Approved,
    Denied,
    Pending,
}

impl QontoClient {
    /// Verify the beneficiary name against the IBAN holder.
    ///
    /// Returns the proof token required by the transfer endpoint.  A name
    /// mismatch is logged but does not block the transfer.
    pub async fn verify_payee(&self, iban: &str, name: &str) -> Result<String> {
        let url = self.url("/sepa/verify_payee");
        let payload = json!({ "iban": iban, "beneficiary_name": name });
        let resp = self
            .send(Auth::OAuth, "POST /sepa/verify_payee", |http| {
                http.post(&url).json(&payload)
            })
            .await?;
        let status = resp.status();
        let body = read_body(resp).await;
        if status != StatusCode::OK {
            return Err(AdapterError::Http {
                status: status.as_u16(),
                message: snippet(&body_text(&body), 200),
            });
        }

        let match_result = body["match_result"].as_str().unwrap_or_default();
        match match_result {
            "MATCH_RESULT_MATCH" => info!(payee = %name, "payee name matches"),
            "MATCH_RESULT_CLOSE_MATCH" | "MATCH_RESULT_NO_MATCH" | "MATCH_RESULT_NOT_POSSIBLE" => {
                warn!(payee = %name, match_result, "payee verification not a full match, continuing")
            }
            _ => {}
        }

        body["proof_token"]["token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AdapterError::Request {
                service: SERVICE.into(),
                reason: "verify_payee response has no proof token".into(),
            })
    }

    /// Create a SEPA credit transfer, waiting for SCA approval if required.
    pub async fn create_transfer(
        &self,
        request: &TransferRequest,
        progress: Progress<'_>,
    ) -> TransferOutcome {
        info!(
            employee = %request.name,
            period = %request.period,
            amount_cents = request.amount_cents,
            "creating transfer"
        );

        let proof_token = match self.verify_payee(&request.iban, &request.name).await {
            Ok(token) => token,
            Err(e) => {
                error!(employee = %request.name, error = %e, "payee verification failed");
                return TransferOutcome::failed(format!("payee verification failed: {e}"), None);
            }
        };
        let bank_account_id = match self.bank_account_id().await {
            Ok(id) => id,
            Err(e) => return TransferOutcome::failed(e.to_string(), None),
        };

        let reference = format!("Gehalt {}", request.period);
        let payload = json!({
            "vop_proof_token": proof_token,
            "transfer": {
                "bank_account_id": bank_account_id,
                "beneficiary": { "name": request.name, "iban": request.iban },
                "reference": reference,
                "amount": format_cents(request.amount_cents),
                "note": reference,
            },
        });

        let (mut status, mut body) =
            match self.post_transfer(&payload, &request.idempotency_key, None).await {
                Ok(response) => response,
                Err(e) => return TransferOutcome::failed(e.to_string(), None),
            };

        if status == StatusCode::PRECONDITION_REQUIRED.as_u16() {
            let Some(sca_token) = body["sca_session_token"]
                .as_str()
                .filter(|t| !t.is_empty())
                .map(str::to_string)
            else {
                return TransferOutcome::failed(
                    "SCA required but no sca_session_token returned.",
                    Some(status),
                );
            };

            let msg = format!(
                "Please approve the transfer for {} in the Qonto app",
                request.name
            );
            info!("{msg}");
            progress(LogLevel::Info, msg);

            if !self.poll_sca_session(&sca_token, &mut *progress).await {
                return TransferOutcome::failed(
                    "SCA approval denied or timed out.",
                    Some(status),
                );
            }

            (status, body) = match self
                .post_transfer(&payload, &request.idempotency_key, Some(&sca_token))
                .await
            {
                Ok(response) => response,
                Err(e) => return TransferOutcome::failed(e.to_string(), None),
            };
        }

        let outcome = parse_transfer_response(status, &body);
        if outcome.success {
            info!(
                employee = %request.name,
                transfer_id = outcome.transfer_id.as_deref().unwrap_or("-"),
                "transfer accepted"
            );
        } else {
            error!(employee = %request.name, status, error = %outcome.error, "transfer rejected");
        }
        outcome
    }

    async fn post_transfer(
        &self,
        payload: &Value,
        idempotency_key: &str,
        sca_token: Option<&str>,
    ) -> Result<(u16, Value)> {
        let url = self.url("/sepa/transfers");
        let resp = self
            .send(Auth::OAuth, "POST /sepa/transfers", |http| {
                let builder = http
                    .post(&url)
                    .header("X-Qonto-Idempotency-Key", idempotency_key)
                    .header("X-Qonto-2fa-Preference", "paired-device")
                    .json(payload);
                match sca_token {
                    Some(token) => builder.header("X-Qonto-Sca-Session-Token", token),
                    None => builder,
                }
            })
            .await?;
        let status = resp.status().as_u16();
        Ok((status, read_body(resp).await))
    }

    /// Poll an SCA session until it is approved, denied or times out.
    pub async fn poll_sca_session(&self, token: &str, progress: Progress<'_>) -> bool {
        let url = self.url(&format!("/sca_sessions/{token}"));
        let deadline = Instant::now() + self.sca.timeout;
        let mut last_report: Option<Instant> = None;

        while Instant::now() < deadline {
            let now = Instant::now();
            if last_report.is_none_or(|at| now.duration_since(at) >= self.sca.progress_every) {
                let remaining = deadline.saturating_duration_since(now).as_secs();
                progress(
                    LogLevel::Info,
                    format!("waiting for approval in the Qonto app ({remaining}s remaining)"),
                );
                last_report = Some(now);
            }

            match self
                .send(Auth::OAuth, "GET /sca_sessions", |http| http.get(&url))
                .await
            {
                Ok(resp) if resp.status() == StatusCode::OK => {
                    let body = read_body(resp).await;
                    match sca_decision(&body) {
                        ScaDecision::Approved => return true,
                        ScaDecision::Denied => {
                            progress(LogLevel::Warning, "SCA approval was denied.".into());
                            return false;
                        }
                        ScaDecision::Pending => {}
                    }
                }
                Ok(resp) => {
                    let status = resp.status();
                    if status != StatusCode::NOT_FOUND && status.as_u16() != 425 {
                        let body = read_body(resp).await;
                        warn!(status = status.as_u16(), body = %snippet(&body_text(&body), 200), "SCA poll failed");
                    }
                }
                Err(e) => warn!(error = %e, "SCA poll failed"),
            }

            tokio::time::sleep(self.sca.interval).await;
        }

        progress(
            LogLevel::Warning,
            format!(
                "SCA timeout: no approval received within {}s.",
                self.sca.timeout.as_secs()
            ),
        );
        false
    }
}

/// Interpret the final response of `POST /sepa/transfers`.
pub fn parse_transfer_response(status: u16, body: &Value) -> TransferOutcome {
    match status {
        200 | 201 => {
            let transfer = match body.get("transfer") {
                Some(t) if t.is_object() => t,
                _ => body,
            };
            let transfer_id = json_string(&transfer["id"]).or_else(|| json_string(&transfer["uuid"]));
            TransferOutcome {
                success: true,
                transfer_id,
                error: String::new(),
                status: Some(status),
            }
        }
        422 => {
            let text = body_text(body).to_lowercase();
            if text.contains("idempotency") || text.contains("already") {
                TransferOutcome {
                    success: true,
                    transfer_id: None,
                    error: "already processed (idempotency)".into(),
                    status: Some(status),
                }
            } else {
                TransferOutcome::failed(extract_error(body), Some(status))
            }
        }
        _ => TransferOutcome::failed(extract_error(body), Some(status)),
    }
}

/// The human-readable message of a Qonto error body.
pub fn extract_error(body: &Value) -> String {
    match body {
        Value::Object(map) => {
            if let Some(errors) = map.get("errors").and_then(Value::as_array)
                && !errors.is_empty()
            {
                return errors
                    .iter()
                    .filter(|e| e.is_object())
                    .map(|e| match e.get("message").and_then(Value::as_str) {
                        Some(message) => message.to_string(),
                        None => e.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
            }
            match map.get("message").and_then(Value::as_str) {
                Some(message) => message.to_string(),
                None => body.to_string(),
            }
        }
        other => body_text(other),
    }
}

/// Decide an SCA session state from a `GET /sca_sessions/{token}` body.
pub fn sca_decision(body: &Value) -> ScaDecision {
    let session = match body.get("sca_session") {
        Some(s) if s.is_object() => s,
        _ => body,
    };
    let result = session["result"]
        .as_str()
        .filter(|r| !r.is_empty())
        .or_else(|| session["status"].as_str())
        .unwrap_or_default();
    match result {
        "allow" => ScaDecision::Approved,
        "deny" | "denied" | "rejected" | "cancel" => ScaDecision::Denied,
        _ => ScaDecision::Pending,
    }
}

fn body_text(body: &Value) -> String {
    match body {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
