//! Qonto Business API client.
//!
//! Read-only endpoints (organization, transactions) authenticate with the
//! API key (`login:secret`).  Payment endpoints (payee verification, SEPA
//! transfers, SCA sessions, attachment upload) need an OAuth bearer token,
//! supplied by a [`TokenSource`].

mod transactions;
mod transfers;

use std::sync::Arc;
use std::time::Duration;

use bymcp_auth_engine::TokenSource;
use reqwest::header::{ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::QontoConfig;
use crate::error::{AdapterError, Result};
use crate::iban::mask_iban;

pub use transactions::Transaction;
pub use transfers::{
    Progress, ScaDecision, TransferOutcome, TransferRequest, extract_error,
    parse_transfer_response, sca_decision,
};

const SERVICE: &str = "Qonto";
const USER_AGENT: &str = concat!("bymcp/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry behaviour for throttled, failing or unreachable requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the 1-based `attempt` failed.
    fn delay(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        match retry_after {
            Some(secs) => Duration::from_secs(secs),
            None => self.base_delay.saturating_mul(2u32.saturating_pow(attempt)),
        }
    }
}

/// How SCA sessions are polled while the user approves on their phone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    /// How often a "still waiting" progress line is reported.
    pub progress_every: Duration,
}

impl Default for ScaPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
            progress_every: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    ApiKey,
    OAuth,
}

/// Client for the Qonto endpoints used by payroll and receipts.
pub struct QontoClient {
    config: QontoConfig,
    http: reqwest::Client,
    tokens: Option<Arc<dyn TokenSource>>,
    retry: RetryPolicy,
    sca: ScaPolicy,
    bank_account_id: OnceCell<String>,
}

impl QontoClient {
    /// Create a client.  Without a token source only API-key endpoints work.
    pub fn new(config: QontoConfig, tokens: Option<Arc<dyn TokenSource>>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AdapterError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            http,
            tokens,
            retry: RetryPolicy::default(),
            sca: ScaPolicy::default(),
            bank_account_id: OnceCell::new(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sca_policy(mut self, sca: ScaPolicy) -> Self {
        self.sca = sca;
        self
    }

    pub fn config(&self) -> &QontoConfig {
        &self.config
    }

    /// Whether payment endpoints can be called.
    pub fn has_oauth(&self) -> bool {
        self.tokens.is_some()
    }

    // -----------------------------------------------------------------------
    // Bank account
    // -----------------------------------------------------------------------

    /// The id of the bank account holding the configured debit IBAN.
    ///
    /// Resolved once per client.
    pub async fn bank_account_id(&self) -> Result<String> {
        self.bank_account_id
            .get_or_try_init(|| self.resolve_bank_account_id())
            .await
            .cloned()
    }

    async fn resolve_bank_account_id(&self) -> Result<String> {
        let url = self.url("/organizations/me");
        let resp = self
            .send(Auth::ApiKey, "GET /organizations/me", |http| http.get(&url))
            .await?;
        let status = resp.status();
        let body = read_body(resp).await;
        if status != StatusCode::OK {
            return Err(AdapterError::Http {
                status: status.as_u16(),
                message: format!("bank account id unavailable: {}", extract_error(&body)),
            });
        }

        let organization = &body["organization"];
        let accounts = organization["bank_accounts"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default();
        let wanted = &self.config.debit_iban;
        for account in accounts {
            let iban = account["iban"].as_str().unwrap_or_default().replace(' ', "");
            if iban.eq_ignore_ascii_case(wanted) {
                let id = json_string(&account["id"]).unwrap_or_default();
                info!(
                    organization = organization["legal_name"].as_str().unwrap_or("-"),
                    bank_account_id = %id,
                    "Qonto bank account resolved"
                );
                return Ok(id);
            }
        }

        let available: Vec<String> = accounts
            .iter()
            .filter_map(|a| a["iban"].as_str())
            .map(mask_iban)
            .collect();
        Err(AdapterError::ConfigError(format!(
            "no Qonto bank account with IBAN {} found. Available: {}",
            mask_iban(wanted),
            if available.is_empty() {
                "none".to_string()
            } else {
                available.join(", ")
            }
        )))
    }

    // -----------------------------------------------------------------------
    // Request helpers
    // -----------------------------------------------------------------------

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn authorization(&self, auth: Auth) -> Result<String> {
        match auth {
            Auth::ApiKey => Ok(self.config.api_key_header()),
            Auth::OAuth => {
                let tokens = self.tokens.as_ref().ok_or_else(|| {
                    AdapterError::ConfigError(
                        "Qonto OAuth is not configured: set QONTO_CLIENT_ID and QONTO_CLIENT_SECRET"
                            .into(),
                    )
                })?;
                Ok(format!("Bearer {}", tokens.access_token().await?))
            }
        }
    }

    /// Send a request built by `build`, retrying per the [`RetryPolicy`].
    ///
    /// 429 and 5xx responses are retried; the last response is returned
    /// once attempts run out.  Timeouts and connection errors are retried
    /// too, and exhausting them is an error.
    async fn send<F>(&self, auth: Auth, label: &str, build: F) -> Result<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let authorization = self.authorization(auth).await?;
        let attempts = self.retry.attempts.max(1);

        for attempt in 1..=attempts {
            let last = attempt == attempts;
            let request = build(&self.http)
                .header(AUTHORIZATION, &authorization)
                .header(ACCEPT, "application/json");

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if is_retryable(status) && !last {
                        let wait = self.retry.delay(attempt, retry_after(&resp));
                        warn!(
                            request = label,
                            status = status.as_u16(),
                            attempt,
                            attempts,
                            wait_ms = wait.as_millis() as u64,
                            "Qonto request failed, retrying"
                        );
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    warn!(request = label, attempt, attempts, error = %e, "Qonto unreachable");
                    if !last {
                        tokio::time::sleep(self.retry.delay(attempt, None)).await;
                    }
                }
                Err(e) => {
                    return Err(AdapterError::Request {
                        service: SERVICE.into(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(AdapterError::Request {
            service: SERVICE.into(),
            reason: format!("Qonto API unreachable after {attempts} attempts"),
        })
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_after(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Read a response body as JSON, keeping non-JSON bodies as a string.
async fn read_body(resp: Response) -> Value {
    let text = resp.text().await.unwrap_or_default();
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

/// A JSON string or number as a string.
fn json_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First `max` characters of `text`.
fn snippet(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
