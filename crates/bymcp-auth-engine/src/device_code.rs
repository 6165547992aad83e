//! RFC 8628 Device Authorization Grant.
//!
//! The MCP host cannot open a browser on our behalf and a tool call must
//! return promptly, so the Microsoft login uses the device flow: one tool
//! call fetches a short user code, the user enters it on any device, and a
//! second tool call polls the token endpoint until the grant completes.
//!
//! # Flow Overview
//!
//! 1. The client requests a device code from the authorization server.
//! 2. The server returns a `user_code` and `verification_uri`.
//! 3. The user visits the URI and enters the code in their browser.
//! 4. The client polls the token endpoint until the user completes auth.

use serde::{Deserialize, Serialize};

use crate::error::{AuthEngineError, Result};
use crate::oauth::{OAuthTokens, TokenErrorResponse, TokenResponse};

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Seconds added to the poll interval on `slow_down` (RFC 8628 §3.5).
const SLOW_DOWN_STEP_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for an OAuth 2.0 device authorization grant flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCodeConfig {
    /// The OAuth client ID.
    pub client_id: String,

    /// The device authorization endpoint URL.
    pub device_auth_url: String,

    /// The token endpoint URL.
    pub token_url: String,

    /// The scopes to request.
    pub scopes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Response from the device authorization endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCodeResponse {
    /// The device verification code.
    pub device_code: String,

    /// The end-user verification code to display to the user.
    pub user_code: String,

    /// The URI the user should visit to enter the code.
    pub verification_uri: String,

    /// Optional complete URI with the user code pre-filled.
    pub verification_uri_complete: Option<String>,

    /// Lifetime of the device_code and user_code in seconds.
    pub expires_in: u64,

    /// The minimum polling interval in seconds.
    pub interval: u64,

    /// Human-readable instructions, if the server sends any.
    pub message: Option<String>,
}

/// Some servers use `verification_url` instead of `verification_uri`.
#[derive(Debug, Deserialize)]
struct RawDeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: Option<String>,
    verification_url: Option<String>,
    verification_uri_complete: Option<String>,
    expires_in: u64,
    #[serde(default = "default_interval")]
    interval: u64,
    message: Option<String>,
}

fn default_interval() -> u64 {
    5
}

impl RawDeviceCodeResponse {
    fn into_response(self) -> Result<DeviceCodeResponse> {
        let verification_uri = self
            .verification_uri
            .or(self.verification_url)
            .ok_or_else(|| AuthEngineError::FlowFailed {
                reason: "device code response missing verification_uri".to_string(),
            })?;

        Ok(DeviceCodeResponse {
            device_code: self.device_code,
            user_code: self.user_code,
            verification_uri,
            verification_uri_complete: self.verification_uri_complete,
            expires_in: self.expires_in,
            interval: self.interval,
            message: self.message,
        })
    }
}

/// What to do after a poll returned an error body.
#[derive(Debug, PartialEq, Eq)]
enum PollStep {
    /// Keep polling at the given interval.
    Continue { interval: u64 },
    /// Stop with this error.
    Fail(String),
}

fn classify_poll_error(error: &TokenErrorResponse, interval: u64) -> PollStep {
    match error.error.as_str() {
        "authorization_pending" => PollStep::Continue { interval },
        "slow_down" => PollStep::Continue {
            interval: interval + SLOW_DOWN_STEP_SECS,
        },
        "access_denied" | "authorization_declined" => {
            PollStep::Fail("user denied authorization".to_string())
        }
        "expired_token" => PollStep::Fail(
            "device code expired before user completed authorization".to_string(),
        ),
        other => PollStep::Fail(format!(
            "device code poll error: {}",
            error.error_description.as_deref().unwrap_or(other)
        )),
    }
}

// ---------------------------------------------------------------------------
// Device code flow
// ---------------------------------------------------------------------------

/// Manages an RFC 8628 device authorization grant flow.
pub struct DeviceCodeFlow {
    config: DeviceCodeConfig,
    client: reqwest::Client,
}

impl DeviceCodeFlow {
    /// Create a new device code flow with the given configuration.
    pub fn new(config: DeviceCodeConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    /// Create a flow that reuses an existing HTTP client.
    pub fn with_client(config: DeviceCodeConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Request a device code from the authorization server.
    ///
    /// # Errors
    ///
    /// Returns [`AuthEngineError::NetworkError`] on transport failure, or
    /// [`AuthEngineError::FlowFailed`] if the server returns an error.
    pub async fn request_device_code(&self) -> Result<DeviceCodeResponse> {
        let scopes = self.config.scopes.join(" ");
        let mut params = vec![("client_id", self.config.client_id.as_str())];
        if !scopes.is_empty() {
            params.push(("scope", scopes.as_str()));
        }

        tracing::debug!(
            device_auth_url = %self.config.device_auth_url,
            "requesting device code"
        );

        let response = self
            .client
            .post(&self.config.device_auth_url)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthEngineError::FlowFailed {
                reason: format!("device code request failed: HTTP {status}: {body}"),
            });
        }

        let raw: RawDeviceCodeResponse = response.json().await?;
        raw.into_response()
    }

    /// Poll the token endpoint until the user completes authorization.
    ///
    /// Polls every `interval` seconds (increasing on `slow_down` responses)
    /// and gives up after `timeout` seconds.
    ///
    /// # Errors
    ///
    /// Returns [`AuthEngineError::FlowFailed`] if the user denies access or
    /// the device code expires, or [`AuthEngineError::CallbackTimeout`] if
    /// `timeout` seconds elapse.
    pub async fn poll_for_token(
        &self,
        device_code: &str,
        interval: u64,
        timeout: u64,
    ) -> Result<OAuthTokens> {
        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(timeout);
        let mut current_interval = interval;

        tracing::debug!(interval, timeout, "polling for device code token");

        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(current_interval)).await;

            if tokio::time::Instant::now() >= deadline {
                return Err(AuthEngineError::CallbackTimeout {
                    timeout_secs: timeout,
                });
            }

            let params = [
                ("grant_type", DEVICE_CODE_GRANT),
                ("device_code", device_code),
                ("client_id", self.config.client_id.as_str()),
            ];

            let response = self
                .client
                .post(&self.config.token_url)
                .form(&params)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                let token: TokenResponse = response.json().await?;
                tracing::info!("device code flow completed successfully");
                return Ok(token.into_tokens());
            }

            let body = response.text().await.unwrap_or_default();
            let poll_error = serde_json::from_str::<TokenErrorResponse>(&body).map_err(|_| {
                AuthEngineError::FlowFailed {
                    reason: format!("unexpected token response: HTTP {status}: {body}"),
                }
            })?;

            match classify_poll_error(&poll_error, current_interval) {
                PollStep::Continue { interval } => {
                    if interval != current_interval {
                        tracing::debug!(new_interval = interval, "slow_down received");
                    }
                    current_interval = interval;
                }
                PollStep::Fail(reason) => return Err(AuthEngineError::FlowFailed { reason }),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
