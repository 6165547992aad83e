//! OAuth 2.0 Authorization Code Flow (RFC 6749).
//!
//! Confidential-client variant: the client secret is sent with both the
//! code exchange and the refresh grant, and a random `state` parameter
//! binds the browser redirect to the flow that started it.
//!
//! # Flow Overview
//!
//! 1. Generate a random state.
//! 2. Build an authorization URL and send the user to it.
//! 3. Receive the authorization code via the local callback.
//! 4. Exchange the code for tokens.
//! 5. Refresh tokens when they expire.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthEngineError, Result};

/// Random bytes in a generated `state` value.
const STATE_BYTES: usize = 16;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Tokens are treated as expired this many seconds early.
const EXPIRY_MARGIN_SECS: i64 = 60;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for an OAuth 2.0 authorization code flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// The OAuth client ID.
    pub client_id: String,

    /// The OAuth client secret (confidential clients only).
    pub client_secret: Option<String>,

    /// The authorization endpoint URL.
    pub auth_url: String,

    /// The token endpoint URL.
    pub token_url: String,

    /// The redirect URI registered with the authorization server.
    pub redirect_uri: String,

    /// The scopes to request.
    pub scopes: Vec<String>,

    /// Repeat the scopes on refresh requests (required by Microsoft).
    #[serde(default)]
    pub scope_on_refresh: bool,
}

// ---------------------------------------------------------------------------
// Token types
// ---------------------------------------------------------------------------

/// Tokens returned by the authorization server after a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthTokens {
    /// The access token used to authenticate API requests.
    pub access_token: String,

    /// The refresh token used to obtain new access tokens.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Unix timestamp (seconds) when the access token expires.
    #[serde(default)]
    pub expires_at: Option<i64>,

    /// The token type (typically "Bearer").
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// The scopes that were granted.
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl OAuthTokens {
    /// Whether the access token is expired or about to expire.
    ///
    /// Tokens without an expiry are assumed valid.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => chrono::Utc::now().timestamp() >= expires_at - EXPIRY_MARGIN_SECS,
            None => false,
        }
    }
}

/// Raw token response from the authorization server.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
}

impl TokenResponse {
    /// Convert into [`OAuthTokens`], computing `expires_at` from `expires_in`.
    pub(crate) fn into_tokens(self) -> OAuthTokens {
        let expires_in = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let scopes = self
            .scope
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        OAuthTokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: Some(chrono::Utc::now().timestamp() + expires_in),
            token_type: self.token_type.unwrap_or_else(default_token_type),
            scopes,
        }
    }
}

/// Raw error response from the authorization server.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenErrorResponse {
    pub(crate) error: String,
    pub(crate) error_description: Option<String>,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Generate a random `state` value (16 bytes, base64url encoded).
///
/// # Errors
///
/// Returns an error if the system CSPRNG fails.
pub fn generate_state() -> Result<String> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; STATE_BYTES];
    rng.fill(&mut bytes)
        .map_err(|_| AuthEngineError::FlowFailed {
            reason: "failed to generate state: CSPRNG error".to_string(),
        })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

// ---------------------------------------------------------------------------
// OAuth flow
// ---------------------------------------------------------------------------

/// Stateless helper for the authorization code flow.
pub struct OAuthFlow {
    config: OAuthConfig,
    client: reqwest::Client,
}

impl OAuthFlow {
    /// Create a new OAuth flow with the given configuration.
    pub fn new(config: OAuthConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    /// Create a flow that reuses an existing HTTP client.
    pub fn with_client(config: OAuthConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the authorization URL the user should visit.
    ///
    /// # Errors
    ///
    /// Returns [`AuthEngineError::UrlParse`] if the `auth_url` in the config
    /// is not a valid URL.
    pub fn authorization_url(&self, state: &str) -> Result<String> {
        let mut url = Url::parse(&self.config.auth_url)?;

        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("redirect_uri", &self.config.redirect_uri);
            params.append_pair("state", state);

            if !self.config.scopes.is_empty() {
                params.append_pair("scope", &self.config.scopes.join(" "));
            }
        }

        Ok(url.to_string())
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns [`AuthEngineError::InvalidGrant`] if the server rejects the
    /// code, or [`AuthEngineError::NetworkError`] on transport failure.
    pub async fn exchange_code(&self, code: &str) -> Result<OAuthTokens> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        tracing::debug!(token_url = %self.config.token_url, "exchanging authorization code");

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await?;

        parse_token_response(response).await
    }

    /// Refresh an access token using a refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthEngineError::InvalidGrant`] if the refresh token is
    /// invalid or revoked.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthTokens> {
        let scopes = self.config.scopes.join(" ");
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }
        if self.config.scope_on_refresh && !scopes.is_empty() {
            params.push(("scope", scopes.as_str()));
        }

        tracing::debug!(token_url = %self.config.token_url, "refreshing access token");

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await?;

        let mut tokens = parse_token_response(response).await?;
        // Some servers rotate refresh tokens, others omit them on refresh.
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        Ok(tokens)
    }
}

/// Parse the HTTP response from a token endpoint.
pub(crate) async fn parse_token_response(response: reqwest::Response) -> Result<OAuthTokens> {
    let status = response.status();

    if status.is_success() {
        let token_response: TokenResponse = response.json().await?;
        tracing::debug!("token request successful");
        return Ok(token_response.into_tokens());
    }

    let body = response.text().await.unwrap_or_default();
    let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
        Ok(error_response) => error_response
            .error_description
            .unwrap_or(error_response.error),
        Err(_) => format!("HTTP {status}: {body}"),
    };
    Err(AuthEngineError::InvalidGrant { reason })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> OAuthConfig {
        OAuthConfig {
            client_id: "test-client-id".to_string(),
            client_secret: Some("test-secret".to_string()),
            auth_url: "https://oauth.example.com/oauth2/auth".to_string(),
            token_url: "https://oauth.example.com/oauth2/token".to_string(),
            redirect_uri: "http://localhost:7777/callback".to_string(),
            scopes: vec!["payment.write".to_string(), "offline_access".to_string()],
            scope_on_refresh: false,
        }
    }

    fn tokens_expiring_at(expires_at: Option<i64>) -> OAuthTokens {
        OAuthTokens {
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_at,
            token_type: "Bearer".to_string(),
            scopes: vec![],
        }
    }

    #[test]
    fn state_is_url_safe_and_random() {
        let a = generate_state().unwrap();
        let b = generate_state().unwrap();
        // 16 bytes base64url encoded = 22 characters (no padding).
        assert_eq!(a.len(), 22);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn authorization_url_includes_all_params() {
        let flow = OAuthFlow::new(test_config());
        let url_str = flow.authorization_url("random-state").unwrap();

        let url = Url::parse(&url_str).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().collect();

        assert_eq!(params.get("response_type").unwrap(), "code");
        assert_eq!(params.get("client_id").unwrap(), "test-client-id");
        assert_eq!(
            params.get("redirect_uri").unwrap(),
            "http://localhost:7777/callback"
        );
        assert_eq!(params.get("state").unwrap(), "random-state");
        assert_eq!(params.get("scope").unwrap(), "payment.write offline_access");
        assert!(!params.contains_key("code_challenge"));
    }

    #[test]
    fn authorization_url_preserves_existing_query_params() {
        let mut config = test_config();
        config.auth_url = "https://oauth.example.com/oauth2/auth?prompt=login".to_string();
        let flow = OAuthFlow::new(config);
        let url_str = flow.authorization_url("state").unwrap();

        let url = Url::parse(&url_str).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().collect();

        assert_eq!(params.get("prompt").unwrap(), "login");
        assert_eq!(params.get("response_type").unwrap(), "code");
    }

    #[test]
    fn authorization_url_rejects_invalid_base() {
        let mut config = test_config();
        config.auth_url = "not a url".to_string();
        let flow = OAuthFlow::new(config);
        assert!(matches!(
            flow.authorization_url("s"),
            Err(AuthEngineError::UrlParse(_))
        ));
    }

    #[test]
    fn token_response_parsing() {
        let json = r#"{
            "access_token": "at_abc123",
            "refresh_token": "rt_def456",
            "expires_in": 3600,
            "token_type": "Bearer",
            "scope": "payment.write organization.read"
        }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        let tokens = response.into_tokens();

        assert_eq!(tokens.access_token, "at_abc123");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt_def456"));
        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.scopes, vec!["payment.write", "organization.read"]);
        assert!(!tokens.is_expired());
    }

    #[test]
    fn token_response_without_expiry_defaults_to_one_hour() {
        let json = r#"{ "access_token": "tok_minimal" }"#;

        let before = chrono::Utc::now().timestamp();
        let response: TokenResponse = serde_json::from_str(json).unwrap();
        let tokens = response.into_tokens();

        let expires_at = tokens.expires_at.unwrap();
        assert!(expires_at >= before + DEFAULT_EXPIRES_IN_SECS);
        assert!(tokens.refresh_token.is_none());
        assert_eq!(tokens.token_type, "Bearer");
    }

    #[test]
    fn is_expired_with_future_expiry() {
        let tokens = tokens_expiring_at(Some(chrono::Utc::now().timestamp() + 3600));
        assert!(!tokens.is_expired());
    }

    #[test]
    fn is_expired_with_past_expiry() {
        let tokens = tokens_expiring_at(Some(chrono::Utc::now().timestamp() - 100));
        assert!(tokens.is_expired());
    }

    #[test]
    fn is_expired_within_safety_margin() {
        let tokens = tokens_expiring_at(Some(chrono::Utc::now().timestamp() + 30));
        assert!(tokens.is_expired());
    }

    #[test]
    fn is_expired_with_no_expiry() {
        assert!(!tokens_expiring_at(None).is_expired());
    }

    #[test]
    fn persisted_tokens_tolerate_missing_fields() {
        let json = r#"{ "access_token": "a", "expires_at": 123 }"#;
        let tokens: OAuthTokens = serde_json::from_str(json).unwrap();
        assert_eq!(tokens.expires_at, Some(123));
        assert_eq!(tokens.token_type, "Bearer");
        assert!(tokens.scopes.is_empty());
    }

    #[test]
    fn token_error_response_parsing() {
        let json = r#"{
            "error": "invalid_grant",
            "error_description": "The code has expired"
        }"#;

        let err: TokenErrorResponse = serde_json::from_str(json).unwrap();
        assert_eq!(err.error, "invalid_grant");
        assert_eq!(
            err.error_description.as_deref(),
            Some("The code has expired")
        );
    }

    #[test]
    fn oauth_flow_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OAuthFlow>();
        assert_send_sync::<OAuthConfig>();
        assert_send_sync::<OAuthTokens>();
    }
}
