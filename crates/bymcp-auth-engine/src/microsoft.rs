//! Microsoft identity platform session (Graph mail and SharePoint).
//!
//! Authorization is split across two tool calls: [`MicrosoftSession::start_device_flow`]
//! fetches a user code and persists the pending device code, and
//! [`MicrosoftSession::complete_device_flow`] polls until the user has
//! entered it. Between the two calls the server may even restart.

use std::path::PathBuf;

use async_trait::async_trait;
use bymcp_store::StateFile;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::device_code::{DeviceCodeConfig, DeviceCodeFlow, DeviceCodeResponse};
use crate::error::{AuthEngineError, Result};
use crate::oauth::{OAuthConfig, OAuthFlow, OAuthTokens};
use crate::token_cache::TokenCache;
use crate::token_source::TokenSource;

pub const MICROSOFT_PROVIDER: &str = "microsoft";

const DEFAULT_LOGIN_BASE_URL: &str = "https://login.microsoftonline.com";
const DEFAULT_TENANT: &str = "common";
const SCOPES: [&str; 3] = [
    "https://graph.microsoft.com/Mail.Read",
    "Sites.ReadWrite.All",
    "offline_access",
];

/// Settings for the Microsoft device flow.
#[derive(Debug, Clone)]
pub struct MicrosoftAuthConfig {
    pub client_id: String,
    pub tenant_id: String,
    pub login_base_url: String,
}

impl MicrosoftAuthConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            tenant_id: DEFAULT_TENANT.to_string(),
            login_base_url: DEFAULT_LOGIN_BASE_URL.to_string(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    fn endpoint(&self, tenant_id: &str, path: &str) -> String {
        format!(
            "{}/{tenant_id}/oauth2/v2.0/{path}",
            self.login_base_url.trim_end_matches('/')
        )
    }

    fn device_config(&self, client_id: &str, tenant_id: &str) -> DeviceCodeConfig {
        DeviceCodeConfig {
            client_id: client_id.to_string(),
            device_auth_url: self.endpoint(tenant_id, "devicecode"),
            token_url: self.endpoint(tenant_id, "token"),
            scopes: scopes(),
        }
    }

    fn refresh_config(&self) -> OAuthConfig {
        OAuthConfig {
            client_id: self.client_id.clone(),
            client_secret: None,
            auth_url: self.endpoint(&self.tenant_id, "authorize"),
            token_url: self.endpoint(&self.tenant_id, "token"),
            redirect_uri: String::new(),
            scopes: scopes(),
            scope_on_refresh: true,
        }
    }
}

fn scopes() -> Vec<String> {
    SCOPES.iter().map(|s| s.to_string()).collect()
}

/// A device authorization that was started but not yet completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeviceFlow {
    pub client_id: String,
    pub tenant_id: String,
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub interval: u64,
    pub expires_in: u64,
    /// Unix timestamp when the code was issued.
    pub started_at: i64,
}

impl PendingDeviceFlow {
    /// Seconds until the device code expires, at least 1.
    fn remaining_secs(&self) -> u64 {
        let elapsed = (chrono::Utc::now().timestamp() - self.started_at).max(0) as u64;
        self.expires_in.saturating_sub(elapsed).max(1)
    }
}

/// A cached, self-refreshing Microsoft Graph session.
pub struct MicrosoftSession {
    config: MicrosoftAuthConfig,
    refresh_flow: OAuthFlow,
    cache: TokenCache,
    pending: StateFile<PendingDeviceFlow>,
    guard: Mutex<()>,
}

impl MicrosoftSession {
    pub fn new(
        config: MicrosoftAuthConfig,
        token_path: impl Into<PathBuf>,
        pending_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            refresh_flow: OAuthFlow::new(config.refresh_config()),
            config,
            cache: TokenCache::new(MICROSOFT_PROVIDER, token_path),
            pending: StateFile::new(pending_path),
            guard: Mutex::new(()),
        }
    }

    /// Request a user code and remember the pending authorization.
    pub async fn start_device_flow(&self) -> Result<DeviceCodeResponse> {
        let flow = DeviceCodeFlow::new(
            self.config
                .device_config(&self.config.client_id, &self.config.tenant_id),
        );
        let response = flow.request_device_code().await?;

        self.pending.save(&PendingDeviceFlow {
            client_id: self.config.client_id.clone(),
            tenant_id: self.config.tenant_id.clone(),
            device_code: response.device_code.clone(),
            user_code: response.user_code.clone(),
            verification_uri: response.verification_uri.clone(),
            interval: response.interval,
            expires_in: response.expires_in,
            started_at: chrono::Utc::now().timestamp(),
        })?;

        tracing::info!(
            user_code = %response.user_code,
            verification_uri = %response.verification_uri,
            "device authorization started"
        );
        Ok(response)
    }

    pub fn pending_flow(&self) -> Option<PendingDeviceFlow> {
        self.pending.load()
    }

    /// Poll for the pending authorization and cache the resulting tokens.
    ///
    /// The pending state is removed whether or not the poll succeeds.
    pub async fn complete_device_flow(&self) -> Result<OAuthTokens> {
        let pending = self
            .pending
            .load()
            .ok_or_else(|| AuthEngineError::NoPendingFlow {
                provider: MICROSOFT_PROVIDER.to_string(),
            })?;

        let flow = DeviceCodeFlow::new(
            self.config
                .device_config(&pending.client_id, &pending.tenant_id),
        );
        let result = flow
            .poll_for_token(&pending.device_code, pending.interval, pending.remaining_secs())
            .await;

        if let Err(e) = self.pending.clear() {
            tracing::warn!(error = %e, "pending device flow could not be removed");
        }

        let tokens = result?;
        self.cache.save(&tokens)?;
        tracing::info!(provider = MICROSOFT_PROVIDER, "authorization completed");
        Ok(tokens)
    }

    pub async fn needs_authorization(&self) -> bool {
        let _guard = self.guard.lock().await;
        if self.cache.valid_access_token().is_some() {
            return false;
        }
        self.try_refresh().await.is_none()
    }

    pub fn clear_tokens(&self) -> Result<()> {
        self.cache.clear()?;
        self.pending.clear()?;
        Ok(())
    }

    async fn try_refresh(&self) -> Option<String> {
        let refresh_token = self.cache.refresh_token()?;
        match self.refresh_flow.refresh_token(&refresh_token).await {
            Ok(tokens) => {
                if let Err(e) = self.cache.save(&tokens) {
                    tracing::warn!(error = %e, "refreshed token could not be cached");
                }
                tracing::info!(provider = MICROSOFT_PROVIDER, "access token refreshed");
                Some(tokens.access_token)
            }
            Err(e) => {
                tracing::warn!(provider = MICROSOFT_PROVIDER, error = %e, "token refresh failed");
                None
            }
        }
    }
}

#[async_trait]
impl TokenSource for MicrosoftSession {
    async fn access_token(&self) -> Result<String> {
        let _guard = self.guard.lock().await;

        if let Some(token) = self.cache.valid_access_token() {
            return Ok(token);
        }
        if let Some(token) = self.try_refresh().await {
            return Ok(token);
        }
        Err(AuthEngineError::TokenExpired {
            provider: MICROSOFT_PROVIDER.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_use_tenant() {
        let config = MicrosoftAuthConfig::new("client").with_tenant("contoso");
        let device = config.device_config("client", "contoso");
        assert_eq!(
            device.device_auth_url,
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/devicecode"
        );
        assert_eq!(
            device.token_url,
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
        assert_eq!(device.scopes.len(), 3);
    }

    #[test]
    fn refresh_sends_scope() {
        let config = MicrosoftAuthConfig::new("client");
        assert!(config.refresh_config().scope_on_refresh);
        assert_eq!(config.tenant_id, "common");
    }

    #[test]
    fn remaining_time_never_reaches_zero() {
        let pending = PendingDeviceFlow {
            client_id: "c".into(),
            tenant_id: "t".into(),
            device_code: "d".into(),
            user_code: "u".into(),
            verification_uri: "v".into(),
            interval: 5,
            expires_in: 900,
            started_at: chrono::Utc::now().timestamp() - 10_000,
        };
        assert_eq!(pending.remaining_secs(), 1);
    }

    #[tokio::test]
    async fn completing_without_pending_flow_fails() {
        let dir = tempfile::tempdir().unwrap();
        let session = MicrosoftSession::new(
            MicrosoftAuthConfig::new("client"),
            dir.path().join("ms_tokens.json"),
            dir.path().join("ms_device_flow.json"),
        );
        let err = session.complete_device_flow().await.unwrap_err();
        assert!(matches!(err, AuthEngineError::NoPendingFlow { .. }));
    }

    #[tokio::test]
    async fn no_tokens_means_expired() {
        let dir = tempfile::tempdir().unwrap();
        let session = MicrosoftSession::new(
            MicrosoftAuthConfig::new("client"),
            dir.path().join("ms_tokens.json"),
            dir.path().join("ms_device_flow.json"),
        );
        assert!(session.needs_authorization().await);
        assert!(matches!(
            session.access_token().await,
            Err(AuthEngineError::TokenExpired { .. })
        ));
    }
}
