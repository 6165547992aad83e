//! Qonto OAuth session.
//!
//! Payment initiation and receipt upload need a user-level OAuth token.
//! Qonto only offers the authorization code flow, so the first use opens
//! the browser and waits for the redirect on a local port; afterwards the
//! refresh token keeps the session alive without user interaction.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::callback::CallbackServer;
use crate::error::{AuthEngineError, Result};
use crate::oauth::{OAuthConfig, OAuthFlow, OAuthTokens, generate_state};
use crate::token_cache::TokenCache;
use crate::token_source::TokenSource;

pub const QONTO_PROVIDER: &str = "qonto";

const DEFAULT_OAUTH_BASE_URL: &str = "https://oauth.qonto.com";
const DEFAULT_CALLBACK_PORT: u16 = 7777;
const CALLBACK_PATH: &str = "/callback";
const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 180;
const SCOPES: [&str; 3] = ["payment.write", "organization.read", "offline_access"];

/// Settings for the Qonto authorization code flow.
#[derive(Debug, Clone)]
pub struct QontoAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub oauth_base_url: String,
    pub callback_port: u16,
    pub callback_timeout_secs: u64,
    /// Try to open the system browser on the authorization URL.
    pub open_browser: bool,
}

impl QontoAuthConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            oauth_base_url: DEFAULT_OAUTH_BASE_URL.to_string(),
            callback_port: DEFAULT_CALLBACK_PORT,
            callback_timeout_secs: DEFAULT_CALLBACK_TIMEOUT_SECS,
            open_browser: true,
        }
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{CALLBACK_PATH}", self.callback_port)
    }

    fn oauth_config(&self) -> OAuthConfig {
        let base = self.oauth_base_url.trim_end_matches('/');
        OAuthConfig {
            client_id: self.client_id.clone(),
            client_secret: Some(self.client_secret.clone()),
            auth_url: format!("{base}/oauth2/auth"),
            token_url: format!("{base}/oauth2/token"),
            redirect_uri: self.redirect_uri(),
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
            scope_on_refresh: false,
        }
    }
}

/// A cached, self-refreshing Qonto OAuth session.
pub struct QontoSession {
    config: QontoAuthConfig,
    flow: OAuthFlow,
    cache: TokenCache,
    // Serializes refresh and interactive authorization.
    guard: Mutex<()>,
}

impl QontoSession {
    pub fn new(config: QontoAuthConfig, token_path: impl Into<PathBuf>) -> Self {
        let flow = OAuthFlow::new(config.oauth_config());
        Self {
            config,
            flow,
            cache: TokenCache::new(QONTO_PROVIDER, token_path),
            guard: Mutex::new(()),
        }
    }

    /// Whether using the session would require the user to log in.
    pub async fn needs_authorization(&self) -> bool {
        let _guard = self.guard.lock().await;
        if self.cache.valid_access_token().is_some() {
            return false;
        }
        self.try_refresh().await.is_none()
    }

    pub fn clear_tokens(&self) -> Result<()> {
        self.cache.clear()
    }

    /// Run the browser flow, reporting the authorization URL to `on_url`.
    ///
    /// The callback listener is bound before `on_url` runs, so the redirect
    /// cannot arrive before we are listening.
    pub async fn authorize_interactive<F>(&self, on_url: F) -> Result<OAuthTokens>
    where
        F: FnOnce(&str) + Send,
    {
        let state = generate_state()?;
        let server = CallbackServer::bind(self.config.callback_port, CALLBACK_PATH).await?;
        let url = self.flow.authorization_url(&state)?;

        on_url(&url);

        let (code, returned_state) = server.wait(self.config.callback_timeout_secs).await?;
        if returned_state != state {
            return Err(AuthEngineError::FlowFailed {
                reason: "state mismatch".to_string(),
            });
        }

        tracing::debug!("state parameter verified, exchanging code for tokens");
        let tokens = self.flow.exchange_code(&code).await?;
        self.cache.save(&tokens)?;

        tracing::info!(provider = QONTO_PROVIDER, "authorization completed");
        Ok(tokens)
    }

    async fn try_refresh(&self) -> Option<String> {
        let refresh_token = self.cache.refresh_token()?;
        match self.flow.refresh_token(&refresh_token).await {
            Ok(tokens) => match self.cache.save(&tokens) {
                Ok(()) => {
                    tracing::info!(provider = QONTO_PROVIDER, "access token refreshed");
                    Some(tokens.access_token)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "refreshed token could not be cached");
                    Some(tokens.access_token)
                }
            },
            Err(e) => {
                tracing::warn!(provider = QONTO_PROVIDER, error = %e, "token refresh failed");
                None
            }
        }
    }

    fn announce(&self, url: &str) {
        tracing::info!(url, "open this URL in your browser to authorize Qonto");
        if self.config.open_browser
            && let Err(e) = open_browser(url)
        {
            tracing::warn!(error = %e, "could not open the browser");
        }
    }
}

#[async_trait]
impl TokenSource for QontoSession {
    async fn access_token(&self) -> Result<String> {
        let _guard = self.guard.lock().await;

        if let Some(token) = self.cache.valid_access_token() {
            return Ok(token);
        }
        if let Some(token) = self.try_refresh().await {
            return Ok(token);
        }

        let tokens = self.authorize_interactive(|url| self.announce(url)).await?;
        Ok(tokens.access_token)
    }
}

/// Try to open a URL in the default browser.
fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", "", url])
            .spawn()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_derive_from_base_url() {
        let mut config = QontoAuthConfig::new("id", "secret");
        config.oauth_base_url = "http://127.0.0.1:9000/".to_string();
        let oauth = config.oauth_config();
        assert_eq!(oauth.auth_url, "http://127.0.0.1:9000/oauth2/auth");
        assert_eq!(oauth.token_url, "http://127.0.0.1:9000/oauth2/token");
        assert_eq!(oauth.redirect_uri, "http://localhost:7777/callback");
        assert_eq!(oauth.client_secret.as_deref(), Some("secret"));
        assert_eq!(
            oauth.scopes,
            vec!["payment.write", "organization.read", "offline_access"]
        );
    }

    #[test]
    fn defaults_match_registered_app() {
        let config = QontoAuthConfig::new("id", "secret");
        assert_eq!(config.oauth_base_url, "https://oauth.qonto.com");
        assert_eq!(config.callback_port, 7777);
        assert_eq!(config.callback_timeout_secs, 180);
    }

    #[tokio::test]
    async fn cached_token_needs_no_authorization() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qonto_tokens.json");
        let session = QontoSession::new(QontoAuthConfig::new("id", "secret"), &path);
        assert!(session.cache.valid_access_token().is_none());

        session
            .cache
            .save(&OAuthTokens {
                access_token: "cached".to_string(),
                refresh_token: None,
                expires_at: Some(chrono::Utc::now().timestamp() + 3600),
                token_type: "Bearer".to_string(),
                scopes: vec![],
            })
            .unwrap();

        assert!(!session.needs_authorization().await);
        assert_eq!(session.access_token().await.unwrap(), "cached");
    }
}
