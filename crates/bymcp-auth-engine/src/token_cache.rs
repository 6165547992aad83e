//! On-disk token cache.
//!
//! Each provider keeps its [`OAuthTokens`] in one JSON file under the data
//! directory. The cache knows nothing about refreshing; it only answers
//! "is there a token that is still good".

use std::path::PathBuf;

use bymcp_store::StateFile;

use crate::error::Result;
use crate::oauth::OAuthTokens;

pub struct TokenCache {
    provider: &'static str,
    file: StateFile<OAuthTokens>,
}

impl TokenCache {
    pub fn new(provider: &'static str, path: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            file: StateFile::new(path),
        }
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    pub fn load(&self) -> Option<OAuthTokens> {
        self.file.load()
    }

    pub fn save(&self, tokens: &OAuthTokens) -> Result<()> {
        self.file.save(tokens)?;
        tracing::debug!(provider = self.provider, "tokens cached");
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.file.clear()?;
        tracing::info!(provider = self.provider, "cached tokens removed");
        Ok(())
    }

    /// The cached access token, if it is not (about to be) expired.
    pub fn valid_access_token(&self) -> Option<String> {
        self.load()
            .filter(|tokens| !tokens.is_expired())
            .map(|tokens| tokens.access_token)
    }

    /// The cached refresh token, regardless of access token expiry.
    pub fn refresh_token(&self) -> Option<String> {
        self.load().and_then(|tokens| tokens.refresh_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(expires_in: i64, refresh: Option<&str>) -> OAuthTokens {
        OAuthTokens {
            access_token: "at".to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_at: Some(chrono::Utc::now().timestamp() + expires_in),
            token_type: "Bearer".to_string(),
            scopes: vec![],
        }
    }

    #[test]
    fn empty_cache_has_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new("qonto", dir.path().join("qonto_tokens.json"));
        assert!(cache.valid_access_token().is_none());
        assert!(cache.refresh_token().is_none());
    }

    #[test]
    fn fresh_token_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new("qonto", dir.path().join("qonto_tokens.json"));
        cache.save(&tokens(3600, Some("rt"))).unwrap();
        assert_eq!(cache.valid_access_token().as_deref(), Some("at"));
    }

    #[test]
    fn expired_token_keeps_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new("qonto", dir.path().join("qonto_tokens.json"));
        cache.save(&tokens(10, Some("rt"))).unwrap();
        assert!(cache.valid_access_token().is_none());
        assert_eq!(cache.refresh_token().as_deref(), Some("rt"));

        cache.clear().unwrap();
        assert!(cache.refresh_token().is_none());
    }
}
