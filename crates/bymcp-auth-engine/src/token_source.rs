//! The seam between API clients and the auth flows behind them.

use async_trait::async_trait;

use crate::error::Result;

/// Anything that can hand out a bearer token for API calls.
///
/// Provider sessions refresh or re-authorize behind this call; API clients
/// only ever ask for the current token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Return an access token that is valid right now.
    async fn access_token(&self) -> Result<String>;
}

/// A fixed token, for pre-issued credentials and tests.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}
