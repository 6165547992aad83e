//! Microsoft Graph client (Outlook mail and SharePoint lists).

pub mod mail;
pub mod sharepoint;

use std::sync::Arc;
use std::time::Duration;

use bymcp_auth_engine::TokenSource;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value;

use crate::error::{AdapterError, Result};

pub use mail::{Attachment, MailMessage};
pub use sharepoint::{
    Column, ListColumns, SharePointClient, find_lookup_column, map_invoice_fields,
    map_position_fields,
};

const SERVICE: &str = "Microsoft Graph";
const USER_AGENT: &str = concat!("bymcp/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated access to the Graph REST API.
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl GraphClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AdapterError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    /// Resolve `path` against the base URL; absolute URLs (such as
    /// `@odata.nextLink`) are used as they are.
    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let request = self.http.get(self.url(path)).query(query);
        let resp = self.send(request).await?;
        json_body(resp).await
    }

    pub async fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let resp = self.send(self.http.get(self.url(path))).await?;
        let bytes = resp.bytes().await.map_err(request_error)?;
        Ok(bytes.to_vec())
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let resp = self.send(self.http.post(self.url(path)).json(body)).await?;
        json_body(resp).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let token = self.tokens.access_token().await?;
        let resp = request
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(request_error)?;
        check_status(resp).await
    }
}

async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(AdapterError::AuthRequired {
            adapter_id: "microsoft-graph".into(),
            provider: "microsoft".into(),
        });
    }
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(AdapterError::Http {
            status: status.as_u16(),
            message: text.chars().take(300).collect(),
        });
    }
    Ok(resp)
}

async fn json_body(resp: Response) -> Result<Value> {
    let text = resp.text().await.map_err(request_error)?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

fn request_error(err: reqwest::Error) -> AdapterError {
    AdapterError::Request {
        service: SERVICE.into(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use bymcp_auth_engine::StaticToken;

    use super::*;

    #[test]
    fn next_links_are_used_verbatim() {
        let graph =
            GraphClient::new("https://graph.example/v1.0/", Arc::new(StaticToken::new("t"))).unwrap();
        assert_eq!(graph.url("/me/messages"), "https://graph.example/v1.0/me/messages");
        assert_eq!(
            graph.url("https://graph.example/v1.0/me/messages?$skip=10"),
            "https://graph.example/v1.0/me/messages?$skip=10"
        );
    }
}
