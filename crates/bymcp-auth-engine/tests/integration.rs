//! Integration tests for the provider sessions against local mock
//! authorization servers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Form, Json, Router};
use bymcp_auth_engine::{
    AuthEngineError, MicrosoftAuthConfig, MicrosoftSession, OAuthTokens, QontoAuthConfig,
    QontoSession, TokenCache, TokenSource,
};
use serde_json::{Value, json};

// ═══════════════════════════════════════════════════════════════════════
//  Mock server
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone, Default)]
struct Mock {
    requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
    polls: Arc<AtomicUsize>,
    device_outcome: Arc<Mutex<&'static str>>,
}

impl Mock {
    fn recorded(&self) -> Vec<HashMap<String, String>> {
        self.requests.lock().unwrap().clone()
    }
}

async fn token_endpoint(
    State(mock): State<Mock>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    mock.requests.lock().unwrap().push(form.clone());

    match form.get("grant_type").map(String::as_str) {
        Some("refresh_token") => (
            StatusCode::OK,
            Json(json!({ "access_token": "refreshed", "expires_in": 3600 })),
        ),
        Some("authorization_code") => (
            StatusCode::OK,
            Json(json!({
                "access_token": format!("issued-for-{}", form["code"]),
                "refresh_token": "rt-new",
                "expires_in": 3600
            })),
        ),
        Some("urn:ietf:params:oauth:grant-type:device_code") => {
            let poll = mock.polls.fetch_add(1, Ordering::SeqCst);
            let outcome = *mock.device_outcome.lock().unwrap();
            if poll == 0 {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "authorization_pending" })),
                )
            } else if outcome == "success" {
                (
                    StatusCode::OK,
                    Json(json!({
                        "access_token": "graph-token",
                        "refresh_token": "graph-refresh",
                        "expires_in": 3600
                    })),
                )
            } else {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": outcome })))
            }
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "unsupported_grant_type" })),
        ),
    }
}

async fn device_code_endpoint(
    State(mock): State<Mock>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    mock.requests.lock().unwrap().push(form);
    Json(json!({
        "device_code": "dev-123",
        "user_code": "ABCD-EFGH",
        "verification_uri": "https://microsoft.com/devicelogin",
        "expires_in": 60,
        "interval": 0
    }))
}

async fn spawn_mock(mock: Mock) -> String {
    let app = Router::new()
        .route("/oauth2/token", post(token_endpoint))
        .route("/common/oauth2/v2.0/token", post(token_endpoint))
        .route("/common/oauth2/v2.0/devicecode", post(device_code_endpoint))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn expired_tokens(refresh: &str) -> OAuthTokens {
    OAuthTokens {
        access_token: "stale".to_string(),
        refresh_token: Some(refresh.to_string()),
        expires_at: Some(chrono::Utc::now().timestamp() - 10),
        token_type: "Bearer".to_string(),
        scopes: vec![],
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

// ═══════════════════════════════════════════════════════════════════════
//  Qonto
// ═══════════════════════════════════════════════════════════════════════

fn qonto_config(base: &str) -> QontoAuthConfig {
    let mut config = QontoAuthConfig::new("qonto-client", "qonto-secret");
    config.oauth_base_url = base.to_string();
    config.callback_port = free_port();
    config.callback_timeout_secs = 10;
    config.open_browser = false;
    config
}

#[tokio::test]
async fn qonto_refreshes_expired_token() {
    let mock = Mock::default();
    let base = spawn_mock(mock.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("qonto_tokens.json");

    TokenCache::new("qonto", &path)
        .save(&expired_tokens("rt-old"))
        .unwrap();

    let session = QontoSession::new(qonto_config(&base), &path);
    assert_eq!(session.access_token().await.unwrap(), "refreshed");

    let requests = mock.recorded();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["refresh_token"], "rt-old");
    assert_eq!(requests[0]["client_secret"], "qonto-secret");
    assert!(!requests[0].contains_key("scope"));

    // The refresh token survives a refresh response that omits it.
    let cached = TokenCache::new("qonto", &path).load().unwrap();
    assert_eq!(cached.refresh_token.as_deref(), Some("rt-old"));
    assert!(!session.needs_authorization().await);
}

async fn drive_callback(url_rx: tokio::sync::oneshot::Receiver<String>, port: u16, tamper: bool) {
    let url = url_rx.await.unwrap();
    let parsed = url::Url::parse(&url).unwrap();
    let mut state = parsed
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    if tamper {
        state.push('x');
    }
    let callback = format!("http://127.0.0.1:{port}/callback?code=the-code&state={state}");
    let response = reqwest::get(callback).await.unwrap();
    assert!(response.status().is_success());
}

#[tokio::test]
async fn qonto_interactive_authorization() {
    let mock = Mock::default();
    let base = spawn_mock(mock.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("qonto_tokens.json");
    let config = qonto_config(&base);
    let port = config.callback_port;
    let session = QontoSession::new(config, &path);

    let (url_tx, url_rx) = tokio::sync::oneshot::channel();
    let browser = tokio::spawn(drive_callback(url_rx, port, false));

    let tokens = session
        .authorize_interactive(move |url| {
            let _ = url_tx.send(url.to_string());
        })
        .await
        .unwrap();
    browser.await.unwrap();

    assert_eq!(tokens.access_token, "issued-for-the-code");
    let requests = mock.recorded();
    assert_eq!(requests[0]["grant_type"], "authorization_code");
    assert_eq!(
        requests[0]["redirect_uri"],
        format!("http://localhost:{port}/callback")
    );
    assert!(path.exists());
    assert_eq!(session.access_token().await.unwrap(), "issued-for-the-code");
}

#[tokio::test]
async fn qonto_rejects_state_mismatch() {
    let mock = Mock::default();
    let base = spawn_mock(mock.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let config = qonto_config(&base);
    let port = config.callback_port;
    let session = QontoSession::new(config, dir.path().join("qonto_tokens.json"));

    let (url_tx, url_rx) = tokio::sync::oneshot::channel();
    let browser = tokio::spawn(drive_callback(url_rx, port, true));

    let err = session
        .authorize_interactive(move |url| {
            let _ = url_tx.send(url.to_string());
        })
        .await
        .unwrap_err();
    browser.await.unwrap();

    assert!(err.to_string().contains("state mismatch"));
    assert!(mock.recorded().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
//  Microsoft
// ═══════════════════════════════════════════════════════════════════════

fn microsoft_session(base: &str, dir: &std::path::Path) -> MicrosoftSession {
    let mut config = MicrosoftAuthConfig::new("ms-client");
    config.login_base_url = base.to_string();
    MicrosoftSession::new(
        config,
        dir.join("ms_tokens.json"),
        dir.join("ms_device_flow.json"),
    )
}

#[tokio::test]
async fn microsoft_device_flow_round_trip() {
    let mock = Mock::default();
    *mock.device_outcome.lock().unwrap() = "success";
    let base = spawn_mock(mock.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let session = microsoft_session(&base, dir.path());

    let started = session.start_device_flow().await.unwrap();
    assert_eq!(started.user_code, "ABCD-EFGH");
    let pending = session.pending_flow().unwrap();
    assert_eq!(pending.device_code, "dev-123");

    let tokens = session.complete_device_flow().await.unwrap();
    assert_eq!(tokens.access_token, "graph-token");
    assert!(session.pending_flow().is_none());
    assert_eq!(session.access_token().await.unwrap(), "graph-token");
    assert_eq!(mock.polls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn microsoft_declined_flow_clears_pending_state() {
    let mock = Mock::default();
    *mock.device_outcome.lock().unwrap() = "authorization_declined";
    let base = spawn_mock(mock.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let session = microsoft_session(&base, dir.path());

    session.start_device_flow().await.unwrap();
    let err = session.complete_device_flow().await.unwrap_err();

    assert!(matches!(err, AuthEngineError::FlowFailed { .. }));
    assert!(session.pending_flow().is_none());
    assert!(session.needs_authorization().await);
}

#[tokio::test]
async fn microsoft_refresh_repeats_scope() {
    let mock = Mock::default();
    let base = spawn_mock(mock.clone()).await;
    let dir = tempfile::tempdir().unwrap();

    TokenCache::new("microsoft", dir.path().join("ms_tokens.json"))
        .save(&expired_tokens("graph-refresh"))
        .unwrap();
    let session = microsoft_session(&base, dir.path());

    assert_eq!(session.access_token().await.unwrap(), "refreshed");
    let requests = mock.recorded();
    assert!(requests[0]["scope"].contains("Mail.Read"));
    assert!(!requests[0].contains_key("client_secret"));
}
