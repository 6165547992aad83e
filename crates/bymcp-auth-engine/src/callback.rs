//! Local HTTP callback server for the OAuth redirect.
//!
//! After the user approves access in the browser, the authorization server
//! redirects to `http://localhost:{port}{path}?code=xxx&state=yyy`. This
//! module listens for that request on a raw [`tokio::net::TcpListener`],
//! answers with a small HTML page, and hands back the code and state.
//!
//! Requests for other paths (favicons, speculative pre-connects that never
//! send anything) are answered with 404 and the server keeps waiting.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{AuthEngineError, Result};

const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Authorization successful</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 4rem;">
    <h1 style="color: #16a34a;">Authorization successful</h1>
    <p>You can close this tab and return to your assistant.</p>
</body>
</html>"#;

const FAILURE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Authorization failed</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 4rem;">
    <h1 style="color: #dc2626;">Authorization failed</h1>
    <p>The provider did not return an authorization code. Please try again.</p>
</body>
</html>"#;

/// A minimal HTTP listener that waits for a single OAuth redirect.
pub struct CallbackServer {
    listener: TcpListener,
    path: String,
}

/// Outcome of reading one request off the socket.
enum Incoming {
    /// The redirect arrived, with its parsed result.
    Redirect(Result<(String, String)>),
    /// Something else; keep waiting.
    Ignored,
}

impl CallbackServer {
    /// Bind to `127.0.0.1:{port}`, expecting the redirect on `path`.
    ///
    /// Port `0` picks an ephemeral port, see [`CallbackServer::port`].
    pub async fn bind(port: u16, path: &str) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        tracing::info!(
            addr = %listener.local_addr()?,
            path,
            "callback server listening for OAuth redirect"
        );
        Ok(Self {
            listener,
            path: path.to_string(),
        })
    }

    /// The port actually bound.
    pub fn port(&self) -> Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Bind, wait for the redirect, and return `(code, state)`.
    pub async fn start(port: u16, path: &str, timeout_secs: u64) -> Result<(String, String)> {
        Self::bind(port, path).await?.wait(timeout_secs).await
    }

    /// Wait up to `timeout_secs` for the redirect.
    ///
    /// # Errors
    ///
    /// - [`AuthEngineError::CallbackTimeout`] if no redirect arrives in time.
    /// - [`AuthEngineError::FlowFailed`] if the provider redirected with an
    ///   error or without a code.
    pub async fn wait(self, timeout_secs: u64) -> Result<(String, String)> {
        let timeout = tokio::time::Duration::from_secs(timeout_secs);
        match tokio::time::timeout(timeout, self.accept_redirect()).await {
            Ok(inner) => inner,
            Err(_) => Err(AuthEngineError::CallbackTimeout { timeout_secs }),
        }
    }

    async fn accept_redirect(&self) -> Result<(String, String)> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            tracing::debug!(peer = %peer, "accepted callback connection");

            match self.handle(stream).await {
                Ok(Incoming::Redirect(result)) => return result,
                Ok(Incoming::Ignored) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "callback connection dropped");
                    continue;
                }
            }
        }
    }

    async fn handle(&self, mut stream: TcpStream) -> Result<Incoming> {
        // OAuth redirects are small GET requests.
        let mut buf = [0u8; 8192];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(Incoming::Ignored);
        }
        let request = String::from_utf8_lossy(&buf[..n]);

        let Some(target) = request_target(&request) else {
            respond(&mut stream, "400 Bad Request", "").await?;
            return Ok(Incoming::Ignored);
        };
        let (path, _) = target.split_once('?').unwrap_or((target, ""));
        if path != self.path {
            respond(&mut stream, "404 Not Found", "").await?;
            return Ok(Incoming::Ignored);
        }

        let result = Self::parse_callback_request(&request);
        let (status, body) = match result {
            Ok(_) => ("200 OK", SUCCESS_HTML),
            Err(_) => ("400 Bad Request", FAILURE_HTML),
        };
        respond(&mut stream, status, body).await?;

        if result.is_ok() {
            tracing::info!("callback received, authorization code extracted");
        }
        Ok(Incoming::Redirect(result))
    }

    /// Parse `code` and `state` from the first line of an HTTP GET request.
    ///
    /// Expected format: `GET /callback?code=xxx&state=yyy HTTP/1.1`
    pub(crate) fn parse_callback_request(request: &str) -> Result<(String, String)> {
        let target = request_target(request).ok_or_else(|| AuthEngineError::FlowFailed {
            reason: "malformed HTTP request".to_string(),
        })?;

        let query = target
            .split_once('?')
            .map(|(_, q)| q)
            .ok_or_else(|| AuthEngineError::FlowFailed {
                reason: "callback request has no query string".to_string(),
            })?;

        let mut code: Option<String> = None;
        let mut state: Option<String> = None;

        for param in query.split('&') {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let decoded = percent_decode(value);
            match key {
                "code" => code = Some(decoded),
                "state" => state = Some(decoded),
                "error" => {
                    return Err(AuthEngineError::FlowFailed {
                        reason: format!("authorization server returned error: {decoded}"),
                    });
                }
                _ => {}
            }
        }

        let code = code.ok_or_else(|| AuthEngineError::FlowFailed {
            reason: "callback missing 'code' parameter".to_string(),
        })?;
        let state = state.ok_or_else(|| AuthEngineError::FlowFailed {
            reason: "callback missing 'state' parameter".to_string(),
        })?;

        Ok((code, state))
    }
}

/// The request target of an HTTP request line, e.g. `/callback?code=x`.
fn request_target(request: &str) -> Option<&str> {
    let line = request.lines().next()?;
    let mut parts = line.split_whitespace();
    let _method = parts.next()?;
    parts.next()
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Percent-decoding for query values, `+` decodes to a space.
///
/// Decodes to bytes first so multi-byte UTF-8 sequences survive.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_callback_request_standard() {
        let request =
            "GET /callback?code=abc123&state=xyz789 HTTP/1.1\r\nHost: localhost:7777\r\n\r\n";
        let (code, state) = CallbackServer::parse_callback_request(request).unwrap();
        assert_eq!(code, "abc123");
        assert_eq!(state, "xyz789");
    }

    #[test]
    fn parse_callback_request_with_extra_params() {
        let request = "GET /callback?code=c123&state=s456&scope=x HTTP/1.1\r\n\r\n";
        let (code, state) = CallbackServer::parse_callback_request(request).unwrap();
        assert_eq!(code, "c123");
        assert_eq!(state, "s456");
    }

    #[test]
    fn parse_callback_request_percent_encoded() {
        let request = "GET /callback?code=abc%20def&state=123%2B456 HTTP/1.1\r\n\r\n";
        let (code, state) = CallbackServer::parse_callback_request(request).unwrap();
        assert_eq!(code, "abc def");
        assert_eq!(state, "123+456");
    }

    #[test]
    fn parse_callback_request_missing_code() {
        let request = "GET /callback?state=xyz HTTP/1.1\r\n\r\n";
        let err = CallbackServer::parse_callback_request(request)
            .unwrap_err()
            .to_string();
        assert!(err.contains("missing 'code' parameter"));
    }

    #[test]
    fn parse_callback_request_no_query() {
        let request = "GET /callback HTTP/1.1\r\n\r\n";
        let err = CallbackServer::parse_callback_request(request)
            .unwrap_err()
            .to_string();
        assert!(err.contains("no query string"));
    }

    #[test]
    fn parse_callback_request_error_param() {
        let request = "GET /callback?error=access_denied&state=xyz HTTP/1.1\r\n\r\n";
        let err = CallbackServer::parse_callback_request(request)
            .unwrap_err()
            .to_string();
        assert!(err.contains("access_denied"));
    }

    #[test]
    fn parse_callback_request_malformed() {
        assert!(CallbackServer::parse_callback_request("").is_err());
        assert!(CallbackServer::parse_callback_request("NOTHTTP").is_err());
    }

    #[test]
    fn percent_decode_cases() {
        assert_eq!(percent_decode("hello"), "hello");
        assert_eq!(percent_decode("hello%20world"), "hello world");
        assert_eq!(percent_decode("a%2Fb"), "a/b");
        assert_eq!(percent_decode("a+b"), "a b");
        assert_eq!(percent_decode("M%C3%BCller"), "Müller");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
        assert_eq!(percent_decode(""), "");
    }

    async fn send(port: u16, request: String) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn callback_server_receives_redirect() {
        let server = CallbackServer::bind(0, "/callback").await.unwrap();
        let port = server.port().unwrap();

        let client = tokio::spawn(async move {
            let favicon = send(port, "GET /favicon.ico HTTP/1.1\r\n\r\n".to_string()).await;
            assert!(favicon.contains("404"));

            // A pre-connect that never sends a request.
            drop(TcpStream::connect(("127.0.0.1", port)).await.unwrap());

            let response = send(
                port,
                "GET /callback?code=test_code_42&state=test_state_99 HTTP/1.1\r\n\r\n".to_string(),
            )
            .await;
            assert!(response.contains("200 OK"));
            assert!(response.contains("Authorization successful"));
        });

        let (code, state) = server.wait(5).await.unwrap();
        client.await.unwrap();

        assert_eq!(code, "test_code_42");
        assert_eq!(state, "test_state_99");
    }

    #[tokio::test]
    async fn callback_server_reports_provider_error() {
        let server = CallbackServer::bind(0, "/callback").await.unwrap();
        let port = server.port().unwrap();

        let client = tokio::spawn(async move {
            let response = send(
                port,
                "GET /callback?error=access_denied HTTP/1.1\r\n\r\n".to_string(),
            )
            .await;
            assert!(response.contains("Authorization failed"));
        });

        let err = server.wait(5).await.unwrap_err();
        client.await.unwrap();
        assert!(matches!(err, AuthEngineError::FlowFailed { .. }));
    }

    #[tokio::test]
    async fn callback_server_timeout() {
        let result = CallbackServer::start(0, "/callback", 1).await;
        assert!(matches!(
            result,
            Err(AuthEngineError::CallbackTimeout { timeout_secs: 1 })
        ));
    }
}
