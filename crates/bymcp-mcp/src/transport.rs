//! Newline-delimited JSON-RPC transport.
//!
//! Each line read is one request or a batch (JSON array); each response is
//! written as one line and flushed immediately.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::server::{INVALID_REQUEST, JsonRpcRequest, JsonRpcResponse, McpServer, PARSE_ERROR};

/// Serve requests from `reader` until EOF, writing responses to `writer`.
pub async fn serve<R, W>(server: &McpServer, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "unparseable MCP message");
                let response = JsonRpcResponse::error(
                    None,
                    PARSE_ERROR,
                    format!("failed to parse JSON-RPC request: {e}"),
                );
                write_line(&mut writer, &serde_json::to_string(&response)?).await?;
                continue;
            }
        };

        match message {
            Value::Array(batch) if batch.is_empty() => {
                let response = JsonRpcResponse::error(None, INVALID_REQUEST, "empty batch request");
                write_line(&mut writer, &serde_json::to_string(&response)?).await?;
            }
            Value::Array(batch) => {
                debug!(size = batch.len(), "MCP batch received");
                let mut responses = Vec::with_capacity(batch.len());
                for item in batch {
                    if let Some(response) = dispatch(server, item).await {
                        responses.push(response);
                    }
                }
                if !responses.is_empty() {
                    write_line(&mut writer, &serde_json::to_string(&responses)?).await?;
                }
            }
            single => {
                if let Some(response) = dispatch(server, single).await {
                    write_line(&mut writer, &serde_json::to_string(&response)?).await?;
                }
            }
        }
    }

    info!("MCP input closed");
    Ok(())
}

/// Serve on the process's stdin and stdout.
pub async fn serve_stdio(server: &McpServer) -> Result<()> {
    info!("MCP server listening on stdio");
    serve(server, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Handle one decoded message, answering malformed requests with -32600.
async fn dispatch(server: &McpServer, message: Value) -> Option<JsonRpcResponse> {
    let id = message.get("id").filter(|id| !id.is_null()).cloned();
    match serde_json::from_value::<JsonRpcRequest>(message) {
        Ok(request) => server.handle_request(request).await,
        Err(e) => {
            warn!(error = %e, "invalid JSON-RPC request");
            Some(JsonRpcResponse::error(
                id,
                INVALID_REQUEST,
                format!("invalid JSON-RPC request: {e}"),
            ))
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
