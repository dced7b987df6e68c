//! Request/response correlation over the debugging WebSocket.
//!
//! The browser multiplexes command responses and unsolicited events on one
//! connection. Each [`CommandChannel::call`] tags its command with a fresh
//! id and reads frames until the response carrying that id shows up,
//! discarding everything else.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::BrowserError;

/// Default upper bound for a single protocol call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A connected debugging channel.
#[derive(Debug)]
pub struct CommandChannel {
    ws: WsStream,
    next_id: u64,
    call_timeout: Duration,
}

impl CommandChannel {
    /// Open the WebSocket at `url`, giving up after `connect_timeout`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, BrowserError> {
        let (ws, _response) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                BrowserError::ConnectTimeout(format!("WebSocket connect to {url} timed out"))
            })?
            .map_err(|e| BrowserError::ConnectTimeout(format!("WebSocket connect to {url}: {e}")))?;

        tracing::debug!(url, "Debugging channel connected");

        Ok(Self {
            ws,
            next_id: 0,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Send `method` with `params` and wait for its response.
    ///
    /// Returns the response's `result` member (`null` when absent). A
    /// response carrying an `error` member becomes [`BrowserError::Remote`].
    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value, BrowserError> {
        self.next_id += 1;
        let id = self.next_id;
        let command = json!({ "method": method, "id": id, "params": params });

        self.ws
            .send(Message::Text(command.to_string()))
            .await
            .map_err(|e| BrowserError::Protocol(format!("sending '{method}': {e}")))?;

        let deadline = tokio::time::Instant::now() + self.call_timeout;
        loop {
            let frame = match tokio::time::timeout_at(deadline, self.ws.next()).await {
                Err(_) => {
                    tracing::warn!(method, id, "Browser call timed out");
                    return Err(BrowserError::Timeout {
                        method: method.to_string(),
                    });
                }
                Ok(None) => {
                    return Err(BrowserError::Protocol(format!(
                        "channel closed while waiting for '{method}'"
                    )))
                }
                Ok(Some(Err(e))) => {
                    return Err(BrowserError::Protocol(format!(
                        "reading response to '{method}': {e}"
                    )))
                }
                Ok(Some(Ok(frame))) => frame,
            };

            let text = match frame {
                Message::Text(text) => text,
                Message::Binary(bytes) => String::from_utf8(bytes).map_err(|_| {
                    BrowserError::Protocol("binary frame is not UTF-8".to_string())
                })?,
                Message::Close(_) => {
                    return Err(BrowserError::Protocol(format!(
                        "browser closed the channel while waiting for '{method}'"
                    )))
                }
                // Ping/pong are answered by tungstenite itself.
                _ => continue,
            };

            let value: Value = serde_json::from_str(&text)
                .map_err(|e| BrowserError::Protocol(format!("malformed frame: {e}")))?;

            if value.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }

            if let Some(error) = value.get("error") {
                return Err(BrowserError::Remote {
                    method: method.to_string(),
                    message: error
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string()),
                });
            }

            return Ok(value.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    /// Close the WebSocket. Errors are ignored; the peer may already be gone.
    pub async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            tracing::debug!(error = %e, "Closing debugging channel failed");
        }
    }
}
