//! CDP client - the core communication layer.
//!
//! Design decisions:
//! 1. Single WebSocket per browser connection (no per-session WS overhead)
//! 2. Request/response matching via ID, events broadcast to subscribers
//! 3. Fail fast - no retries, no queuing. Let the caller decide.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::protocol::{CdpEvent, CdpMessage, CdpRequest, CdpResponse, RequestId};
use crate::error::{Error, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Buffered events kept for slow subscribers before the stream lags.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// CDP client - manages a single WebSocket connection to the browser.
#[derive(Debug)]
pub struct CdpClient {
    /// Monotonic request ID counter
    next_id: AtomicU64,

    /// Pending requests waiting for responses
    pending: DashMap<RequestId, oneshot::Sender<CdpResponse>>,

    /// Event fan-out; every subscription gets the full notification stream
    events: broadcast::Sender<CdpEvent>,

    /// WebSocket write half
    sink: Mutex<WsSink>,

    /// Set once by the reader task when the transport dies
    closed: CancellationToken,
}

impl CdpClient {
    /// Connect to a Chrome DevTools Protocol endpoint.
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>> {
        let (ws_stream, _) = connect_async(ws_url).await?;
        let (sink, mut stream) = ws_stream.split();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let client = Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            events,
            sink: Mutex::new(sink),
            closed: CancellationToken::new(),
        });

        let reader = client.clone();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => reader.handle_message(&text),
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        tracing::debug!(error = %e, "websocket read failed");
                        break;
                    }
                    _ => {}
                }
            }
            // Fail everything still in flight; senders dropped here surface
            // as Error::Closed on the waiting side.
            reader.closed.cancel();
            reader.pending.clear();
        });

        Ok(client)
    }

    fn handle_message(&self, text: &str) {
        match serde_json::from_str::<CdpMessage>(text) {
            Ok(CdpMessage::Response(response)) => {
                if let Some((_, tx)) = self.pending.remove(&response.id) {
                    let _ = tx.send(response);
                } else {
                    tracing::warn!(id = response.id, "response for unknown request");
                }
            }
            Ok(CdpMessage::Event(event)) => {
                // No subscribers is fine; events before anyone listens are dropped.
                let _ = self.events.send(event);
            }
            Err(e) => tracing::warn!(error = %e, "unparsable CDP message"),
        }
    }

    /// Send a CDP request and wait for its response.
    pub async fn send(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<&str>,
    ) -> Result<Value> {
        if self.closed.is_cancelled() {
            return Err(Error::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CdpRequest {
            id,
            method: method.into(),
            params,
            session_id: session_id.map(str::to_string),
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let json = serde_json::to_string(&request)?;
        {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Text(json)).await?;
        }

        let response = rx.await.map_err(|_| Error::Closed)?;
        if let Some(error) = response.error {
            return Err(Error::Protocol {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Subscribe to the raw notification stream.
    pub fn events(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    /// Token cancelled when the transport has died.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Needs running Chrome
    async fn connect_and_get_version() {
        let client = CdpClient::connect("ws://localhost:9222/devtools/browser")
            .await
            .unwrap();
        let result = client.send("Browser.getVersion", None, None).await.unwrap();
        assert!(result.get("product").is_some());
    }
}
