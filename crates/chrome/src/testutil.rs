//! In-process fake browser endpoint for transport-level tests.
//!
//! Speaks just enough of the wire protocol to stand up a real client and
//! scope without a browser: every request is answered through a handler,
//! and tests can push notifications onto the stream.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub(crate) type Handler = Arc<dyn Fn(&str, Option<&Value>) -> Value + Send + Sync>;

/// Canned results for the commands issued during scope bring-up.
pub(crate) fn default_result(method: &str) -> Value {
    match method {
        "Target.createTarget" => json!({ "targetId": "t-fake" }),
        "Target.attachToTarget" => json!({ "sessionId": "s-fake" }),
        "Page.navigate" => json!({ "frameId": "f-fake" }),
        _ => json!({}),
    }
}

pub(crate) fn default_handler() -> Handler {
    Arc::new(|method, _| default_result(method))
}

/// Serve one websocket connection. Every request gets `handler`'s result
/// echoed back under its ID; values pushed on the returned sender go out
/// as notifications.
pub(crate) async fn spawn_fake_browser(handler: Handler) -> (String, mpsc::UnboundedSender<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut events_open = true;
        loop {
            tokio::select! {
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let req: Value = serde_json::from_str(&text).unwrap();
                        let method = req["method"].as_str().unwrap_or_default();
                        let reply = json!({
                            "id": req["id"],
                            "result": handler(method, req.get("params")),
                        });
                        if ws.send(Message::Text(reply.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                },
                ev = event_rx.recv(), if events_open => match ev {
                    Some(ev) => {
                        if ws.send(Message::Text(ev.to_string())).await.is_err() {
                            break;
                        }
                    }
                    None => events_open = false,
                },
            }
        }
    });

    (format!("ws://{addr}/devtools/browser/fake"), event_tx)
}
