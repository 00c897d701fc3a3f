//! Network event correlation.
//!
//! CDP delivers request/response/finished notifications independently and out
//! of order; this module joins them on the protocol-assigned request ID and
//! republishes completed exchanges on a bounded channel. Records are published
//! in the order their terminal notification arrived, which is not necessarily
//! request-initiation order.

use std::collections::HashMap;

use base64::Engine;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use crate::cdp::CdpEvent;
use crate::error::{Error, Result};
use crate::scope::Scope;
use crate::url::UrlFilter;

/// Capacity of the completed-record channels handed to callers.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Response metadata from `Network.responseReceived`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseInfo {
    pub url: String,
    pub status: i64,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: HashMap<String, Value>,
    #[serde(default)]
    pub mime_type: String,
}

/// One completed network exchange.
#[derive(Debug, Clone)]
pub struct NetworkExchange {
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub response: Option<ResponseInfo>,
    /// Populated only when the listener was asked to fetch bodies.
    pub body: Option<Vec<u8>>,
}

impl NetworkExchange {
    /// Response headers flattened to strings.
    pub fn headers(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        if let Some(resp) = &self.response {
            for (k, v) in &resp.headers {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                out.insert(k.clone(), v);
            }
        }
        out
    }

    /// Body as (lossy) UTF-8.
    pub fn text(&self) -> Option<String> {
        self.body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self
            .body
            .as_deref()
            .ok_or_else(|| Error::InvalidResponse("no response body captured".into()))?;
        Ok(serde_json::from_slice(body)?)
    }
}

/// Correlation table plus the match criteria for one subscription.
struct Correlator {
    session_id: String,
    filter: UrlFilter,
    method: Option<String>,
    pending: DashMap<String, NetworkExchange>,
}

impl Correlator {
    fn new(session_id: String, filter: UrlFilter, method: Option<String>) -> Self {
        Self {
            session_id,
            filter,
            method,
            pending: DashMap::new(),
        }
    }

    /// Feed one raw notification; returns a record when it reached its
    /// terminal state. A given request ID is yielded at most once.
    fn observe(&self, ev: &CdpEvent) -> Option<NetworkExchange> {
        if ev.session_id.as_deref() != Some(self.session_id.as_str()) {
            return None;
        }
        let params = ev.params.as_ref()?;
        match ev.method.as_str() {
            "Network.requestWillBeSent" => {
                let id = params.get("requestId")?.as_str()?;
                let url = params.pointer("/request/url")?.as_str()?;
                let method = params.pointer("/request/method")?.as_str()?;
                let method_ok = self
                    .method
                    .as_deref()
                    .map_or(true, |m| m.is_empty() || m.eq_ignore_ascii_case(method));
                if self.filter.matches(url) && method_ok {
                    self.pending.insert(
                        id.to_string(),
                        NetworkExchange {
                            request_id: id.to_string(),
                            url: url.to_string(),
                            method: method.to_string(),
                            response: None,
                            body: None,
                        },
                    );
                }
                None
            }
            "Network.responseReceived" => {
                let id = params.get("requestId")?.as_str()?;
                let finalize_now = {
                    let mut entry = self.pending.get_mut(id)?;
                    if let Some(resp) = params.get("response") {
                        match serde_json::from_value::<ResponseInfo>(resp.clone()) {
                            Ok(info) => entry.response = Some(info),
                            Err(e) => tracing::warn!(request_id = id, error = %e,
                                "unparsable response metadata"),
                        }
                    }
                    // HEAD carries no body, so there is no loadingFinished to
                    // wait for.
                    entry.method.eq_ignore_ascii_case("HEAD")
                };
                if finalize_now {
                    self.pending.remove(id).map(|(_, e)| e)
                } else {
                    None
                }
            }
            "Network.loadingFinished" => {
                let id = params.get("requestId")?.as_str()?;
                self.pending.remove(id).map(|(_, e)| e)
            }
            _ => None,
        }
    }
}

/// Subscribe to completed network exchanges on `scope`.
///
/// `filter` selects request URLs, `method` restricts the HTTP method (`None`
/// or `""` matches any). With `fetch_body` set, each record's body is fetched
/// through `Network.getResponseBody` before publication; a fetch failure is
/// logged and the record is published without a body.
///
/// The returned channel closes once the scope is cancelled. Delivery near
/// shutdown is best-effort: a record whose finalization races the
/// cancellation may be dropped.
pub fn listen_network(
    scope: &Scope,
    filter: UrlFilter,
    method: Option<&str>,
    fetch_body: bool,
) -> mpsc::Receiver<NetworkExchange> {
    let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
    let (finalize_tx, mut finalize_rx) = mpsc::unbounded_channel();

    let correlator = Correlator::new(
        scope.session_id().to_string(),
        filter,
        method.map(str::to_string),
    );
    let cancel = scope.cancel_token().clone();

    // Dispatch task: consumes the raw notification stream and forwards
    // finalized records in terminal-notification order.
    {
        let cancel = cancel.clone();
        let mut events = scope.client().events();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    ev = events.recv() => match ev {
                        Ok(ev) => {
                            if let Some(record) = correlator.observe(&ev) {
                                if finalize_tx.send(record).is_err() {
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "event stream lagged, notifications dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    // Finalizer task: optional body fetch, then publish. Sends race the
    // cancellation token so a slow consumer cannot leak this task.
    {
        let scope = scope.clone();
        tokio::spawn(async move {
            loop {
                let mut record = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = finalize_rx.recv() => match r {
                        Some(r) => r,
                        None => break,
                    },
                };
                if fetch_body {
                    match fetch_response_body(&scope, &record.request_id).await {
                        Ok(bytes) => record.body = Some(bytes),
                        Err(e) => tracing::warn!(request_id = %record.request_id, error = %e,
                            "response body fetch failed"),
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    res = tx.send(record) => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
            // Dropping tx here closes the caller's channel exactly once.
        });
    }

    rx
}

async fn fetch_response_body(scope: &Scope, request_id: &str) -> Result<Vec<u8>> {
    let v = scope
        .send(
            "Network.getResponseBody",
            Some(json!({ "requestId": request_id })),
        )
        .await?;
    let body = v.get("body").and_then(Value::as_str).unwrap_or_default();
    if v.get("base64Encoded").and_then(Value::as_bool).unwrap_or(false) {
        base64::engine::general_purpose::STANDARD
            .decode(body)
            .map_err(|e| Error::InvalidResponse(format!("invalid base64 response body: {e}")))
    } else {
        Ok(body.as_bytes().to_vec())
    }
}
