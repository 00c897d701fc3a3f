//! Download tracking.
//!
//! A correlation specialization keyed on download GUIDs instead of request
//! IDs: `Browser.downloadWillBegin` opens a record, `Browser.downloadProgress`
//! updates it, and only a `completed` progress state finalizes it.

use std::path::Path;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use crate::cdp::CdpEvent;
use crate::error::{Error, Result};
use crate::listen::DEFAULT_CHANNEL_CAPACITY;
use crate::scope::Scope;
use crate::url::UrlFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    InProgress,
    Completed,
    Canceled,
}

/// One tracked download. Files saved via [`set_download_dir`] land under the
/// configured directory named by `guid`, which avoids filename collisions.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadItem {
    pub guid: String,
    pub url: String,
    pub suggested_filename: String,
    pub total_bytes: f64,
    pub received_bytes: f64,
    pub state: DownloadState,
}

struct DownloadTracker {
    filter: UrlFilter,
    pending: DashMap<String, DownloadItem>,
}

impl DownloadTracker {
    fn new(filter: UrlFilter) -> Self {
        Self {
            filter,
            pending: DashMap::new(),
        }
    }

    /// Feed one raw notification; returns the record once its download
    /// completed. Canceled downloads are dropped from the table.
    fn observe(&self, ev: &CdpEvent) -> Option<DownloadItem> {
        let params = ev.params.as_ref()?;
        match ev.method.as_str() {
            "Browser.downloadWillBegin" => {
                let guid = params.get("guid")?.as_str()?;
                let url = params.get("url")?.as_str()?;
                if self.filter.matches(url) {
                    self.pending.insert(
                        guid.to_string(),
                        DownloadItem {
                            guid: guid.to_string(),
                            url: url.to_string(),
                            suggested_filename: params
                                .get("suggestedFilename")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            total_bytes: 0.0,
                            received_bytes: 0.0,
                            state: DownloadState::InProgress,
                        },
                    );
                }
                None
            }
            "Browser.downloadProgress" => {
                let guid = params.get("guid")?.as_str()?;
                let state = params
                    .get("state")
                    .and_then(Value::as_str)
                    .unwrap_or("inProgress");
                {
                    let mut entry = self.pending.get_mut(guid)?;
                    if let Some(total) = params.get("totalBytes").and_then(Value::as_f64) {
                        entry.total_bytes = total;
                    }
                    if let Some(received) = params.get("receivedBytes").and_then(Value::as_f64) {
                        entry.received_bytes = received;
                    }
                }
                match state {
                    "completed" => self.pending.remove(guid).map(|(_, mut item)| {
                        item.state = DownloadState::Completed;
                        item
                    }),
                    "canceled" => {
                        self.pending.remove(guid);
                        None
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Subscribe to completed downloads whose source URL matches `filter`.
///
/// The returned channel closes once the scope is cancelled.
pub fn listen_download(scope: &Scope, filter: UrlFilter) -> mpsc::Receiver<DownloadItem> {
    let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
    let tracker = DownloadTracker::new(filter);
    let cancel = scope.cancel_token().clone();
    let mut events = scope.client().events();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                ev = events.recv() => match ev {
                    Ok(ev) => {
                        if let Some(item) = tracker.observe(&ev) {
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                res = tx.send(item) => {
                                    if res.is_err() {
                                        break;
                                    }
                                }
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

    rx
}

/// Configure the connection to save downloads under `dir`, named by GUID.
pub async fn set_download_dir(scope: &Scope, dir: impl AsRef<Path>) -> Result<()> {
    scope
        .send_browser(
            "Browser.setDownloadBehavior",
            Some(json!({
                "behavior": "allowAndName",
                "downloadPath": dir.as_ref().to_string_lossy(),
                "eventsEnabled": true,
            })),
        )
        .await
        .map(|_| ())
}

/// Navigate to `url` and wait for a matching download to complete.
///
/// Chrome aborts the navigation itself when it turns into a download; that
/// `net::ERR_ABORTED` is expected and ignored. Any other navigation error
/// propagates. Returns [`Error::Cancelled`] if the scope terminates first.
pub async fn download(scope: &Scope, url: &str, filter: UrlFilter) -> Result<DownloadItem> {
    let cancel = scope.cancel_token().child_token();
    let call = scope.with_cancel(cancel.clone());
    let _guard = cancel.drop_guard();

    let mut rx = listen_download(&call, filter);
    match call.navigate(url).await {
        Ok(()) => {}
        Err(Error::Navigation(msg)) if msg.contains("net::ERR_ABORTED") => {}
        Err(e) => return Err(e),
    }

    tokio::select! {
        _ = call.cancelled() => Err(Error::Cancelled),
        item = rx.recv() => item.ok_or(Error::Cancelled),
    }
}
