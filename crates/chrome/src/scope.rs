//! Cancellable execution scopes bound to one page target.
//!
//! A [`Scope`] is what every operation in this crate runs against: it carries
//! the shared CDP client, the attached target/session pair, and a cancellation
//! token. Cancelling the token terminates everything derived from the scope.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::cdp::{CdpClient, SessionId, TargetId};
use crate::error::{Error, Result};

/// One step of a startup action batch, executed by [`Scope::run`].
#[derive(Debug, Clone)]
pub enum Action {
    /// Navigate the scope's target.
    Navigate(String),
    /// Evaluate a JavaScript expression.
    Evaluate(String),
    /// Install a script that runs before every new document.
    AddScriptOnNewDocument(String),
    /// Raw session-scoped CDP command.
    Command {
        method: String,
        params: Option<Value>,
    },
}

/// Execution scope bound to one page target on one connection.
#[derive(Clone, Debug)]
pub struct Scope {
    client: Arc<CdpClient>,
    target_id: TargetId,
    session_id: SessionId,
    cancel: CancellationToken,
}

impl Scope {
    /// Create a new page target on `client`, attach to it, and enable the
    /// domains the rest of the crate relies on. The target is closed when
    /// `cancel` fires.
    pub(crate) async fn create(client: Arc<CdpClient>, cancel: CancellationToken) -> Result<Self> {
        let v = client
            .send(
                "Target.createTarget",
                Some(json!({ "url": "about:blank" })),
                None,
            )
            .await?;
        let target_id = v
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidResponse("Target.createTarget returned no targetId".into()))?
            .to_string();

        let v = client
            .send(
                "Target.attachToTarget",
                Some(json!({ "targetId": target_id, "flatten": true })),
                None,
            )
            .await?;
        let session_id = v
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::InvalidResponse("Target.attachToTarget returned no sessionId".into())
            })?
            .to_string();

        let scope = Self {
            client,
            target_id,
            session_id,
            cancel,
        };

        for domain in ["Page", "Network", "Runtime", "DOMStorage"] {
            if let Err(e) = scope.send(format!("{domain}.enable"), None).await {
                tracing::warn!(domain, error = %e, "domain enable failed");
            }
        }

        // Close the target once the scope terminates. The send fails harmlessly
        // when the whole connection is going down at the same time.
        let client = scope.client.clone();
        let cancel = scope.cancel.clone();
        let target = scope.target_id.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let _ = client
                .send(
                    "Target.closeTarget",
                    Some(json!({ "targetId": target })),
                    None,
                )
                .await;
        });

        Ok(scope)
    }

    /// Same target, different cancellation token. Used for call-local scopes
    /// that must not tear the page down when they finish.
    pub(crate) fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            client: self.client.clone(),
            target_id: self.target_id.clone(),
            session_id: self.session_id.clone(),
            cancel,
        }
    }

    pub(crate) fn client(&self) -> &Arc<CdpClient> {
        &self.client
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Terminate the scope.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until the scope is terminated.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Issue a session-scoped CDP command, racing the scope's cancellation.
    pub async fn send(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            res = self.client.send(method, params, Some(&self.session_id)) => res,
        }
    }

    /// Issue a browser-level command (no session attached).
    pub async fn send_browser(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<Value> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            res = self.client.send(method, params, None) => res,
        }
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        let v = self
            .send("Page.navigate", Some(json!({ "url": url })))
            .await?;
        match v.get("errorText").and_then(Value::as_str) {
            Some(err) if !err.is_empty() => Err(Error::Navigation(err.to_string())),
            _ => Ok(()),
        }
    }

    /// Evaluate an expression and return its value. A thrown exception is
    /// reported as [`Error::Evaluate`].
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let v = self
            .send(
                "Runtime.evaluate",
                Some(json!({ "expression": expression, "returnByValue": true })),
            )
            .await?;
        if let Some(details) = v.get("exceptionDetails") {
            let msg = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("unknown exception")
                .to_string();
            return Err(Error::Evaluate(msg));
        }
        Ok(v.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    /// Run an action batch in order, stopping at the first failure.
    pub async fn run(&self, actions: &[Action]) -> Result<()> {
        for action in actions {
            match action {
                Action::Navigate(url) => self.navigate(url).await?,
                Action::Evaluate(expr) => {
                    self.evaluate(expr).await?;
                }
                Action::AddScriptOnNewDocument(source) => {
                    self.send(
                        "Page.addScriptToEvaluateOnNewDocument",
                        Some(json!({ "source": source })),
                    )
                    .await?;
                }
                Action::Command { method, params } => {
                    self.send(method.clone(), params.clone()).await?;
                }
            }
        }
        Ok(())
    }
}

/// Cancel `token` once `timeout` elapses, unless it is cancelled first.
pub(crate) fn bound_with_timeout(token: &CancellationToken, timeout: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => token.cancel(),
            _ = token.cancelled() => {}
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::CdpClient;
    use crate::testutil::{default_result, spawn_fake_browser, Handler};

    async fn fake_scope(handler: Handler) -> Scope {
        let (ws, _events) = spawn_fake_browser(handler).await;
        let client = CdpClient::connect(&ws).await.unwrap();
        Scope::create(client, CancellationToken::new()).await.unwrap()
    }

    #[tokio::test]
    async fn evaluate_returns_value() {
        let scope = fake_scope(Arc::new(|method, _| match method {
            "Runtime.evaluate" => json!({ "result": { "type": "number", "value": 3 } }),
            m => default_result(m),
        }))
        .await;
        assert_eq!(scope.evaluate("1 + 2").await.unwrap(), json!(3));
    }

    #[tokio::test]
    async fn evaluate_surfaces_thrown_exception() {
        let scope = fake_scope(Arc::new(|method, _| match method {
            "Runtime.evaluate" => json!({
                "result": { "type": "object", "subtype": "error", "className": "Error" },
                "exceptionDetails": {
                    "exceptionId": 1,
                    "text": "Uncaught",
                    "lineNumber": 0,
                    "columnNumber": 6,
                    "exception": { "description": "Error: boom\n    at <anonymous>:1:7" },
                },
            }),
            m => default_result(m),
        }))
        .await;

        let err = scope
            .evaluate("throw new Error('boom')")
            .await
            .expect_err("throwing expression must error");
        assert!(
            matches!(err, Error::Evaluate(ref msg) if msg.contains("boom")),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn run_stops_at_failing_evaluate() {
        let scope = fake_scope(Arc::new(|method, params| match method {
            "Runtime.evaluate" => {
                let expr = params
                    .and_then(|p| p.get("expression"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if expr.contains("throw") {
                    json!({
                        "result": { "type": "undefined" },
                        "exceptionDetails": { "text": "Uncaught" },
                    })
                } else {
                    json!({ "result": { "type": "undefined" } })
                }
            }
            m => default_result(m),
        }))
        .await;

        assert!(scope
            .run(&[Action::Evaluate("1 + 1".into())])
            .await
            .is_ok());
        assert!(scope
            .run(&[
                Action::Evaluate("throw new Error('boom')".into()),
                Action::Navigate("https://example.com".into()),
            ])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn timeout_cancels_token() {
        let token = CancellationToken::new();
        bound_with_timeout(&token, Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("token not cancelled by deadline");
    }

    #[tokio::test]
    async fn early_cancel_stops_timer() {
        let token = CancellationToken::new();
        bound_with_timeout(&token, Duration::from_secs(60));
        token.cancel();
        // The timer task exits via the cancelled branch; nothing to observe
        // beyond the token state.
        assert!(token.is_cancelled());
    }
}
