//! Browser session lifecycle.
//!
//! A [`Chrome`] owns at most one live connection to its configured target.
//! The connection materializes lazily on first use, is reused across calls,
//! and is rebuilt transparently once it has died. Closing is idempotent and
//! the session can be reused afterwards.

use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cdp::CdpClient;
use crate::error::Result;
use crate::launch::{self, default_flags, Flag};
use crate::scope::{bound_with_timeout, Action, Scope};

/// One live connection: transport, root scope, and its teardown tokens.
struct Connection {
    client: Arc<CdpClient>,
    scope: Scope,
    /// Teardown signal; cancelling it fans out to every derived scope.
    cancel: CancellationToken,
    /// Fired exactly once by the teardown watcher when teardown has finished.
    done: CancellationToken,
}

impl Connection {
    fn healthy(&self) -> bool {
        !self.cancel.is_cancelled() && !self.client.is_closed()
    }

    async fn teardown(self) {
        self.cancel.cancel();
        self.done.cancelled().await;
    }
}

/// A configured browser target and its session lifecycle manager.
pub struct Chrome {
    /// Remote debugging address; `None` launches a local browser.
    url: Option<String>,
    user_agent: Option<String>,
    window_size: Option<(u32, u32)>,
    proxy: Option<String>,
    enable_extensions: bool,
    flags: Vec<Flag>,
    /// Startup batch, run on every fresh scope.
    actions: Vec<Action>,

    conn: Mutex<Option<Connection>>,
}

impl Chrome {
    /// Locally launched browser with the default flag set.
    pub fn new() -> Self {
        Self {
            url: None,
            user_agent: None,
            window_size: None,
            proxy: None,
            enable_extensions: false,
            flags: Vec::new(),
            actions: Vec::new(),
            conn: Mutex::new(None),
        }
    }

    /// Locally launched headless browser.
    pub fn headless() -> Self {
        Self::new().add_flags([
            Flag::value("headless", "new"),
            Flag::set("hide-scrollbars"),
            Flag::set("mute-audio"),
        ])
    }

    /// Locally launched browser with a visible window.
    pub fn headful() -> Self {
        Self::new()
    }

    /// Attach to an already running browser.
    ///
    /// # Panics
    /// Panics on an empty address; that is a construction-time misuse, not a
    /// runtime condition.
    pub fn remote(url: &str) -> Self {
        assert!(!url.is_empty(), "empty remote debugging url");
        Self {
            url: Some(url.to_string()),
            ..Self::new()
        }
    }

    /// Attach to a browser listening on `localhost:port`.
    ///
    /// # Panics
    /// Panics on port 0.
    pub fn local(port: u16) -> Self {
        assert!(port != 0, "invalid port number: {port}");
        Self::remote(&format!("ws://localhost:{port}"))
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn window_size(mut self, width: u32, height: u32) -> Self {
        self.window_size = Some((width, height));
        self
    }

    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn enable_extensions(mut self, enable: bool) -> Self {
        self.enable_extensions = enable;
        self
    }

    pub fn add_flags(mut self, flags: impl IntoIterator<Item = Flag>) -> Self {
        self.flags.extend(flags);
        self
    }

    /// Actions run against every fresh scope (stealth scripts and the like).
    pub fn add_actions(mut self, actions: impl IntoIterator<Item = Action>) -> Self {
        self.actions.extend(actions);
        self
    }

    pub fn incognito(self) -> Self {
        self.add_flags([Flag::set("incognito")])
    }

    pub fn guest(self) -> Self {
        self.add_flags([Flag::set("guest")])
    }

    pub fn no_sandbox(self) -> Self {
        self.add_flags([Flag::set("no-sandbox")])
    }

    pub fn auto_open_devtools(self) -> Self {
        self.add_flags([Flag::set("auto-open-devtools-for-tabs")])
    }

    pub fn disable_automation_controlled(self) -> Self {
        self.add_flags([Flag::value("disable-blink-features", "AutomationControlled")])
    }

    pub fn disable_user_agent_client_hint(self) -> Self {
        self.add_flags([Flag::value("disable-features", "UserAgentClientHint")])
    }

    fn launch_flags(&self) -> Vec<Flag> {
        let mut flags = default_flags();
        if let Some(ua) = &self.user_agent {
            flags.push(Flag::value("user-agent", ua.clone()));
        }
        if let Some((w, h)) = self.window_size {
            flags.push(Flag::value("window-size", format!("{w},{h}")));
        }
        if let Some(proxy) = &self.proxy {
            flags.push(Flag::value("proxy-server", proxy.clone()));
        }
        if !self.enable_extensions {
            flags.push(Flag::set("disable-extensions"));
        }
        flags.extend(self.flags.iter().cloned());
        flags
    }

    /// Bring up a connection scoped to `bootstrap`: launch or attach, then
    /// create and attach a page target. The startup batch is NOT run here.
    async fn connect(&self, bootstrap: &CancellationToken) -> Result<Connection> {
        let (ws_url, child) = match &self.url {
            Some(addr) => (launch::resolve_ws_url(addr).await?, None),
            None => {
                let launched = launch::launch(&self.launch_flags()).await?;
                (launched.ws_url, Some(launched.child))
            }
        };

        let client = CdpClient::connect(&ws_url).await?;
        let cancel = bootstrap.child_token();
        let scope = Scope::create(client.clone(), cancel.clone()).await?;
        let done = CancellationToken::new();

        spawn_teardown_watcher(client.clone(), child, cancel.clone(), done.clone());

        Ok(Connection {
            client,
            scope,
            cancel,
            done,
        })
    }

    /// Return the session's root scope, bringing up a connection if none is
    /// live. The boolean reports whether the connection was freshly created
    /// (in which case the startup batch has already run against it).
    pub async fn ensure_connected(&self) -> Result<(Scope, bool)> {
        self.ensure_connected_within(&CancellationToken::new()).await
    }

    async fn ensure_connected_within(
        &self,
        bootstrap: &CancellationToken,
    ) -> Result<(Scope, bool)> {
        let mut slot = self.conn.lock().await;

        if let Some(conn) = slot.as_ref() {
            if conn.healthy() {
                return Ok((conn.scope.clone(), false));
            }
        }
        // Stale connection observed lazily; finish tearing it down so a
        // fresh one can replace it.
        if let Some(conn) = slot.take() {
            tracing::debug!("connection is dead, rebuilding");
            conn.teardown().await;
        }

        let conn = self.connect(bootstrap).await?;
        let scope = conn.scope.clone();
        if let Err(e) = scope.run(&self.actions).await {
            tracing::warn!(error = %e, "startup actions failed, tearing down fresh connection");
            conn.teardown().await;
            return Err(e);
        }
        *slot = Some(conn);
        Ok((scope, true))
    }

    /// A scope for one logical unit of work.
    ///
    /// If no healthy connection exists it is brought up first and the returned
    /// scope is the bootstrap scope itself; the startup batch already ran as
    /// part of bring-up. On a reused connection a child scope with its own
    /// page target is derived and the startup batch runs again there, so a
    /// failure tears down only the child.
    pub async fn new_scope(&self, timeout: Option<Duration>) -> Result<Scope> {
        let bootstrap = CancellationToken::new();
        if let Some(t) = timeout {
            bound_with_timeout(&bootstrap, t);
        }

        let (scope, fresh) = match self.ensure_connected_within(&bootstrap).await {
            Ok(v) => v,
            Err(e) => {
                bootstrap.cancel();
                return Err(e);
            }
        };
        if fresh {
            return Ok(scope);
        }

        // Reuse path: the bootstrap token (and its timer) is unused.
        bootstrap.cancel();

        let child_cancel = scope.cancel_token().child_token();
        if let Some(t) = timeout {
            bound_with_timeout(&child_cancel, t);
        }
        let child = Scope::create(scope.client().clone(), child_cancel.clone()).await?;
        if let Err(e) = child.run(&self.actions).await {
            child_cancel.cancel();
            return Err(e);
        }
        Ok(child)
    }

    /// `new_scope` bounded by a deadline.
    pub async fn with_timeout(&self, timeout: Duration) -> Result<Scope> {
        self.new_scope(Some(timeout)).await
    }

    /// Run an action batch against the session's root scope, materializing
    /// the connection first if needed.
    pub async fn run(&self, actions: &[Action]) -> Result<()> {
        let (scope, _) = self.ensure_connected().await?;
        scope.run(actions).await
    }

    /// Tear down the live connection, if any, and wait for teardown to
    /// finish. Idempotent; a no-op on a never-materialized session. The
    /// session can be reused afterwards and will reconnect on next use.
    pub async fn close(&self) {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            conn.teardown().await;
        }
    }
}

impl Default for Chrome {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the cancel fan-out for one connection: waits for either an explicit
/// teardown or transport death, then closes the websocket, reaps the launched
/// process, and fires the teardown-complete token exactly once.
fn spawn_teardown_watcher(
    client: Arc<CdpClient>,
    mut child: Option<Child>,
    cancel: CancellationToken,
    done: CancellationToken,
) {
    tokio::spawn(async move {
        let closed = client.closed_token();
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = closed.cancelled() => {}
        }
        cancel.cancel();
        client.close().await;
        if let Some(child) = child.as_mut() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        done.cancel();
    });
}
