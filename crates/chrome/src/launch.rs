//! Local browser launch and remote endpoint discovery.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use uuid::Uuid;

use crate::error::{Error, Result};

const LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);

/// One Chrome command-line switch, with or without a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
    name: String,
    value: Option<String>,
}

impl Flag {
    /// Bare switch, e.g. `--no-sandbox`.
    pub fn set(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Valued switch, e.g. `--headless=new`.
    pub fn value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn to_arg(&self) -> String {
        match &self.value {
            Some(v) => format!("--{}={}", self.name, v),
            None => format!("--{}", self.name),
        }
    }
}

/// Default launch switches, derived from puppeteer's ChromeLauncher list.
pub fn default_flags() -> Vec<Flag> {
    [
        "allow-pre-commit-input",
        "disable-background-networking",
        "disable-background-timer-throttling",
        "disable-backgrounding-occluded-windows",
        "disable-breakpad",
        "disable-client-side-phishing-detection",
        "disable-component-extensions-with-background-pages",
        "disable-crash-reporter",
        "disable-default-apps",
        "disable-dev-shm-usage",
        "disable-hang-monitor",
        "disable-infobars",
        "disable-ipc-flooding-protection",
        "disable-popup-blocking",
        "disable-prompt-on-repost",
        "disable-renderer-backgrounding",
        "disable-search-engine-choice-screen",
        "disable-sync",
        "enable-automation",
        "export-tagged-pdf",
        "generate-pdf-document-outline",
        "metrics-recording-only",
        "no-first-run",
        "use-mock-keychain",
        "start-maximized",
    ]
    .into_iter()
    .map(Flag::set)
    .chain([
        Flag::value("password-store", "basic"),
        Flag::value(
            "disable-features",
            "Translate,AcceptCHFrame,MediaRouter,OptimizationHints,\
             ProcessPerSiteUpToMainFrameThreshold,IsolateSandboxedIframes",
        ),
    ])
    .collect()
}

fn find_executable() -> Option<String> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
        ]
    } else {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium-browser",
            "chromium",
            "chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium-browser",
            "/usr/bin/chromium",
            "/snap/bin/chromium",
        ]
    };

    for candidate in candidates {
        if candidate.starts_with('/') {
            if std::path::Path::new(candidate).exists() {
                return Some((*candidate).to_string());
            }
        } else if which::which(candidate).is_ok() {
            return Some((*candidate).to_string());
        }
    }
    None
}

pub(crate) struct Launched {
    pub child: Child,
    pub ws_url: String,
}

/// Spawn a local browser with `flags` and wait for its DevTools endpoint.
pub(crate) async fn launch(flags: &[Flag]) -> Result<Launched> {
    let exe = std::env::var("CHROME_PATH")
        .ok()
        .or_else(find_executable)
        .ok_or_else(|| Error::Launch("no Chrome or Chromium executable found".into()))?;

    let user_data_dir = std::env::temp_dir().join(format!("chrome-{}", Uuid::now_v7()));

    let mut cmd = Command::new(&exe);
    cmd.args(flags.iter().map(Flag::to_arg))
        .arg("--remote-debugging-port=0")
        .arg(format!("--user-data-dir={}", user_data_dir.display()))
        .arg("about:blank")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Launch(format!("failed to spawn {exe}: {e}")))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Launch("no stderr pipe from browser process".into()))?;
    let mut lines = BufReader::new(stderr).lines();

    let ws_url = tokio::time::timeout(LAUNCH_TIMEOUT, async {
        while let Some(line) = lines.next_line().await? {
            if let Some(rest) = line.strip_prefix("DevTools listening on ") {
                return Ok(rest.trim().to_string());
            }
        }
        Err(Error::Launch(
            "browser exited before the DevTools endpoint appeared".into(),
        ))
    })
    .await
    .map_err(|_| Error::Timeout)??;

    // Keep draining stderr so the process never blocks on a full pipe.
    tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    tracing::debug!(%ws_url, "browser launched");
    Ok(Launched { child, ws_url })
}

/// `/json/version` response subset.
#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Resolve a remote debugging address to its browser websocket endpoint.
///
/// Addresses already pointing at a `/devtools/` path are used as-is;
/// anything else is probed through `/json/version`.
pub(crate) async fn resolve_ws_url(addr: &str) -> Result<String> {
    if addr.contains("/devtools/") {
        return Ok(addr.to_string());
    }
    let base = addr
        .replacen("ws://", "http://", 1)
        .replacen("wss://", "https://", 1);
    let url = format!("{}/json/version", base.trim_end_matches('/'));

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let info: VersionInfo = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(info.web_socket_debugger_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_rendering() {
        assert_eq!(Flag::set("no-sandbox").to_arg(), "--no-sandbox");
        assert_eq!(Flag::value("headless", "new").to_arg(), "--headless=new");
    }

    #[test]
    fn default_flags_include_baseline_switches() {
        let flags = default_flags();
        assert!(flags.contains(&Flag::set("no-first-run")));
        assert!(flags.contains(&Flag::set("enable-automation")));
        assert!(flags.contains(&Flag::value("password-store", "basic")));
    }

    #[test]
    fn version_info_parses() {
        let info: VersionInfo = serde_json::from_str(
            r#"{"Browser":"Chrome/126.0","webSocketDebuggerUrl":"ws://localhost:9222/devtools/browser/x"}"#,
        )
        .unwrap();
        assert!(info.web_socket_debugger_url.ends_with("/browser/x"));
    }
}
