//! Cookie pass-through helpers.
//!
//! One-shot request/response calls over `Network.setCookie` /
//! `Network.getCookies`; no correlation or lifecycle involved.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

use crate::error::Result;
use crate::scope::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Lax,
    Strict,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            Self::Lax => "Lax",
            Self::Strict => "Strict",
            Self::None => "None",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    /// Absolute expiry; ignored when `max_age` is set.
    pub expires: Option<SystemTime>,
    /// Lifetime in seconds relative to now; takes precedence over `expires`.
    pub max_age: Option<i64>,
    pub same_site: Option<SameSite>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Self::default()
        }
    }
}

fn epoch_seconds(t: SystemTime) -> f64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

fn set_cookie_params(url: &str, cookie: &Cookie) -> Value {
    let mut params = serde_json::Map::new();
    params.insert("name".into(), json!(cookie.name));
    params.insert("value".into(), json!(cookie.value));
    params.insert("url".into(), json!(url));
    params.insert("secure".into(), json!(cookie.secure));
    params.insert("httpOnly".into(), json!(cookie.http_only));
    if let Some(path) = &cookie.path {
        params.insert("path".into(), json!(path));
    }
    if let Some(domain) = &cookie.domain {
        params.insert("domain".into(), json!(domain));
    }
    let expires = match cookie.max_age {
        Some(age) if age != 0 => Some(epoch_seconds(SystemTime::now()) + age as f64),
        _ => cookie.expires.map(epoch_seconds),
    };
    if let Some(expires) = expires {
        params.insert("expires".into(), json!(expires));
    }
    if let Some(same_site) = cookie.same_site {
        params.insert("sameSite".into(), json!(same_site.as_str()));
    }
    Value::Object(params)
}

/// Set `cookies` for `url` on the scope's connection.
pub async fn set_cookies(scope: &Scope, url: &str, cookies: &[Cookie]) -> Result<()> {
    for cookie in cookies {
        scope
            .send("Network.setCookie", Some(set_cookie_params(url, cookie)))
            .await?;
    }
    Ok(())
}

/// Read cookies, restricted to `url` when given.
pub async fn cookies(scope: &Scope, url: Option<&str>) -> Result<Vec<Cookie>> {
    let params = url.map(|u| json!({ "urls": [u] }));
    let v = scope.send("Network.getCookies", params).await?;
    let mut out = Vec::new();
    if let Some(items) = v.get("cookies").and_then(Value::as_array) {
        for item in items {
            out.push(Cookie {
                name: item
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                value: item
                    .get("value")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                ..Cookie::default()
            });
        }
    }
    Ok(out)
}
