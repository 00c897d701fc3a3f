//! DOM storage pass-through helpers.

use serde_json::{json, Value};

use crate::error::Result;
use crate::scope::Scope;

fn storage_id(storage_key: &str) -> Value {
    json!({ "storageKey": storage_key, "isLocalStorage": true })
}

/// Set one localStorage item for the origin identified by `storage_key`.
pub async fn set_storage_item(
    scope: &Scope,
    storage_key: &str,
    key: &str,
    value: &str,
) -> Result<()> {
    scope
        .send(
            "DOMStorage.setDOMStorageItem",
            Some(json!({
                "storageId": storage_id(storage_key),
                "key": key,
                "value": value,
            })),
        )
        .await
        .map(|_| ())
}

/// Read all localStorage items for the origin identified by `storage_key`.
pub async fn storage_items(scope: &Scope, storage_key: &str) -> Result<Vec<(String, String)>> {
    let v = scope
        .send(
            "DOMStorage.getDOMStorageItems",
            Some(json!({ "storageId": storage_id(storage_key) })),
        )
        .await?;
    let mut out = Vec::new();
    if let Some(entries) = v.get("entries").and_then(Value::as_array) {
        for entry in entries {
            if let Some([k, v]) = entry.as_array().map(Vec::as_slice) {
                out.push((
                    k.as_str().unwrap_or_default().to_string(),
                    v.as_str().unwrap_or_default().to_string(),
                ));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_id_shape() {
        let id = storage_id("http://example.com/");
        assert_eq!(id["storageKey"], "http://example.com/");
        assert_eq!(id["isLocalStorage"], true);
    }

    #[tokio::test]
    #[ignore] // Needs a Chrome executable on PATH
    async fn set_and_read_round_trip() {
        use axum::{routing::get, Router};

        let app = Router::new().route("/", get(|| async { "Test" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let chrome = crate::Chrome::headless().no_sandbox();
        let scope = chrome
            .new_scope(Some(std::time::Duration::from_secs(30)))
            .await
            .unwrap();

        let url = format!("http://{addr}");
        scope.navigate(&url).await.unwrap();

        let storage_key = format!("{url}/");
        set_storage_item(&scope, &storage_key, "test", "value")
            .await
            .unwrap();
        let found = storage_items(&scope, &storage_key)
            .await
            .unwrap()
            .into_iter()
            .any(|(k, v)| k == "test" && v == "value");
        assert!(found, "want found, got not found");

        chrome.close().await;
    }
}
