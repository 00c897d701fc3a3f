//! CDP wire types.
//!
//! These are the fundamental types for CDP communication.
//! Keep them minimal - add domain-specific types only when needed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request ID - monotonically increasing, assigned by us
pub type RequestId = u64;

/// Target ID from Chrome
pub type TargetId = String;

/// Session ID for attached targets
pub type SessionId = String;

/// CDP request sent to the browser
#[derive(Debug, Clone, Serialize)]
pub struct CdpRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// CDP response from the browser
#[derive(Debug, Clone, Deserialize)]
pub struct CdpResponse {
    pub id: RequestId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<CdpErrorBody>,
}

/// Error payload carried inside a CDP response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CdpErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// CDP event from the browser (no request ID)
#[derive(Debug, Clone, Deserialize)]
pub struct CdpEvent {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

/// Unified incoming CDP message (response or event)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CdpMessage {
    Response(CdpResponse),
    Event(CdpEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_with_id_parses_as_response() {
        let msg: CdpMessage =
            serde_json::from_str(r#"{"id":7,"result":{"targetId":"abc"}}"#).unwrap();
        match msg {
            CdpMessage::Response(resp) => {
                assert_eq!(resp.id, 7);
                assert!(resp.error.is_none());
            }
            CdpMessage::Event(_) => panic!("expected response"),
        }
    }

    #[test]
    fn message_without_id_parses_as_event() {
        let msg: CdpMessage = serde_json::from_str(
            r#"{"method":"Network.loadingFinished","params":{"requestId":"1"},"sessionId":"s1"}"#,
        )
        .unwrap();
        match msg {
            CdpMessage::Event(ev) => {
                assert_eq!(ev.method, "Network.loadingFinished");
                assert_eq!(ev.session_id.as_deref(), Some("s1"));
            }
            CdpMessage::Response(_) => panic!("expected event"),
        }
    }

    #[test]
    fn error_response_carries_code_and_message() {
        let msg: CdpMessage = serde_json::from_str(
            r#"{"id":3,"error":{"code":-32000,"message":"No resource with given identifier"}}"#,
        )
        .unwrap();
        match msg {
            CdpMessage::Response(resp) => {
                let err = resp.error.unwrap();
                assert_eq!(err.code, -32000);
            }
            CdpMessage::Event(_) => panic!("expected response"),
        }
    }
}
