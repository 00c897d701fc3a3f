//! CDP (Chrome DevTools Protocol) transport.
//!
//! Single WebSocket connection per browser, request/response matching via ID,
//! events fanned out on a broadcast channel so consumers can `select!` against
//! their own cancellation.

pub mod client;
pub mod protocol;

pub use client::CdpClient;
pub use protocol::{CdpEvent, CdpRequest, CdpResponse, RequestId, SessionId, TargetId};
