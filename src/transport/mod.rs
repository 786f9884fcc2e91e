//! The duplex websocket connection that delivers pty data.

pub mod connection;
pub mod socket;

pub use connection::{Connection, ConnectionState, Inbound, ReconnectDecision, ResponseCallback};
pub use socket::{spawn_transport, TransportHandle};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::sync::SessionKey;

pub const PING_TYPE: &str = "ping";
pub const PONG_TYPE: &str = "pong";
pub const HELLO_TYPE: &str = "hello";
pub const CMD_DATA_TYPE: &str = "cmddata";
pub const PTY_TYPE: &str = "pty";

pub fn ping_message() -> Value {
    json!({ "type": PING_TYPE })
}

pub fn pong_message() -> Value {
    json!({ "type": PONG_TYPE })
}

/// Incremental pty output pushed by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtyUpdate {
    #[serde(rename = "screenid", default, skip_serializing_if = "Option::is_none")]
    pub screen_id: Option<String>,
    #[serde(rename = "lineid", default, skip_serializing_if = "Option::is_none")]
    pub line_id: Option<String>,
    #[serde(rename = "remoteid", default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(rename = "ptypos")]
    pub position: u64,
    #[serde(rename = "ptydata64")]
    pub data64: String,
}

impl PtyUpdate {
    /// The session this update belongs to. Command output wins over the
    /// remote id when both are present.
    pub fn key(&self) -> Option<SessionKey> {
        match (&self.screen_id, &self.line_id, &self.remote_id) {
            (Some(screen_id), Some(line_id), _) => Some(SessionKey::command(screen_id, line_id)),
            (_, _, Some(remote_id)) => Some(SessionKey::remote(remote_id)),
            _ => None,
        }
    }

    pub fn payload(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(&self.data64)
    }
}
