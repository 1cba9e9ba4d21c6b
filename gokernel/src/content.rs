//! Typed `content` payloads for the message types consumed/emitted per §6
//! and §10.5. Kept as plain serde structs rather than a shared trait
//! hierarchy — each message type's shape is fixed by the wire protocol, not
//! something this kernel gets to redesign.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub silent: bool,
    #[serde(default = "default_true")]
    pub store_history: bool,
    #[serde(default)]
    pub allow_stdin: bool,
    #[serde(default)]
    pub stop_on_error: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status")]
pub enum ExecuteReply {
    #[serde(rename = "ok")]
    Ok { execution_count: u64 },
    #[serde(rename = "error")]
    Error { execution_count: u64, ename: String, evalue: String, traceback: Vec<String> },
}

#[derive(Clone, Debug, Serialize)]
pub struct ExecuteResult {
    pub execution_count: u64,
    pub data: Value,
    pub metadata: Value,
}

#[derive(Clone, Debug, Serialize)]
pub struct Stream {
    pub name: String,
    pub text: String,
}

impl Stream {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self { name: "stdout".to_string(), text: text.into() }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self { name: "stderr".to_string(), text: text.into() }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct DisplayDataContent {
    pub data: Value,
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transient: Option<Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ErrorContent {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Status {
    pub execution_state: &'static str,
}

impl Status {
    pub const BUSY: Status = Status { execution_state: "busy" };
    pub const IDLE: Status = Status { execution_state: "idle" };
    pub const STARTING: Status = Status { execution_state: "starting" };
}

#[derive(Clone, Debug, Serialize)]
pub struct KernelInfoReply {
    pub status: &'static str,
    pub protocol_version: &'static str,
    pub implementation: &'static str,
    pub implementation_version: &'static str,
    pub language_info: LanguageInfo,
    pub banner: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct LanguageInfo {
    pub name: &'static str,
    pub version: String,
    pub mimetype: &'static str,
    pub file_extension: &'static str,
    pub pygments_lexer: &'static str,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CompleteRequest {
    pub code: String,
    pub cursor_pos: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct CompleteReply {
    pub status: &'static str,
    pub matches: Vec<String>,
    pub cursor_start: usize,
    pub cursor_end: usize,
    pub metadata: Value,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InspectRequest {
    pub code: String,
    pub cursor_pos: usize,
    #[serde(default)]
    pub detail_level: u8,
}

#[derive(Clone, Debug, Serialize)]
pub struct InspectReply {
    pub status: &'static str,
    pub found: bool,
    pub data: Value,
    pub metadata: Value,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IsCompleteRequest {
    pub code: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct IsCompleteReply {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indent: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InputReply {
    pub value: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct InputRequestContent {
    pub prompt: String,
    pub password: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub restart: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ShutdownReply {
    pub restart: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct InterruptReply {}

#[derive(Clone, Debug, Deserialize)]
pub struct HistoryRequest {
    #[allow(dead_code)]
    #[serde(flatten)]
    pub raw: Value,
}

#[derive(Clone, Debug, Serialize)]
pub struct HistoryReply {
    pub history: Vec<Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CommInfoReply {
    pub comms: Value,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CommOpen {
    pub comm_id: String,
    pub target_name: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CommMsg {
    pub comm_id: String,
    pub data: Value,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CommClose {
    pub comm_id: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub data: Value,
}

/// The widget channel's own envelope, carried inside a `comm_msg`'s `data`
/// field (§6): `{address, value}` for user traffic, plus the
/// protocol-private heartbeat/ack addresses.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct WidgetEnvelope {
    pub address: String,
    pub value: Value,
}

pub const WIDGET_TARGET_NAME: &str = "gokernel.widget";
pub const ADDR_COMM_OPEN_ACK: &str = "#comm_open_ack";
pub const ADDR_HEARTBEAT_PING: &str = "#heartbeat/ping";
pub const ADDR_HEARTBEAT_PONG: &str = "#heartbeat/pong";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_request_defaults_store_history_true() {
        let req: ExecuteRequest = serde_json::from_str(r#"{"code": "x"}"#).unwrap();
        assert!(req.store_history);
        assert!(!req.silent);
    }

    #[test]
    fn execute_reply_tags_status_variant() {
        let reply = ExecuteReply::Ok { execution_count: 3 };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["execution_count"], 3);
    }

    #[test]
    fn widget_envelope_round_trips() {
        let env = WidgetEnvelope { address: "foo".into(), value: serde_json::json!(42) };
        let text = serde_json::to_string(&env).unwrap();
        let back: WidgetEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, env);
    }
}
