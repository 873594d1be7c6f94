//! Wire protocol (§6): the single JSON envelope and its tagged variants.
//!
//! Grounded on the teacher's `routes/websocket.rs` `ClientMessage`/`WsMessage`
//! tagged-enum pattern, generalized from one alert feed to the full
//! client/server type surface in §6.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ErrorCode;

/// `<namespace>.<scope>` subscription identifier (§3). Comparison is exact
/// string equality except symbol scopes, which are lower-cased on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicKey(String);

impl TopicKey {
    pub fn parse(raw: &str) -> Self {
        let (namespace, scope) = raw.split_once('.').unwrap_or((raw, "*"));
        match namespace {
            "token" => TopicKey(format!("token.{}", scope.to_lowercase())),
            _ => TopicKey(raw.to_string()),
        }
    }

    pub fn namespace(&self) -> &str {
        self.0.split_once('.').map(|(n, _)| n).unwrap_or(&self.0)
    }

    pub fn scope(&self) -> &str {
        self.0.split_once('.').map(|(_, s)| s).unwrap_or("*")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TopicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inbound frames, one variant per §4.4 classification.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "SUBSCRIBE")]
    Subscribe {
        topic: String,
        #[serde(default, rename = "requestId")]
        request_id: Option<String>,
    },
    #[serde(rename = "UNSUBSCRIBE")]
    Unsubscribe { topic: String },
    #[serde(rename = "REQUEST")]
    Request {
        topic: String,
        #[serde(default)]
        data: Option<Value>,
        #[serde(default, rename = "requestId")]
        request_id: Option<String>,
    },
    #[serde(rename = "COMMAND")]
    Command {
        topic: String,
        #[serde(default)]
        key: Option<String>,
        #[serde(default)]
        value: Option<Value>,
    },
    #[serde(rename = "JOIN_ROOM")]
    JoinRoom {
        #[serde(rename = "contestId")]
        contest_id: i64,
    },
    #[serde(rename = "LEAVE_ROOM")]
    LeaveRoom {
        #[serde(rename = "contestId")]
        contest_id: i64,
    },
    #[serde(rename = "SEND_CHAT_MESSAGE")]
    SendChatMessage {
        #[serde(rename = "contestId")]
        contest_id: i64,
        text: String,
    },
    #[serde(rename = "PARTICIPANT_ACTIVITY")]
    ParticipantActivity {
        #[serde(rename = "contestId")]
        contest_id: i64,
        data: Value,
    },
    #[serde(rename = "MARK_READ")]
    MarkRead { id: i64 },
    #[serde(rename = "GET_UNREAD")]
    GetUnread,
    #[serde(rename = "PING")]
    Ping {
        #[serde(default)]
        timestamp: Option<String>,
    },
}

/// Outbound frames, serialized to the single envelope shape from §6.
///
/// Hand-rolled `to_json` rather than a derived `Serialize`: the named-event
/// variant's `type` tag is open-ended (TOKEN_DATA, WALLET_UPDATE,
/// CHAT_MESSAGE, ... — §6) and doesn't fit a fixed tagged-enum shape.
#[derive(Debug, Clone)]
pub enum ServerFrame {
    Data {
        topic: String,
        data: Value,
    },
    Acknowledgment {
        topic: Option<String>,
        request_id: Option<String>,
        data: Value,
    },
    Error {
        code: u16,
        message: String,
        request_id: Option<String>,
    },
    System {
        reason: String,
    },
    Pong {
        timestamp: Option<String>,
    },
    /// Named events share the DATA envelope shape but carry their own `type`.
    Named {
        event: &'static str,
        topic: String,
        data: Value,
    },
}

impl ServerFrame {
    pub fn named(event: &'static str, topic: impl Into<String>, data: Value) -> Self {
        ServerFrame::Named {
            event,
            topic: topic.into(),
            data,
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerFrame::Error {
            code: code.as_u16(),
            message: message.into(),
            request_id,
        }
    }

    pub fn to_json(&self) -> Value {
        let now = Utc::now().to_rfc3339();
        match self {
            ServerFrame::Data { topic, data } => serde_json::json!({
                "type": "DATA", "topic": topic, "data": data, "timestamp": now,
            }),
            ServerFrame::Acknowledgment { topic, request_id, data } => serde_json::json!({
                "type": "ACKNOWLEDGMENT", "topic": topic, "requestId": request_id,
                "data": data, "timestamp": now,
            }),
            ServerFrame::Error { code, message, request_id } => serde_json::json!({
                "type": "ERROR", "code": code, "message": message,
                "requestId": request_id, "timestamp": now,
            }),
            ServerFrame::System { reason } => serde_json::json!({
                "type": "SYSTEM", "reason": reason, "timestamp": now,
            }),
            ServerFrame::Pong { timestamp } => serde_json::json!({
                "type": "PONG", "timestamp": timestamp.clone().unwrap_or(now),
            }),
            ServerFrame::Named { event, topic, data } => serde_json::json!({
                "type": event, "topic": topic, "data": data, "timestamp": now,
            }),
        }
    }

    pub fn into_text(&self) -> String {
        self.to_json().to_string()
    }
}

/// A frame plus its delivery class. Durable frames (outbox-originated)
/// must never be silently dropped on backpressure (§4.1); everything else
/// is best-effort and may be dropped when the connection's queue is full.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub frame: ServerFrame,
    pub durable: bool,
}

impl Outbound {
    pub fn best_effort(frame: ServerFrame) -> Self {
        Outbound {
            frame,
            durable: false,
        }
    }

    pub fn durable(frame: ServerFrame) -> Self {
        Outbound {
            frame,
            durable: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscribe() {
        let raw = r#"{"type":"SUBSCRIBE","topic":"market.tokens"}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        matches!(frame, ClientFrame::Subscribe { .. });
    }

    #[test]
    fn token_topic_lowercases_scope() {
        let key = TopicKey::parse("token.SOL");
        assert_eq!(key.as_str(), "token.sol");
    }

    #[test]
    fn error_frame_carries_numeric_code() {
        let frame = ServerFrame::error(ErrorCode::RateLimited, "too many messages", None);
        let json = frame.to_json();
        assert_eq!(json["code"], 4290);
    }
}
