//! Wire protocol: the `{type, payload}` JSON envelope and inbound frame
//! dispatch. Replies to inbound frames go only to the sending connection;
//! cross-user delivery always goes through the gateway's send primitives.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ConnectionSender;

/// Outbound event envelope. Payload is opaque to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Serialize to a text WebSocket frame. Serialization of a
    /// string-plus-Value struct cannot realistically fail, but a failure is
    /// contained here rather than propagated.
    pub fn to_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(e) => {
                tracing::warn!(kind = %self.kind, error = %e, "Failed to serialize envelope");
                None
            }
        }
    }
}

/// Control frames the server sends outside the event envelope.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Pong,
    Error { message: String },
}

/// Inbound client frames. The recognized set is closed; anything with an
/// unrecognized `type` lands in the `Unknown` arm and is answered with an
/// error frame.
#[derive(Debug, PartialEq, Eq)]
pub enum ClientFrame {
    Ping,
    Unknown(String),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawFrame = serde_json::from_str(text)?;
        Ok(match raw.kind.as_str() {
            "ping" => Self::Ping,
            _ => Self::Unknown(raw.kind),
        })
    }
}

/// Handle one inbound text frame from a client.
pub fn handle_client_frame(text: &str, tx: &ConnectionSender, identity: &str) {
    match ClientFrame::parse(text) {
        Ok(ClientFrame::Ping) => send_frame(tx, &ServerFrame::Pong),
        Ok(ClientFrame::Unknown(kind)) => {
            tracing::debug!(identity = %identity, kind = %kind, "Unknown client frame type");
            send_frame(
                tx,
                &ServerFrame::Error {
                    message: "Unknown message type".to_string(),
                },
            );
        }
        Err(e) => {
            tracing::debug!(identity = %identity, error = %e, "Unparsable client frame");
            send_frame(
                tx,
                &ServerFrame::Error {
                    message: "Invalid message format".to_string(),
                },
            );
        }
    }
}

/// Encode and send a control frame. A closed channel means the connection is
/// already being torn down; the failure is swallowed.
pub fn send_frame(tx: &ConnectionSender, frame: &ServerFrame) {
    if let Ok(text) = serde_json::to_string(frame) {
        let _ = tx.send(Message::Text(text.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[test]
    fn envelope_wire_shape() {
        let envelope = Envelope::new("notification", json!({"id": 1}));
        let Some(Message::Text(text)) = envelope.to_message() else {
            panic!("expected text frame");
        };
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value, json!({"type": "notification", "payload": {"id": 1}}));
    }

    #[test]
    fn pong_frame_has_no_payload() {
        let text = serde_json::to_string(&ServerFrame::Pong).unwrap();
        assert_eq!(text, r#"{"type":"pong"}"#);
    }

    #[test]
    fn error_frame_shape() {
        let text = serde_json::to_string(&ServerFrame::Error {
            message: "Unknown message type".to_string(),
        })
        .unwrap();
        assert_eq!(text, r#"{"type":"error","message":"Unknown message type"}"#);
    }

    #[test]
    fn parse_ping() {
        assert_eq!(ClientFrame::parse(r#"{"type":"ping"}"#).unwrap(), ClientFrame::Ping);
        // Extra fields are tolerated
        assert_eq!(
            ClientFrame::parse(r#"{"type":"ping","payload":{"t":1}}"#).unwrap(),
            ClientFrame::Ping
        );
    }

    #[test]
    fn parse_unknown_type() {
        assert_eq!(
            ClientFrame::parse(r#"{"type":"collaboration:room:9","payload":{}}"#).unwrap(),
            ClientFrame::Unknown("collaboration:room:9".to_string())
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ClientFrame::parse("not json at all").is_err());
        assert!(ClientFrame::parse(r#"{"payload": 1}"#).is_err());
    }

    #[test]
    fn unknown_frame_answered_with_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_client_frame(r#"{"type":"mystery"}"#, &tx, "u1");
        let Ok(Message::Text(text)) = rx.try_recv() else {
            panic!("expected error frame");
        };
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value, json!({"type": "error", "message": "Unknown message type"}));
    }

    #[test]
    fn ping_frame_answered_with_pong() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_client_frame(r#"{"type":"ping"}"#, &tx, "u1");
        let Ok(Message::Text(text)) = rx.try_recv() else {
            panic!("expected pong frame");
        };
        assert_eq!(text.as_str(), r#"{"type":"pong"}"#);
    }
}
