use serde::{Deserialize, Serialize};

pub const DEFAULT_BACKPRESSURE_CEILING_BYTES: usize = 5 * 1024 * 1024;

/// WebSocket close code for an orderly shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Control message opening a relay session.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RelayControl {
    Start { stream_key: String, mime_type: String },
}

impl std::fmt::Debug for RelayControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayControl::Start { mime_type, .. } => f
                .debug_struct("Start")
                .field("stream_key", &"[REDACTED]")
                .field("mime_type", mime_type)
                .finish(),
        }
    }
}

/// Text replies the relay sends back during the handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayReply {
    Ready,
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Reply(RelayReply),
    Closed { code: Option<u16>, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveStatus {
    Connecting,
    Live { elapsed_secs: u64 },
    Stopping,
    Ended,
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_message_wire_shape() {
        let value = serde_json::to_value(RelayControl::Start {
            stream_key: "sk".to_string(),
            mime_type: "video/webm".to_string(),
        })
        .unwrap();
        assert_eq!(
            value,
            json!({ "type": "start", "streamKey": "sk", "mimeType": "video/webm" })
        );
    }

    #[test]
    fn relay_replies_parse() {
        let ready: RelayReply = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();
        assert_eq!(ready, RelayReply::Ready);
        let error: RelayReply =
            serde_json::from_str(r#"{"type":"error","message":"bad key"}"#).unwrap();
        assert_eq!(
            error,
            RelayReply::Error {
                message: "bad key".to_string()
            }
        );
    }
}
