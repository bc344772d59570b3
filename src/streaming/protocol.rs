//! Recognition server socket protocol types
//!
//! This module defines the JSON control messages exchanged with the
//! recognition server. Audio travels separately as raw binary frames on the
//! same connection.
//!
//! # Protocol Overview
//!
//! 1. Connect to `ws://<host>/socket`
//! 2. Send `welcome` with client id, access token and engine options
//! 3. Receive `welcome` carrying the negotiated `info.options`
//! 4. Stream binary audio frames (WAVE header first)
//! 5. Answer every server `ping` with a `pong` echoing its `msg_id`
//! 6. Send `audioend` with the total byte length, receive `result` messages

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message ids wrap back to 1 after this value
pub const MAX_MESSAGE_ID: u32 = 999_999;

/// Payload of the `audioend` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioEndData {
    pub byte_length: usize,
    pub buffer_or_time_limit: bool,
}

// ============================================================================
// Client Messages (sent TO the server)
// ============================================================================

/// Messages sent from client to the recognition server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Authenticate and request engine options
    Welcome {
        data: Map<String, Value>,
        client_id: String,
        access_token: String,
        msg_id: u32,
    },

    /// Answer to a server `ping`
    Pong { msg_id: Value },

    /// End of audio input, requests the final result
    #[serde(rename = "audioend")]
    AudioEnd { data: AudioEndData, msg_id: u32 },
}

impl ClientMessage {
    pub fn welcome(
        options: &Map<String, Value>,
        client_id: &str,
        access_token: &str,
        msg_id: u32,
    ) -> Self {
        Self::Welcome {
            data: options.clone(),
            client_id: client_id.to_string(),
            access_token: access_token.to_string(),
            msg_id,
        }
    }

    pub fn pong(msg_id: Value) -> Self {
        Self::Pong { msg_id }
    }

    pub fn audio_end(byte_length: usize, buffer_or_time_limit: bool, msg_id: u32) -> Self {
        Self::AudioEnd {
            data: AudioEndData {
                byte_length,
                buffer_or_time_limit,
            },
            msg_id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::Welcome { .. } => "welcome",
            ClientMessage::Pong { .. } => "pong",
            ClientMessage::AudioEnd { .. } => "audioend",
        }
    }
}

// ============================================================================
// Server Messages (received FROM the server)
// ============================================================================

/// Server info attached to the `welcome` reply
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WelcomeInfo {
    #[serde(default)]
    pub options: Option<Map<String, Value>>,

    /// Everything else the server advertises (version, engine, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A partial or final transcript
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMessage {
    #[serde(default)]
    pub is_final: bool,

    #[serde(default)]
    pub transcript: String,

    /// Optional metadata (confidence, alternatives, features, msg_id, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResultMessage {
    pub fn new(transcript: &str, is_final: bool) -> Self {
        Self {
            is_final,
            transcript: transcript.to_string(),
            extra: Map::new(),
        }
    }

    /// The full result object as received, with `type` restored
    pub fn to_value(&self) -> Value {
        let mut map = self.extra.clone();
        map.insert("type".to_string(), Value::from("result"));
        map.insert("isFinal".to_string(), Value::from(self.is_final));
        map.insert("transcript".to_string(), Value::from(self.transcript.clone()));
        Value::Object(map)
    }
}

/// An `error` message sent by the server
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Messages received from the recognition server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Negotiation finished, streaming may begin
    Welcome {
        #[serde(default)]
        info: Option<WelcomeInfo>,
    },

    /// Keep-alive, must be answered with `pong`
    Ping {
        #[serde(default)]
        msg_id: Value,
    },

    /// Partial or final transcript
    Result(ResultMessage),

    /// Server-side error
    Error(ServerError),

    /// Generic response, not used for streaming
    Response,

    /// Catch-all for message types we don't handle
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ServerMessage::Error(_))
    }

    /// Negotiated options from a `welcome` reply (empty if absent)
    pub fn welcome_options(&self) -> Option<Map<String, Value>> {
        match self {
            ServerMessage::Welcome { info } => Some(
                info.as_ref()
                    .and_then(|i| i.options.clone())
                    .unwrap_or_default(),
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_welcome_serialization() {
        let mut options = Map::new();
        options.insert("samplerate".into(), json!(16000));
        options.insert("continuous".into(), json!(false));

        let msg = ClientMessage::welcome(&options, "any", "test1234", 1);
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "welcome",
                "data": {"samplerate": 16000, "continuous": false},
                "client_id": "any",
                "access_token": "test1234",
                "msg_id": 1
            })
        );
    }

    #[test]
    fn test_client_audio_end_serialization() {
        let msg = ClientMessage::audio_end(20524, true, 7);
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "audioend",
                "data": {"byteLength": 20524, "bufferOrTimeLimit": true},
                "msg_id": 7
            })
        );
        assert_eq!(msg.type_name(), "audioend");
    }

    #[test]
    fn test_client_pong_echoes_id() {
        let value = serde_json::to_value(ClientMessage::pong(json!(42))).unwrap();
        assert_eq!(value, json!({"type": "pong", "msg_id": 42}));
    }

    #[test]
    fn test_server_welcome_deserialization() {
        let msg = ServerMessage::parse(
            r#"{"type":"welcome","msg_id":1,"code":200,
                "info":{"version":"0.10.0","engine":"vosk","options":{"language":"de-DE","continuous":true}}}"#,
        )
        .unwrap();

        let options = msg.welcome_options().unwrap();
        assert_eq!(options.get("language"), Some(&json!("de-DE")));
        assert_eq!(options.get("continuous"), Some(&json!(true)));
    }

    #[test]
    fn test_server_welcome_without_info() {
        let msg = ServerMessage::parse(r#"{"type":"welcome"}"#).unwrap();
        assert_eq!(msg.welcome_options(), Some(Map::new()));
    }

    #[test]
    fn test_server_result_deserialization() {
        let msg = ServerMessage::parse(
            r#"{"type":"result","msg_id":12,"code":200,"transcript":"hello world","isFinal":true,"confidence":0.9}"#,
        )
        .unwrap();

        match msg {
            ServerMessage::Result(result) => {
                assert!(result.is_final);
                assert_eq!(result.transcript, "hello world");
                let value = result.to_value();
                assert_eq!(value["type"], json!("result"));
                assert_eq!(value["confidence"], json!(0.9));
                assert_eq!(value["msg_id"], json!(12));
            }
            _ => panic!("Expected Result"),
        }
    }

    #[test]
    fn test_server_error_deserialization() {
        let msg = ServerMessage::parse(
            r#"{"type":"error","name":"Unauthorized","message":"bad token","code":401}"#,
        )
        .unwrap();

        assert!(msg.is_error());
        match msg {
            ServerMessage::Error(err) => {
                assert_eq!(err.name.as_deref(), Some("Unauthorized"));
                assert_eq!(err.message.as_deref(), Some("bad token"));
                assert_eq!(err.extra.get("code"), Some(&json!(401)));
            }
            _ => panic!("Expected Error"),
        }
    }

    #[test]
    fn test_server_ping_deserialization() {
        let msg = ServerMessage::parse(r#"{"type":"ping","msg_id":"abc"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Ping { msg_id } if msg_id == json!("abc")));
    }

    #[test]
    fn test_server_message_unknown_type() {
        let msg = ServerMessage::parse(r#"{"type":"chat","data":"whatever"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Unknown));
    }

    #[test]
    fn test_server_message_invalid_json() {
        assert!(ServerMessage::parse("not json").is_err());
    }
}
