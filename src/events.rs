//! Outbound worker events
//!
//! Everything the `GateController` reports to its orchestrator. Each event
//! serializes to the JSON object the orchestrator expects, e.g.
//! `{"moduleEvent": true, "gate": {...}}` or
//! `{"recognitionEvent": {...}, "eventFormat": "webSpeechApi"}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::state_machine::GateSnapshot;
use crate::streaming::{ErrorInfo, ResultMessage};

pub const MODULE_STATE_READY: u8 = 1;
pub const MODULE_STATE_TERMINATED: u8 = 9;

/// Vocabulary used for recognition events, fixed at construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageFormat {
    /// Server result/error objects passed through
    #[default]
    #[serde(rename = "default")]
    Default,
    /// Web Speech API compatible shapes
    #[serde(rename = "webSpeechApi")]
    WebSpeechApi,
}

/// Error names of the Web Speech API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WebSpeechErrorKind {
    Network,
    AudioCapture,
    Unknown,
    NoSpeech,
    Nomatch,
    Aborted,
    NotAllowed,
    ServiceNotAllowed,
    BadGrammar,
    LanguageNotSupported,
}

impl WebSpeechErrorKind {
    /// Map a normalized error name
    pub fn from_error_name(name: &str) -> Self {
        match name {
            "SocketConnectionError" => WebSpeechErrorKind::Network,
            "Unauthorized" => WebSpeechErrorKind::ServiceNotAllowed,
            _ => WebSpeechErrorKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebSpeechAlternative {
    pub transcript: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebSpeechResult {
    #[serde(rename = "isFinal")]
    pub is_final: bool,
    #[serde(rename = "0")]
    pub best: WebSpeechAlternative,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WebSpeechEvent {
    Result {
        #[serde(rename = "resultIndex")]
        result_index: u32,
        results: Vec<WebSpeechResult>,
        #[serde(rename = "timeStamp")]
        time_stamp: i64,
    },
    Error {
        error: WebSpeechErrorKind,
        message: String,
        #[serde(rename = "timeStamp")]
        time_stamp: i64,
    },
}

/// A recognition event in one of the two vocabularies
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RecognitionEvent {
    Default(Value),
    WebSpeech(WebSpeechEvent),
}

impl RecognitionEvent {
    pub fn format(&self) -> MessageFormat {
        match self {
            RecognitionEvent::Default(_) => MessageFormat::Default,
            RecognitionEvent::WebSpeech(_) => MessageFormat::WebSpeechApi,
        }
    }

    /// A final result, or an error that ends recognition
    pub fn is_final(&self) -> bool {
        match self {
            RecognitionEvent::Default(value) => {
                value.get("type").and_then(Value::as_str) == Some("error")
                    || value.get("isFinal").and_then(Value::as_bool).unwrap_or(false)
            }
            RecognitionEvent::WebSpeech(WebSpeechEvent::Error { .. }) => true,
            RecognitionEvent::WebSpeech(WebSpeechEvent::Result { results, .. }) => {
                results.iter().any(|r| r.is_final)
            }
        }
    }
}

impl MessageFormat {
    /// Translate a server result
    ///
    /// In web-speech form an empty final transcript is reported as `no-speech`.
    pub fn result_event(&self, result: &ResultMessage, time_stamp: i64) -> RecognitionEvent {
        match self {
            MessageFormat::Default => RecognitionEvent::Default(result.to_value()),
            MessageFormat::WebSpeechApi => {
                if result.is_final && result.transcript.is_empty() {
                    return RecognitionEvent::WebSpeech(WebSpeechEvent::Error {
                        error: WebSpeechErrorKind::NoSpeech,
                        message: "Final result was empty".to_string(),
                        time_stamp,
                    });
                }
                RecognitionEvent::WebSpeech(WebSpeechEvent::Result {
                    result_index: 0,
                    results: vec![WebSpeechResult {
                        is_final: result.is_final,
                        best: WebSpeechAlternative {
                            transcript: result.transcript.clone(),
                        },
                    }],
                    time_stamp,
                })
            }
        }
    }

    /// Translate a session error
    pub fn error_event(&self, error: &ErrorInfo, time_stamp: i64) -> RecognitionEvent {
        match self {
            MessageFormat::Default => {
                let mut map = Map::new();
                map.insert("type".into(), Value::from("error"));
                map.insert("name".into(), Value::from(error.name.clone()));
                map.insert("message".into(), Value::from(error.message.clone()));
                if let Some(details) = &error.details {
                    map.insert("details".into(), details.clone());
                }
                RecognitionEvent::Default(Value::Object(map))
            }
            MessageFormat::WebSpeechApi => {
                let message = if error.message.is_empty() {
                    error.name.clone()
                } else {
                    error.message.clone()
                };
                RecognitionEvent::WebSpeech(WebSpeechEvent::Error {
                    error: WebSpeechErrorKind::from_error_name(&error.name),
                    message,
                    time_stamp,
                })
            }
        }
    }

    /// Synthetic result used in dry-run mode
    pub fn fake_result_event(&self, transcript: &str, is_final: bool, time_stamp: i64) -> RecognitionEvent {
        let mut result = ResultMessage::new(transcript, is_final);
        result.extra.insert("msg_id".into(), Value::from(time_stamp));
        result.extra.insert("code".into(), Value::from(200));
        self.result_event(&result, time_stamp)
    }
}

/// Sizes and limits reported once after construction
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    pub module_id: String,
    pub input_sample_rate: u32,
    pub input_sample_size: usize,
    pub input_is_float32: bool,
    pub channel_count: u16,
    pub lookback_buffer_size_kb: usize,
    pub lookback_limit_ms: u32,
    pub record_limit_ms: u64,
    pub stt_server_url: String,
    pub stt_server_options: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionEventKind {
    Open,
    Ready,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionEvent {
    #[serde(rename = "type")]
    pub kind: ConnectionEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

/// Exported recording
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFile {
    /// Complete WAVE file (not serialized; see `byte_length`)
    #[serde(skip)]
    pub wav: Vec<u8>,
    pub byte_length: usize,
    pub sample_rate: u32,
    pub total_samples: usize,
    pub channels: u16,
}

/// Events emitted by the worker
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WorkerEvent {
    ModuleState {
        #[serde(rename = "moduleState")]
        state: u8,
        #[serde(rename = "moduleInfo", skip_serializing_if = "Option::is_none")]
        info: Option<ModuleInfo>,
    },
    Gate {
        #[serde(rename = "moduleEvent")]
        module_event: bool,
        gate: GateSnapshot,
    },
    Connection {
        #[serde(rename = "connectionEvent")]
        event: ConnectionEvent,
    },
    Recognition {
        #[serde(rename = "recognitionEvent")]
        event: RecognitionEvent,
        #[serde(rename = "eventFormat")]
        format: MessageFormat,
    },
    AudioFile {
        #[serde(rename = "moduleResponse")]
        module_response: bool,
        output: AudioFile,
    },
    /// Errors outside the recognition session (format mismatch, state errors)
    Error { error: ErrorInfo },
}

impl WorkerEvent {
    pub fn ready(info: ModuleInfo) -> Self {
        WorkerEvent::ModuleState {
            state: MODULE_STATE_READY,
            info: Some(info),
        }
    }

    pub fn terminated() -> Self {
        WorkerEvent::ModuleState {
            state: MODULE_STATE_TERMINATED,
            info: None,
        }
    }

    pub fn gate(gate: GateSnapshot) -> Self {
        WorkerEvent::Gate {
            module_event: true,
            gate,
        }
    }

    pub fn connection(kind: ConnectionEventKind, data: Option<Map<String, Value>>) -> Self {
        WorkerEvent::Connection {
            event: ConnectionEvent { kind, data },
        }
    }

    pub fn recognition(event: RecognitionEvent) -> Self {
        let format = event.format();
        WorkerEvent::Recognition { event, format }
    }

    pub fn audio_file(output: AudioFile) -> Self {
        WorkerEvent::AudioFile {
            module_response: true,
            output,
        }
    }

    pub fn error(name: &str, message: &str) -> Self {
        WorkerEvent::Error {
            error: ErrorInfo::new(name, message),
        }
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerEvent::ModuleState { .. } => "moduleState",
            WorkerEvent::Gate { .. } => "gate",
            WorkerEvent::Connection { .. } => "connection",
            WorkerEvent::Recognition { .. } => "recognition",
            WorkerEvent::AudioFile { .. } => "audioFile",
            WorkerEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_result_passthrough() {
        let mut result = ResultMessage::new("hello", true);
        result.extra.insert("confidence".into(), json!(0.8));

        let event = WorkerEvent::recognition(MessageFormat::Default.result_event(&result, 1));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "recognitionEvent": {"type": "result", "isFinal": true, "transcript": "hello", "confidence": 0.8},
                "eventFormat": "default"
            })
        );
    }

    #[test]
    fn test_web_speech_result_shape() {
        let result = ResultMessage::new("hello", false);
        let event = WorkerEvent::recognition(MessageFormat::WebSpeechApi.result_event(&result, 42));

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "recognitionEvent": {
                    "type": "result",
                    "resultIndex": 0,
                    "results": [{"isFinal": false, "0": {"transcript": "hello"}}],
                    "timeStamp": 42
                },
                "eventFormat": "webSpeechApi"
            })
        );
    }

    #[test]
    fn test_web_speech_empty_final_is_no_speech() {
        let result = ResultMessage::new("", true);
        let event = MessageFormat::WebSpeechApi.result_event(&result, 7);

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "error", "error": "no-speech", "message": "Final result was empty", "timeStamp": 7})
        );
    }

    #[test]
    fn test_web_speech_empty_partial_is_result() {
        let result = ResultMessage::new("", false);
        let event = MessageFormat::WebSpeechApi.result_event(&result, 7);
        assert!(matches!(event, RecognitionEvent::WebSpeech(WebSpeechEvent::Result { .. })));
    }

    #[test]
    fn test_web_speech_error_mapping() {
        let cases = [
            ("SocketConnectionError", "network"),
            ("Unauthorized", "service-not-allowed"),
            ("SocketMessageParserError", "unknown"),
            ("SomethingElse", "unknown"),
        ];
        for (name, expected) in cases {
            let event = MessageFormat::WebSpeechApi.error_event(&ErrorInfo::new(name, "msg"), 1);
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["error"], json!(expected), "mapping for {}", name);
            assert_eq!(value["message"], json!("msg"));
        }
    }

    #[test]
    fn test_default_error_shape() {
        let event = MessageFormat::Default.error_event(&ErrorInfo::new("Unauthorized", "bad token"), 1);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "error", "name": "Unauthorized", "message": "bad token"})
        );
    }

    #[test]
    fn test_module_and_connection_shapes() {
        assert_eq!(
            serde_json::to_value(WorkerEvent::terminated()).unwrap(),
            json!({"moduleState": 9})
        );

        let mut options = Map::new();
        options.insert("language".into(), json!("en-US"));
        assert_eq!(
            serde_json::to_value(WorkerEvent::connection(ConnectionEventKind::Ready, Some(options))).unwrap(),
            json!({"connectionEvent": {"type": "ready", "data": {"language": "en-US"}}})
        );
        assert_eq!(
            serde_json::to_value(WorkerEvent::connection(ConnectionEventKind::Closed, None)).unwrap(),
            json!({"connectionEvent": {"type": "closed"}})
        );
    }

    #[test]
    fn test_is_final() {
        let partial = ResultMessage::new("a", false);
        let last = ResultMessage::new("a b", true);
        for format in [MessageFormat::Default, MessageFormat::WebSpeechApi] {
            assert!(!format.result_event(&partial, 0).is_final());
            assert!(format.result_event(&last, 0).is_final());
            assert!(format.error_event(&ErrorInfo::new("X", "y"), 0).is_final());
        }
    }

    #[test]
    fn test_fake_result_has_code_and_msg_id() {
        let event = MessageFormat::Default.fake_result_event("End of ...", false, 1234);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["code"], json!(200));
        assert_eq!(value["msg_id"], json!(1234));
        assert_eq!(value["isFinal"], json!(false));
    }
}
