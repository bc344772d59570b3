//! Recognition session state machine
//!
//! One `StreamingSession` owns at most one live connection. It does no I/O of
//! its own: the connector's task reports socket activity as envelopes, which
//! the owner feeds back through `handle_socket()`. Everything the session has
//! to say is queued as `SessionEvent`s and collected with `drain_events()`.
//!
//! ```text
//! Idle ─open─▶ Connecting ─Opened─▶ Open ─welcome sent─▶ Negotiating
//!                                                            │ welcome
//!                                                            ▼
//!  Closed ◀─Closed── Closing ◀─close()/error──────────────  Ready
//! ```

use std::collections::VecDeque;

use serde_json::{Map, Value};
use uuid::Uuid;

use super::protocol::{ClientMessage, ResultMessage, ServerMessage, MAX_MESSAGE_ID};
use super::server_info::ServerSettings;
use super::transport::{Connection, Connector, Frame, SocketEnvelope, SocketEvent, SocketSink};
use super::{ErrorInfo, StreamingError};

/// Lifecycle of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Negotiating,
    Ready,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Negotiating => "negotiating",
            SessionState::Ready => "ready",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

/// Notifications for the session owner, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Transport connected, welcome is on its way
    Opened,
    /// Handshake finished; carries the negotiated options
    Ready(Map<String, Value>),
    Result(ResultMessage),
    Error(ErrorInfo),
    Closed,
}

/// Connection parameters for a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub server_url: String,
    pub client_id: String,
    pub access_token: String,
    /// Engine options sent with `welcome`
    pub options: Map<String, Value>,
}

/// Derive the socket endpoint from a server URL
///
/// `http://host:port/` becomes `ws://host:port/socket`, `https` becomes `wss`.
pub fn socket_url_from(server_url: &str) -> String {
    let base = server_url.strip_suffix('/').unwrap_or(server_url);
    let base = match base.strip_prefix("http") {
        Some(rest) => format!("ws{}", rest),
        None => base.to_string(),
    };
    format!("{}/socket", base)
}

/// Requested options with the common defaults filled in
fn default_options(options: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = Map::new();
    merged.insert("samplerate".into(), Value::from(16000));
    merged.insert("continuous".into(), Value::from(false));
    merged.insert("language".into(), Value::from(""));
    merged.insert("task".into(), Value::from(""));
    merged.insert("model".into(), Value::from(""));
    for (key, value) in options {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

pub struct StreamingSession {
    state: SessionState,
    socket_url: String,
    client_id: String,
    access_token: String,
    requested_options: Map<String, Value>,
    active_options: Map<String, Value>,
    capabilities: ServerSettings,
    msg_id: u32,
    connector: Box<dyn Connector>,
    sink: SocketSink,
    connection: Option<Connection>,
    transport_opened: bool,
    events: VecDeque<SessionEvent>,
    auto_close_on_last_final: bool,
}

impl StreamingSession {
    pub fn new(config: SessionConfig, connector: Box<dyn Connector>, sink: SocketSink) -> Self {
        let requested_options = default_options(&config.options);
        Self {
            state: SessionState::Idle,
            socket_url: socket_url_from(&config.server_url),
            client_id: config.client_id,
            access_token: config.access_token,
            active_options: requested_options.clone(),
            requested_options,
            capabilities: ServerSettings::default(),
            msg_id: 0,
            connector,
            sink,
            connection: None,
            transport_opened: false,
            events: VecDeque::new(),
            auto_close_on_last_final: true,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn socket_url(&self) -> &str {
        &self.socket_url
    }

    /// Transport is open (Open, Negotiating or Ready)
    pub fn is_open(&self) -> bool {
        matches!(
            self.state,
            SessionState::Open | SessionState::Negotiating | SessionState::Ready
        )
    }

    /// Handshake done, audio may be streamed
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Options from the last welcome reply, or the requested ones before that
    pub fn active_options(&self) -> &Map<String, Value> {
        &self.active_options
    }

    pub fn requested_options(&self) -> &Map<String, Value> {
        &self.requested_options
    }

    /// Negotiated `continuous` flag
    pub fn is_continuous(&self) -> bool {
        self.active_options
            .get("continuous")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_auto_close_on_last_final(&mut self, enabled: bool) {
        self.auto_close_on_last_final = enabled;
    }

    pub fn capabilities(&self) -> &ServerSettings {
        &self.capabilities
    }

    /// Store capabilities learned from the server's `/settings`
    pub fn apply_server_settings(&mut self, settings: &ServerSettings) {
        self.capabilities = settings.clone();
    }

    /// Id of the current connection, if any
    pub fn connection_id(&self) -> Option<Uuid> {
        self.connection.as_ref().map(Connection::id)
    }

    /// Allocate the next message id (1..=999999, then back to 1)
    pub fn next_message_id(&mut self) -> u32 {
        self.msg_id = if self.msg_id >= MAX_MESSAGE_ID {
            1
        } else {
            self.msg_id + 1
        };
        self.msg_id
    }

    /// Take all queued events
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Start a new connection
    ///
    /// Reports `SocketConnectionError` if a connection is already underway or
    /// open. A connection that is still closing is abandoned.
    pub fn open(&mut self) -> bool {
        match self.state {
            SessionState::Connecting
            | SessionState::Open
            | SessionState::Negotiating
            | SessionState::Ready => {
                self.report(StreamingError::Connection(
                    "Connection was already OPEN".to_string(),
                ));
                return false;
            }
            SessionState::Closing => {
                log::debug!("StreamingSession: abandoning closing connection");
                if let Some(old) = self.connection.take() {
                    old.cancel();
                }
            }
            SessionState::Idle | SessionState::Closed => {}
        }

        let id = Uuid::new_v4();
        log::info!("StreamingSession: connecting to {} ({})", self.socket_url, id);
        self.transport_opened = false;
        self.active_options = self.requested_options.clone();
        self.connection = Some(self.connector.connect(&self.socket_url, id, self.sink.clone()));
        self.state = SessionState::Connecting;
        true
    }

    /// Ask the server to close, or cancel a pending connect
    ///
    /// Returns false if there was nothing to close.
    pub fn close(&mut self) -> bool {
        match self.state {
            SessionState::Open | SessionState::Negotiating | SessionState::Ready => {
                if let Some(conn) = &self.connection {
                    conn.send(Frame::Close);
                }
                self.state = SessionState::Closing;
                log::debug!("StreamingSession: closing");
                true
            }
            SessionState::Connecting => {
                if let Some(conn) = &self.connection {
                    conn.cancel();
                }
                self.state = SessionState::Closing;
                log::debug!("StreamingSession: connect cancelled");
                true
            }
            _ => false,
        }
    }

    /// Send one binary audio frame
    pub fn send_bytes(&mut self, bytes: Vec<u8>) -> bool {
        match self.open_connection() {
            Some(conn) => {
                log::trace!("StreamingSession: sending {} bytes", bytes.len());
                conn.send(Frame::Binary(bytes))
            }
            None => {
                self.report_closed_send();
                false
            }
        }
    }

    /// Signal end of input and request the final result
    pub fn send_audio_end(&mut self, byte_length: usize, buffer_or_time_limit: bool) -> bool {
        let msg_id = self.next_message_id();
        self.send_json(&ClientMessage::audio_end(byte_length, buffer_or_time_limit, msg_id))
    }

    fn send_welcome(&mut self) -> bool {
        let msg_id = self.next_message_id();
        let msg = ClientMessage::welcome(
            &self.requested_options,
            &self.client_id,
            &self.access_token,
            msg_id,
        );
        self.send_json(&msg)
    }

    fn send_json(&mut self, msg: &ClientMessage) -> bool {
        let text = match serde_json::to_string(msg) {
            Ok(text) => text,
            Err(e) => {
                log::error!("StreamingSession: failed to serialize {}: {}", msg.type_name(), e);
                return false;
            }
        };
        match self.open_connection() {
            Some(conn) => {
                log::debug!("StreamingSession: sending {}", msg.type_name());
                conn.send(Frame::Text(text))
            }
            None => {
                self.report_closed_send();
                false
            }
        }
    }

    fn open_connection(&self) -> Option<&Connection> {
        if self.is_open() {
            self.connection.as_ref()
        } else {
            None
        }
    }

    fn report_closed_send(&mut self) {
        self.report(StreamingError::Connection(
            "Connection is closed. Cannot send message.".to_string(),
        ));
    }

    fn report(&mut self, err: StreamingError) {
        log::warn!("StreamingSession: {}: {}", err.name(), err);
        self.events.push_back(SessionEvent::Error(ErrorInfo::from(&err)));
    }

    /// Report an error, then close no matter what state we are in
    fn fail(&mut self, err: StreamingError) {
        self.report(err);
        self.close();
    }

    /// Feed socket activity reported by the connector
    ///
    /// Envelopes from any connection other than the current one are ignored.
    pub fn handle_socket(&mut self, envelope: SocketEnvelope) {
        if self.connection_id() != Some(envelope.connection_id) {
            log::debug!(
                "StreamingSession: ignoring stale event from {}",
                envelope.connection_id
            );
            return;
        }

        match envelope.event {
            SocketEvent::Opened => {
                self.transport_opened = true;
                if self.state != SessionState::Connecting {
                    log::debug!("StreamingSession: opened while {}", self.state.as_str());
                    return;
                }
                log::info!("StreamingSession: connection open");
                self.state = SessionState::Open;
                self.events.push_back(SessionEvent::Opened);
                if self.send_welcome() {
                    self.state = SessionState::Negotiating;
                }
            }
            SocketEvent::Message(text) => self.handle_text(&text),
            SocketEvent::Failed(reason) => {
                let message = if self.transport_opened {
                    reason
                } else {
                    "Failed to connect".to_string()
                };
                self.fail(StreamingError::Connection(message));
            }
            SocketEvent::Closed => {
                log::info!("StreamingSession: connection closed");
                self.connection = None;
                self.transport_opened = false;
                self.state = SessionState::Closed;
                self.events.push_back(SessionEvent::Closed);
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        let msg = match ServerMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("StreamingSession: unparsable message: {}", e);
                self.fail(StreamingError::MessageParser(
                    "Message handler saw invalid JSON".to_string(),
                ));
                return;
            }
        };

        match msg {
            ServerMessage::Error(err) => {
                let details = serde_json::to_value(&err.extra).ok();
                self.fail(StreamingError::Server {
                    name: err.name.unwrap_or_else(|| "SocketMessageError".to_string()),
                    message: err.message.unwrap_or_else(|| "unknown".to_string()),
                    details,
                });
            }
            ServerMessage::Ping { msg_id } => {
                self.send_json(&ClientMessage::pong(msg_id));
            }
            ServerMessage::Welcome { info } => {
                if self.state != SessionState::Negotiating {
                    log::debug!("StreamingSession: welcome while {}, dropped", self.state.as_str());
                    return;
                }
                let options = info.and_then(|i| i.options).unwrap_or_default();
                log::info!("StreamingSession: ready");
                self.active_options = options.clone();
                self.state = SessionState::Ready;
                self.events.push_back(SessionEvent::Ready(options));
            }
            ServerMessage::Result(result) => {
                let close_after = result.is_final
                    && !self.is_continuous()
                    && self.auto_close_on_last_final;
                self.events.push_back(SessionEvent::Result(result));
                if close_after {
                    log::debug!("StreamingSession: final result, closing");
                    self.close();
                }
            }
            ServerMessage::Response => {}
            ServerMessage::Unknown => {
                log::debug!("StreamingSession: ignoring unknown message type");
            }
        }
    }
}

impl std::fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSession")
            .field("state", &self.state)
            .field("socket_url", &self.socket_url)
            .field("msg_id", &self.msg_id)
            .field("connection", &self.connection_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::transport::{ChannelConnector, PendingConnection};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Harness {
        session: StreamingSession,
        requests: mpsc::UnboundedReceiver<PendingConnection>,
    }

    impl Harness {
        fn new(options: Map<String, Value>) -> Self {
            let (connector, requests) = ChannelConnector::new();
            let sink: SocketSink = Arc::new(|_| {});
            let config = SessionConfig {
                server_url: "http://localhost:20741/".to_string(),
                client_id: "any".to_string(),
                access_token: "test1234".to_string(),
                options,
            };
            Self {
                session: StreamingSession::new(config, Box::new(connector), sink),
                requests,
            }
        }

        /// Open and drive the session to Ready
        fn ready(&mut self) -> PendingConnection {
            assert!(self.session.open());
            let mut conn = self.requests.try_recv().unwrap();
            self.session.handle_socket(conn.envelope(SocketEvent::Opened));
            self.session.handle_socket(conn.envelope(SocketEvent::Message(
                r#"{"type":"welcome","info":{"options":{"continuous":false}}}"#.into(),
            )));
            conn.drain_frames();
            self.session.drain_events();
            conn
        }
    }

    fn text_frames(frames: &[Frame]) -> Vec<Value> {
        frames
            .iter()
            .filter_map(|f| match f {
                Frame::Text(t) => Some(serde_json::from_str(t).unwrap()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_socket_url_derivation() {
        assert_eq!(socket_url_from("http://localhost:20741"), "ws://localhost:20741/socket");
        assert_eq!(socket_url_from("http://localhost:20741/"), "ws://localhost:20741/socket");
        assert_eq!(socket_url_from("https://example.org/stt"), "wss://example.org/stt/socket");
        assert_eq!(socket_url_from("ws://host"), "ws://host/socket");
    }

    #[test]
    fn test_handshake_sends_welcome_and_becomes_ready() {
        let mut options = Map::new();
        options.insert("language".into(), json!("de-DE"));
        let mut h = Harness::new(options);

        assert!(h.session.open());
        assert_eq!(h.session.state(), SessionState::Connecting);
        let mut conn = h.requests.try_recv().unwrap();
        assert_eq!(conn.url, "ws://localhost:20741/socket");

        h.session.handle_socket(conn.envelope(SocketEvent::Opened));
        assert_eq!(h.session.state(), SessionState::Negotiating);

        let sent = text_frames(&conn.drain_frames());
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "welcome");
        assert_eq!(sent[0]["client_id"], "any");
        assert_eq!(sent[0]["access_token"], "test1234");
        assert_eq!(sent[0]["msg_id"], 1);
        assert_eq!(sent[0]["data"]["language"], "de-DE");
        assert_eq!(sent[0]["data"]["samplerate"], 16000);

        h.session.handle_socket(conn.envelope(SocketEvent::Message(
            r#"{"type":"welcome","info":{"options":{"language":"de-DE","model":"small"}}}"#.into(),
        )));
        assert!(h.session.is_ready());
        assert_eq!(h.session.active_options().get("model"), Some(&json!("small")));

        let events = h.session.drain_events();
        assert_eq!(events[0], SessionEvent::Opened);
        assert!(matches!(&events[1], SessionEvent::Ready(opts) if opts.get("model") == Some(&json!("small"))));
    }

    #[test]
    fn test_open_twice_reports_error() {
        let mut h = Harness::new(Map::new());
        assert!(h.session.open());
        assert!(!h.session.open());

        let events = h.session.drain_events();
        assert_eq!(
            events,
            vec![SessionEvent::Error(ErrorInfo::new(
                "SocketConnectionError",
                "Connection was already OPEN"
            ))]
        );
    }

    #[test]
    fn test_ping_answered_with_pong() {
        let mut h = Harness::new(Map::new());
        let mut conn = h.ready();

        h.session.handle_socket(conn.envelope(SocketEvent::Message(
            r#"{"type":"ping","msg_id":"p-17"}"#.into(),
        )));
        let sent = text_frames(&conn.drain_frames());
        assert_eq!(sent, vec![json!({"type": "pong", "msg_id": "p-17"})]);
    }

    #[test]
    fn test_final_result_closes_non_continuous_session() {
        let mut h = Harness::new(Map::new());
        let mut conn = h.ready();

        h.session.handle_socket(conn.envelope(SocketEvent::Message(
            r#"{"type":"result","transcript":"hel","isFinal":false}"#.into(),
        )));
        assert!(h.session.is_ready());

        h.session.handle_socket(conn.envelope(SocketEvent::Message(
            r#"{"type":"result","transcript":"hello","isFinal":true}"#.into(),
        )));
        assert_eq!(h.session.state(), SessionState::Closing);
        assert_eq!(conn.drain_frames(), vec![Frame::Close]);

        let events = h.session.drain_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], SessionEvent::Result(r) if r.is_final && r.transcript == "hello"));
    }

    #[test]
    fn test_final_result_keeps_continuous_session_open() {
        let mut h = Harness::new(Map::new());
        assert!(h.session.open());
        let conn = h.requests.try_recv().unwrap();
        h.session.handle_socket(conn.envelope(SocketEvent::Opened));
        h.session.handle_socket(conn.envelope(SocketEvent::Message(
            r#"{"type":"welcome","info":{"options":{"continuous":true}}}"#.into(),
        )));
        h.session.handle_socket(conn.envelope(SocketEvent::Message(
            r#"{"type":"result","transcript":"one","isFinal":true}"#.into(),
        )));
        assert!(h.session.is_ready());
    }

    #[test]
    fn test_server_error_reported_then_closed() {
        let mut h = Harness::new(Map::new());
        let mut conn = h.ready();

        h.session.handle_socket(conn.envelope(SocketEvent::Message(
            r#"{"type":"error","name":"Unauthorized","message":"bad token","code":401}"#.into(),
        )));
        assert_eq!(h.session.state(), SessionState::Closing);
        assert_eq!(conn.drain_frames(), vec![Frame::Close]);

        let events = h.session.drain_events();
        match &events[0] {
            SessionEvent::Error(info) => {
                assert_eq!(info.name, "Unauthorized");
                assert_eq!(info.message, "bad token");
                assert_eq!(info.details.as_ref().unwrap()["code"], 401);
            }
            other => panic!("Expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_welcome_after_error_is_dropped() {
        let mut h = Harness::new(Map::new());
        assert!(h.session.open());
        let mut conn = h.requests.try_recv().unwrap();
        h.session.handle_socket(conn.envelope(SocketEvent::Opened));
        h.session.handle_socket(conn.envelope(SocketEvent::Message(
            r#"{"type":"error","name":"X","message":"boom"}"#.into(),
        )));
        h.session.handle_socket(conn.envelope(SocketEvent::Message(
            r#"{"type":"welcome","info":{"options":{"continuous":false}}}"#.into(),
        )));

        assert_eq!(h.session.state(), SessionState::Closing);
        let events = h.session.drain_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], SessionEvent::Opened);
        assert!(matches!(&events[1], SessionEvent::Error(e) if e.name == "X"));

        let sent = conn.drain_frames();
        assert_eq!(sent.last(), Some(&Frame::Close));
    }

    #[test]
    fn test_final_result_without_auto_close_stays_ready() {
        let mut h = Harness::new(Map::new());
        h.session.set_auto_close_on_last_final(false);
        let mut conn = h.ready();

        h.session.handle_socket(conn.envelope(SocketEvent::Message(
            r#"{"type":"result","transcript":"done","isFinal":true}"#.into(),
        )));
        assert!(h.session.is_ready());
        assert!(conn.drain_frames().is_empty());

        let events = h.session.drain_events();
        assert!(matches!(&events[0], SessionEvent::Result(r) if r.is_final));
    }

    #[test]
    fn test_invalid_json_is_parser_error() {
        let mut h = Harness::new(Map::new());
        let conn = h.ready();

        h.session
            .handle_socket(conn.envelope(SocketEvent::Message("{nope".into())));
        let events = h.session.drain_events();
        assert!(matches!(&events[0], SessionEvent::Error(e) if e.name == "SocketMessageParserError"));
        assert_eq!(h.session.state(), SessionState::Closing);
    }

    #[test]
    fn test_connect_failure_before_open() {
        let mut h = Harness::new(Map::new());
        h.session.open();
        let conn = h.requests.try_recv().unwrap();

        h.session
            .handle_socket(conn.envelope(SocketEvent::Failed("refused".into())));
        assert!(conn.cancel.is_cancelled());
        h.session.handle_socket(conn.envelope(SocketEvent::Closed));

        let events = h.session.drain_events();
        assert_eq!(
            events,
            vec![
                SessionEvent::Error(ErrorInfo::new("SocketConnectionError", "Failed to connect")),
                SessionEvent::Closed,
            ]
        );
        assert_eq!(h.session.state(), SessionState::Closed);
    }

    #[test]
    fn test_send_while_closed_reports_error() {
        let mut h = Harness::new(Map::new());
        assert!(!h.session.send_bytes(vec![1, 2, 3]));
        assert!(!h.session.send_audio_end(3, false));

        let events = h.session.drain_events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(
            e,
            SessionEvent::Error(info) if info.message == "Connection is closed. Cannot send message."
        )));
    }

    #[test]
    fn test_stale_connection_events_ignored() {
        let mut h = Harness::new(Map::new());
        let old = h.ready();
        h.session.close();
        h.session.handle_socket(old.envelope(SocketEvent::Closed));
        h.session.drain_events();

        assert!(h.session.open());
        let _new = h.requests.try_recv().unwrap();
        h.session.handle_socket(old.envelope(SocketEvent::Opened));
        h.session
            .handle_socket(old.envelope(SocketEvent::Message(r#"{"type":"welcome"}"#.into())));

        assert_eq!(h.session.state(), SessionState::Connecting);
        assert!(h.session.drain_events().is_empty());
    }

    #[test]
    fn test_reopen_performs_full_handshake() {
        let mut h = Harness::new(Map::new());
        let first = h.ready();
        h.session.close();
        h.session.handle_socket(first.envelope(SocketEvent::Closed));
        assert_eq!(h.session.state(), SessionState::Closed);

        assert!(h.session.open());
        let mut second = h.requests.try_recv().unwrap();
        assert_ne!(first.id, second.id);
        assert!(!h.session.is_ready());

        h.session.handle_socket(second.envelope(SocketEvent::Opened));
        let sent = text_frames(&second.drain_frames());
        assert_eq!(sent[0]["type"], "welcome");
        // counter carries over, nothing else does
        assert_eq!(sent[0]["msg_id"], 2);
    }

    #[test]
    fn test_message_id_wraps_to_one() {
        let mut h = Harness::new(Map::new());
        let mut last = 0;
        for _ in 0..MAX_MESSAGE_ID {
            last = h.session.next_message_id();
        }
        assert_eq!(last, 999_999);
        assert_eq!(h.session.next_message_id(), 1);
        assert_eq!(h.session.next_message_id(), 2);
    }

    #[test]
    fn test_close_when_idle_is_noop() {
        let mut h = Harness::new(Map::new());
        assert!(!h.session.close());
        assert_eq!(h.session.state(), SessionState::Idle);
    }

    #[test]
    fn test_apply_server_settings() {
        let mut h = Harness::new(Map::new());
        let settings = ServerSettings {
            engine: "vosk".into(),
            languages: vec!["en-US".into()],
            ..Default::default()
        };
        h.session.apply_server_settings(&settings);
        assert_eq!(h.session.capabilities().engine, "vosk");
    }
}
