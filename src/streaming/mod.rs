//! Streaming to the recognition server
//!
//! This module turns gated audio into a single WebSocket session per gate
//! cycle: WAVE chunks go out as binary frames, control messages as JSON text,
//! and results come back as session events.
//!
//! # Architecture
//!
//! ```text
//! Samples ──▶ CaptureAccumulator (header, lookback, blocks)
//!                     │ unsent suffix
//!                     ▼
//!             StreamingSession ──▶ Connector (WebSocket task)
//!                     │                   │
//!                     ▼                   ▼
//!               SessionEvent ◀──── SocketEnvelope
//! ```
//!
//! # Failure Policy
//!
//! - Any server `error`, unparsable message or transport failure is reported
//!   once and then the session is closed
//! - There is no reconnect-with-resume; every open is a fresh negotiation

mod accumulator;
pub mod protocol;
pub mod server_info;
mod session;
pub mod transport;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use accumulator::{CaptureAccumulator, Chunk, ChunkKind};
pub use protocol::{ClientMessage, ResultMessage, ServerMessage, MAX_MESSAGE_ID};
pub use server_info::{MetadataError, ServerInfoClient, ServerSettings};
pub use session::{socket_url_from, SessionConfig, SessionEvent, SessionState, StreamingSession};
pub use transport::{
    ChannelConnector, Connection, Connector, Frame, PendingConnection, SocketEnvelope,
    SocketEvent, SocketSink, WsConnector,
};

/// Errors raised by the streaming session
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamingError {
    /// Transport never opened, dropped, or is not open for sending
    #[error("{0}")]
    Connection(String),
    /// A text frame that is not a valid server message
    #[error("{0}")]
    MessageParser(String),
    /// Error reported by the server itself
    #[error("{message}")]
    Server {
        name: String,
        message: String,
        details: Option<Value>,
    },
}

impl StreamingError {
    /// Name used in outbound `{name, message}` objects
    pub fn name(&self) -> &str {
        match self {
            StreamingError::Connection(_) => "SocketConnectionError",
            StreamingError::MessageParser(_) => "SocketMessageParserError",
            StreamingError::Server { name, .. } => name,
        }
    }
}

/// Normalized `{name, message}` error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorInfo {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
            details: None,
        }
    }
}

impl From<&StreamingError> for ErrorInfo {
    fn from(err: &StreamingError) -> Self {
        let details = match err {
            StreamingError::Server { details, .. } => details.clone(),
            _ => None,
        };
        Self {
            name: err.name().to_string(),
            message: err.to_string(),
            details,
        }
    }
}
