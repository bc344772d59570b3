//! Socket transport
//!
//! A `Connector` opens one connection per session attempt. Incoming socket
//! activity is delivered as `SocketEnvelope`s through a sink, tagged with the
//! connection id so that events from an abandoned connection can be told
//! apart from the current one. Outgoing frames go through an unbounded queue
//! owned by the connection task; dropping or cancelling a connection abandons
//! whatever is still queued.
//!
//! # Connection Flow
//!
//! ```text
//! Connector::connect ──▶ spawn task ──▶ connect_async
//!                                          │
//!              SocketEvent::Opened ◀───────┤
//!              SocketEvent::Message ◀──── read half
//!              Frame::{Text,Binary,Close} ──▶ write half
//!              SocketEvent::Closed ◀── end of task
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Connection timeout for the initial WebSocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the server's close acknowledgement
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Outgoing frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Incoming socket activity
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// Transport-level connect succeeded
    Opened,
    /// A text frame
    Message(String),
    /// Transport failure (connect or mid-session)
    Failed(String),
    /// The connection is gone; always the last event of a connection
    Closed,
}

/// A socket event tagged with its connection
#[derive(Debug, Clone, PartialEq)]
pub struct SocketEnvelope {
    pub connection_id: Uuid,
    pub event: SocketEvent,
}

/// Where connection tasks deliver their events
pub type SocketSink = Arc<dyn Fn(SocketEnvelope) + Send + Sync>;

/// Handle to one connection attempt
#[derive(Debug)]
pub struct Connection {
    id: Uuid,
    outbound: mpsc::UnboundedSender<Frame>,
    cancel: CancellationToken,
}

impl Connection {
    pub fn new(id: Uuid, outbound: mpsc::UnboundedSender<Frame>, cancel: CancellationToken) -> Self {
        Self {
            id,
            outbound,
            cancel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a frame; false if the connection task is gone
    pub fn send(&self, frame: Frame) -> bool {
        self.outbound.send(frame).is_ok()
    }

    /// Abandon the connection without a close handshake
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Ensure the task stops if the session forgets the connection
        self.cancel.cancel();
    }
}

/// Opens connections for a `StreamingSession`
pub trait Connector: Send + 'static {
    fn connect(&self, url: &str, connection_id: Uuid, sink: SocketSink) -> Connection;
}

// ============================================================================
// WebSocket connector (tokio-tungstenite)
// ============================================================================

/// Real WebSocket transport
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &str, connection_id: Uuid, sink: SocketSink) -> Connection {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(run_connection(
                    url.to_string(),
                    connection_id,
                    sink,
                    rx,
                    cancel.clone(),
                ));
            }
            Err(e) => {
                log::error!("WsConnector: no tokio runtime available: {}", e);
                let deliver = |event| {
                    sink(SocketEnvelope {
                        connection_id,
                        event,
                    })
                };
                deliver(SocketEvent::Failed(format!("no async runtime: {}", e)));
                deliver(SocketEvent::Closed);
            }
        }

        Connection::new(connection_id, tx, cancel)
    }
}

/// Connection task: connect, then pump frames both ways until closed
async fn run_connection(
    url: String,
    connection_id: Uuid,
    sink: SocketSink,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    cancel: CancellationToken,
) {
    let deliver = |event| {
        sink(SocketEnvelope {
            connection_id,
            event,
        })
    };

    log::info!("WsConnector: connecting to {}", url);

    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            log::debug!("WsConnector: connect cancelled");
            deliver(SocketEvent::Closed);
            return;
        }
        result = timeout(CONNECTION_TIMEOUT, connect_async(url.as_str())) => result,
    };

    let ws_stream = match connected {
        Ok(Ok((ws_stream, _response))) => ws_stream,
        Ok(Err(e)) => {
            log::warn!("WsConnector: connection failed: {}", e);
            deliver(SocketEvent::Failed(e.to_string()));
            deliver(SocketEvent::Closed);
            return;
        }
        Err(_) => {
            log::warn!("WsConnector: connection timeout");
            deliver(SocketEvent::Failed("Connection timeout".to_string()));
            deliver(SocketEvent::Closed);
            return;
        }
    };

    log::info!("WsConnector: connected ({})", connection_id);
    deliver(SocketEvent::Opened);

    let (mut write, mut read) = ws_stream.split();
    let mut closing = false;
    let close_deadline = tokio::time::sleep(Duration::from_secs(86_400));
    tokio::pin!(close_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::debug!("WsConnector: connection cancelled");
                let _ = write.close().await;
                break;
            }
            frame = outbound.recv(), if !closing => {
                let result = match frame {
                    Some(Frame::Text(text)) => write.send(Message::Text(text)).await,
                    Some(Frame::Binary(bytes)) => write.send(Message::Binary(bytes)).await,
                    Some(Frame::Close) | None => {
                        closing = true;
                        close_deadline
                            .as_mut()
                            .reset(tokio::time::Instant::now() + CLOSE_TIMEOUT);
                        write.close().await
                    }
                };
                if let Err(e) = result {
                    if closing {
                        log::debug!("WsConnector: close handshake failed: {}", e);
                        break;
                    }
                    log::warn!("WsConnector: send failed: {}", e);
                    deliver(SocketEvent::Failed(e.to_string()));
                    break;
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => deliver(SocketEvent::Message(text)),
                Some(Ok(Message::Close(_))) | None => {
                    log::info!("WsConnector: connection closed");
                    break;
                }
                Some(Ok(_)) => {} // Ignore ping/pong/binary
                Some(Err(e)) => {
                    if !closing {
                        log::warn!("WsConnector: socket error: {}", e);
                        deliver(SocketEvent::Failed(e.to_string()));
                    }
                    break;
                }
            },
            _ = &mut close_deadline, if closing => {
                log::debug!("WsConnector: no close acknowledgement, dropping connection");
                break;
            }
        }
    }

    deliver(SocketEvent::Closed);
}

// ============================================================================
// In-process connector
// ============================================================================

/// A connection request captured by `ChannelConnector`
pub struct PendingConnection {
    pub id: Uuid,
    pub url: String,
    /// Frames the session queued for this connection
    pub frames: mpsc::UnboundedReceiver<Frame>,
    /// Cancelled when the session abandons the connection
    pub cancel: CancellationToken,
    sink: SocketSink,
}

impl PendingConnection {
    /// Deliver a socket event as if it came from the network
    pub fn deliver(&self, event: SocketEvent) {
        (self.sink)(SocketEnvelope {
            connection_id: self.id,
            event,
        });
    }

    /// Build the envelope for an event without delivering it
    pub fn envelope(&self, event: SocketEvent) -> SocketEnvelope {
        SocketEnvelope {
            connection_id: self.id,
            event,
        }
    }

    /// All frames queued so far
    pub fn drain_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

impl std::fmt::Debug for PendingConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingConnection")
            .field("id", &self.id)
            .field("url", &self.url)
            .finish()
    }
}

/// Transport that hands every connection to the caller instead of the network
///
/// Useful for embedding the pipeline behind another transport and for driving
/// the protocol in tests.
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    requests: mpsc::UnboundedSender<PendingConnection>,
}

impl ChannelConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingConnection>) {
        let (requests, rx) = mpsc::unbounded_channel();
        (Self { requests }, rx)
    }
}

impl Connector for ChannelConnector {
    fn connect(&self, url: &str, connection_id: Uuid, sink: SocketSink) -> Connection {
        let (tx, frames) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let pending = PendingConnection {
            id: connection_id,
            url: url.to_string(),
            frames,
            cancel: cancel.clone(),
            sink,
        };
        if self.requests.send(pending).is_err() {
            log::warn!("ChannelConnector: nobody is accepting connections");
        }
        Connection::new(connection_id, tx, cancel)
    }
}
