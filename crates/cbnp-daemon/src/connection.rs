/// WebSocket connection to the subscriber.
///
/// State machine:
///
/// ```text
///   Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
///        ▲                          │                  │
///        └──────────err─────────────┘                  │
///        └──────── send() error / close() ─────────────┘
/// ```
///
/// Lives on the worker thread only.  No retries here; reconnect cadence is
/// driven by the reconnect timer on the control thread.
use std::time::Duration;

use cbnp_proto::protocol::OutboundMessage;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::ConnectionError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct ConnectionManager {
    state: ConnectionState,
    socket: Option<Socket>,
    endpoint: Option<String>,
    connect_timeout: Duration,
    send_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(connect_timeout: Duration, send_timeout: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            socket: None,
            endpoint: None,
            connect_timeout,
            send_timeout,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Applies to the next write or close.
    pub fn set_send_timeout(&mut self, timeout: Duration) {
        self.send_timeout = timeout;
    }

    /// Open the socket.  Only valid from `Disconnected`.
    pub async fn connect(&mut self, endpoint: &str) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Disconnected {
            return Err(ConnectionError::AlreadyConnected);
        }

        self.state = ConnectionState::Connecting;
        info!("connection: connecting to {}", endpoint);

        let result =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(endpoint))
                .await;

        match result {
            Ok(Ok((socket, _response))) => {
                self.socket = Some(socket);
                self.endpoint = Some(endpoint.to_string());
                self.state = ConnectionState::Connected;
                info!("connection: connected to {}", endpoint);
                Ok(())
            }
            Ok(Err(e)) => {
                self.state = ConnectionState::Disconnected;
                let err = ConnectionError::from(e);
                warn!("connection: connect to {} failed: {}", endpoint, err);
                Err(err)
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                warn!(
                    "connection: connect to {} timed out after {:?}",
                    endpoint, self.connect_timeout
                );
                Err(ConnectionError::Timeout)
            }
        }
    }

    /// Write one message.  Any failure drops the socket: a partial write
    /// cannot be told apart from a dead peer at this layer.
    pub async fn send(&mut self, message: &OutboundMessage) -> Result<(), ConnectionError> {
        let socket = match (self.state, self.socket.as_mut()) {
            (ConnectionState::Connected, Some(socket)) => socket,
            _ => return Err(ConnectionError::NotConnected),
        };

        match write_message(socket, message, self.send_timeout).await {
            Ok(()) => {
                debug!("connection: sent {}", message.kind());
                Ok(())
            }
            Err(e) => {
                warn!("connection: send {} failed: {}", message.kind(), e);
                self.socket = None;
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Best-effort close.  Always ends `Disconnected`; never fails.
    pub async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let endpoint = self.endpoint.as_deref().unwrap_or("?");
            match tokio::time::timeout(self.send_timeout, socket.close(None)).await {
                Ok(Ok(())) => info!("connection: closed {}", endpoint),
                Ok(Err(e)) => debug!("connection: close error ignored: {}", e),
                Err(_) => debug!("connection: close timed out, dropping socket"),
            }
        }
        self.state = ConnectionState::Disconnected;
    }
}

async fn write_message(
    socket: &mut Socket,
    message: &OutboundMessage,
    timeout: Duration,
) -> Result<(), ConnectionError> {
    drain_incoming(socket)?;

    let text = message
        .encode()
        .map_err(|e| ConnectionError::Encode(e.to_string()))?;

    match tokio::time::timeout(timeout, socket.send(Message::Text(text.into()))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::from(e)),
        Err(_) => Err(ConnectionError::Timeout),
    }
}

/// Consume whatever the peer already sent without waiting for more.  The
/// channel is outbound only, so content is ignored; a close frame or end of
/// stream means the peer is gone.
fn drain_incoming(socket: &mut Socket) -> Result<(), ConnectionError> {
    while let Some(next) = socket.next().now_or_never() {
        match next {
            None => return Err(ConnectionError::Closed),
            Some(Ok(Message::Close(frame))) => {
                debug!("connection: peer sent close {:?}", frame);
                return Err(ConnectionError::Closed);
            }
            Some(Ok(other)) => debug!("connection: ignoring inbound frame ({} bytes)", other.len()),
            Some(Err(e)) => return Err(ConnectionError::from(e)),
        }
    }
    Ok(())
}
