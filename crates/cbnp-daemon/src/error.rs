use std::time::Duration;
use thiserror::Error;

/// Media source adapter failures.  All of them mean "nothing to publish this
/// tick"; none of them touch the connection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("no track playing")]
    NoTrack,
    #[error("media source timed out after {0:?}")]
    Timeout(Duration),
    #[error("media source failed: {0}")]
    Failed(String),
    #[error("media source returned {got} fields, expected {expected}")]
    Parse { expected: usize, got: usize },
}

/// Connection Manager failures.  Every one of these leaves the manager in
/// `Disconnected` (except `AlreadyConnected`, which leaves state untouched).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("connection timed out")]
    Timeout,
    #[error("connection closed")]
    Closed,
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("not connected")]
    NotConnected,
    #[error("already connected")]
    AlreadyConnected,
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Failures of the control-thread → worker bridge itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandoffError {
    #[error("worker did not answer within {0:?}")]
    Timeout(Duration),
    #[error("worker queue is full")]
    Busy,
    #[error("worker is gone")]
    WorkerGone,
}

/// Anything that can come back from a handoff request.  Both arms are
/// handled as connection loss by the pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Handoff(#[from] HandoffError),
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectionError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use std::io::ErrorKind;
        use tokio_tungstenite::tungstenite::Error as WsError;

        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => ConnectionError::Closed,
            WsError::Io(io) => match io.kind() {
                ErrorKind::ConnectionRefused => ConnectionError::Refused(io.to_string()),
                ErrorKind::TimedOut => ConnectionError::Timeout,
                ErrorKind::BrokenPipe
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::UnexpectedEof
                | ErrorKind::NotConnected => ConnectionError::Closed,
                _ => ConnectionError::Transport(io.to_string()),
            },
            WsError::Url(url) => ConnectionError::InvalidEndpoint(url.to_string()),
            other => ConnectionError::Transport(other.to_string()),
        }
    }
}
