/// Connection worker and the control-thread handoff.
///
/// ```text
///   control thread                         worker thread (current-thread runtime)
///   ──────────────                         ─────────────────────────────────────
///   Handoff::request(op, timeout) ──Job──▶ WorkerCore::run
///        │  blocks on reply (bounded)           └── ConnectionManager (sole owner)
///        ◀──────────── reply ────────────────────┘
///   Handoff::post(op)             ──Job──▶ (no reply)
/// ```
///
/// Jobs run one at a time in submission order.  A caller that gives up
/// waiting does not cancel its job; the late reply is dropped.
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::{Duration, Instant};

use cbnp_proto::protocol::OutboundMessage;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::{ConnectionError, HandoffError, RelayError};

/// Jobs beyond this are refused with `HandoffError::Busy` instead of
/// blocking the control thread.
const QUEUE_DEPTH: usize = 32;

// ── operations ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Connect { endpoint: String },
    Publish(OutboundMessage),
    Close,
    /// Bound for later frame writes and close handshakes.
    SetSendTimeout(Duration),
    /// Report the current state without touching the socket.
    Probe,
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Connect { .. } => "connect",
            Operation::Publish(msg) => msg.kind(),
            Operation::Close => "close",
            Operation::SetSendTimeout(_) => "set-send-timeout",
            Operation::Probe => "probe",
        }
    }
}

type Reply = Result<ConnectionState, ConnectionError>;

struct Job {
    op: Operation,
    reply: Option<std_mpsc::SyncSender<Reply>>,
}

enum WorkerEvent {
    Job(Job),
    Shutdown,
}

// ── handoff ───────────────────────────────────────────────────────────────────

/// How the control thread reaches the connection.
pub trait ConnectionPort {
    /// Submit `op` and block until the worker answers or `timeout` elapses.
    fn request(&self, op: Operation, timeout: Duration) -> Result<ConnectionState, RelayError>;

    /// Submit `op` without waiting for it.
    fn post(&self, op: Operation);
}

/// Cloneable sender side of the worker queue.
#[derive(Clone)]
pub struct Handoff {
    tx: mpsc::Sender<WorkerEvent>,
}

impl Handoff {
    fn enqueue(&self, event: WorkerEvent) -> Result<(), HandoffError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HandoffError::Busy,
            mpsc::error::TrySendError::Closed(_) => HandoffError::WorkerGone,
        })
    }
}

impl ConnectionPort for Handoff {
    fn request(&self, op: Operation, timeout: Duration) -> Result<ConnectionState, RelayError> {
        let name = op.name();
        let (reply_tx, reply_rx) = std_mpsc::sync_channel(1);
        self.enqueue(WorkerEvent::Job(Job {
            op,
            reply: Some(reply_tx),
        }))?;

        match reply_rx.recv_timeout(timeout) {
            Ok(reply) => Ok(reply?),
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                warn!("handoff: {} not answered within {:?}", name, timeout);
                Err(HandoffError::Timeout(timeout).into())
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Err(HandoffError::WorkerGone.into()),
        }
    }

    fn post(&self, op: Operation) {
        let name = op.name();
        if let Err(e) = self.enqueue(WorkerEvent::Job(Job { op, reply: None })) {
            warn!("handoff: failed to post {}: {}", name, e);
        }
    }
}

// ── worker ────────────────────────────────────────────────────────────────────

/// Owns the worker thread.
pub struct Worker {
    handoff: Handoff,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(connect_timeout: Duration, send_timeout: Duration) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let thread = thread::Builder::new()
            .name("cbnp-worker".to_string())
            .spawn(move || {
                let core = WorkerCore {
                    connection: ConnectionManager::new(connect_timeout, send_timeout),
                };
                runtime.block_on(core.run(rx));
            })?;

        Ok(Self {
            handoff: Handoff { tx },
            thread: Some(thread),
        })
    }

    pub fn handoff(&self) -> Handoff {
        self.handoff.clone()
    }

    /// Close the connection, stop the loop, and wait up to `grace` for the
    /// thread.  Failures are logged; shutdown itself never fails.
    pub fn shutdown(mut self, grace: Duration) {
        match self.handoff.request(Operation::Close, grace) {
            Ok(state) => debug!("worker: closed for shutdown ({:?})", state),
            Err(e) => warn!("worker: close during shutdown failed: {}", e),
        }
        if let Err(e) = self.handoff.enqueue(WorkerEvent::Shutdown) {
            warn!("worker: failed to signal shutdown: {}", e);
        }

        let Some(thread) = self.thread.take() else {
            return;
        };
        let deadline = Instant::now() + grace;
        while !thread.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if thread.is_finished() {
            if thread.join().is_err() {
                error!("worker: thread panicked");
            } else {
                info!("worker: stopped");
            }
        } else {
            warn!("worker: still busy after {:?}, leaving it behind", grace);
        }
    }
}

// ── event loop ────────────────────────────────────────────────────────────────

struct WorkerCore {
    connection: ConnectionManager,
}

impl WorkerCore {
    async fn run(mut self, mut rx: mpsc::Receiver<WorkerEvent>) {
        info!("worker: starting event loop");

        loop {
            match rx.recv().await {
                None => {
                    info!("worker: queue closed, shutting down");
                    break;
                }
                Some(WorkerEvent::Shutdown) => {
                    info!("worker: shutdown requested");
                    break;
                }
                Some(WorkerEvent::Job(job)) => {
                    let name = job.op.name();
                    let result = self.execute(job.op).await;
                    if let Some(reply) = job.reply {
                        if reply.send(result).is_err() {
                            debug!("worker: {} finished after caller gave up", name);
                        }
                    }
                }
            }
        }

        self.connection.close().await;
    }

    async fn execute(&mut self, op: Operation) -> Reply {
        match op {
            Operation::Connect { endpoint } => {
                self.connection.connect(&endpoint).await?;
            }
            Operation::Publish(message) => {
                self.connection.send(&message).await?;
            }
            Operation::Close => {
                self.connection.close().await;
            }
            Operation::SetSendTimeout(timeout) => {
                self.connection.set_send_timeout(timeout);
                debug!("worker: send timeout now {:?}", self.connection.send_timeout());
            }
            Operation::Probe => {}
        }
        Ok(self.connection.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::collector_thread;

    const WAIT: Duration = Duration::from_secs(3);

    #[test]
    fn test_connect_publish_close_through_handoff() {
        let (endpoint, frames) = collector_thread();
        let worker = Worker::spawn(Duration::from_secs(2), Duration::from_secs(2)).unwrap();
        let handoff = worker.handoff();

        assert_eq!(
            handoff.request(Operation::Probe, WAIT).unwrap(),
            ConnectionState::Disconnected
        );
        assert_eq!(
            handoff.request(Operation::Connect { endpoint }, WAIT).unwrap(),
            ConnectionState::Connected
        );
        assert_eq!(
            handoff
                .request(Operation::Publish(OutboundMessage::heartbeat()), WAIT)
                .unwrap(),
            ConnectionState::Connected
        );
        assert_eq!(frames.recv_timeout(WAIT).unwrap(), r#"{"type":"heartbeat"}"#);
        assert_eq!(
            handoff.request(Operation::Close, WAIT).unwrap(),
            ConnectionState::Disconnected
        );

        worker.shutdown(WAIT);
    }

    #[test]
    fn test_send_timeout_changes_keep_connection() {
        let (endpoint, frames) = collector_thread();
        let worker = Worker::spawn(Duration::from_secs(2), Duration::from_secs(2)).unwrap();
        let handoff = worker.handoff();

        handoff.request(Operation::Connect { endpoint }, WAIT).unwrap();
        assert_eq!(
            handoff
                .request(Operation::SetSendTimeout(Duration::from_secs(7)), WAIT)
                .unwrap(),
            ConnectionState::Connected
        );
        handoff
            .request(Operation::Publish(OutboundMessage::heartbeat()), WAIT)
            .unwrap();
        assert_eq!(frames.recv_timeout(WAIT).unwrap(), r#"{"type":"heartbeat"}"#);

        worker.shutdown(WAIT);
    }

    #[test]
    fn test_publish_while_disconnected_is_refused() {
        let worker = Worker::spawn(Duration::from_secs(1), Duration::from_secs(1)).unwrap();
        let err = worker
            .handoff()
            .request(Operation::Publish(OutboundMessage::heartbeat()), WAIT)
            .unwrap_err();
        assert_eq!(err, RelayError::Connection(ConnectionError::NotConnected));
        worker.shutdown(WAIT);
    }

    #[test]
    fn test_slow_job_times_out_and_later_jobs_still_run_in_order() {
        // listener that never completes the WebSocket handshake
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("ws://{}", silent.local_addr().unwrap());

        let worker = Worker::spawn(Duration::from_millis(600), Duration::from_secs(1)).unwrap();
        let handoff = worker.handoff();

        let err = handoff
            .request(Operation::Connect { endpoint }, Duration::from_millis(100))
            .unwrap_err();
        assert_eq!(
            err,
            RelayError::Handoff(HandoffError::Timeout(Duration::from_millis(100)))
        );

        // queued behind the stalled connect; answered once it gives up
        handoff.post(Operation::Close);
        assert_eq!(
            handoff.request(Operation::Probe, WAIT).unwrap(),
            ConnectionState::Disconnected
        );

        worker.shutdown(WAIT);
        drop(silent);
    }

    #[test]
    fn test_requests_after_shutdown_report_worker_gone() {
        let worker = Worker::spawn(Duration::from_secs(1), Duration::from_secs(1)).unwrap();
        let handoff = worker.handoff();
        worker.shutdown(WAIT);

        let err = handoff.request(Operation::Probe, WAIT).unwrap_err();
        assert_eq!(err, RelayError::Handoff(HandoffError::WorkerGone));
    }
}
