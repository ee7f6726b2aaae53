//! TCP sessions.
//!
//! One [`TcpSession`] per host, reused while its connection is alive. A
//! session owns a bounded write queue drained by a background task:
//!
//! ```text
//! write() --try_send--> [queue] --> writer loop --frame--> socket
//!                                                            |
//! LockHolder::deliver <-- reader loop <--frame---------------+
//! ```
//!
//! The writer finishes each request's [`WriteTicket`]; the reader hands every
//! response to the [`LockHolder`]. Any I/O error closes the session and the
//! next [`get_session`](SessionProvider::get_session) opens a fresh one.

use parking_lot::Mutex;
use relayrpc_common::transport::{JsonCodec, TcpTransportAsync, MAX_MESSAGE_SIZE};
use relayrpc_common::{Host, RelayError, Request, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::health::HostChecker;
use crate::lock_holder::LockHolder;
use crate::session::{Connection, SessionProvider, WriteTicket};

type Queued = (Arc<Request>, WriteTicket);

/// [`SessionProvider`] over plain TCP connections.
pub struct TcpSessionProvider {
    runtime: Handle,
    holder: Arc<LockHolder>,
    checker: Option<Arc<HostChecker>>,
    config: SessionConfig,
    sessions: Mutex<HashMap<Host, Arc<TcpSession>>>,
}

impl TcpSessionProvider {
    /// Creates a provider whose sessions run on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// `Transport` when called outside a runtime.
    pub fn new(
        holder: Arc<LockHolder>,
        checker: Option<Arc<HostChecker>>,
        config: SessionConfig,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| RelayError::Transport(format!("No tokio runtime: {}", e)))?;
        Ok(Self {
            runtime,
            holder,
            checker,
            config,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Number of sessions currently held, open or not.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Drops the session to `host`; its task stops once the queue drains.
    pub fn close(&self, host: &Host) -> bool {
        self.sessions.lock().remove(host).is_some()
    }

    fn open(&self, host: &Host) -> Arc<TcpSession> {
        let (queue, receiver) = mpsc::channel(self.config.write_queue_capacity.max(1));
        let session = Arc::new(TcpSession {
            host: host.clone(),
            queue,
        });

        let worker = SessionWorker {
            host: host.clone(),
            receiver,
            holder: self.holder.clone(),
            checker: self.checker.clone(),
            connect_timeout: Duration::from_millis(self.config.connect_timeout_ms),
        };
        self.runtime.spawn(worker.run());

        debug!(host = %host, "Opened session");
        session
    }
}

impl SessionProvider for TcpSessionProvider {
    fn get_session(&self, host: &Host) -> Result<Arc<dyn Connection>> {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(host) {
            if !session.is_closed() {
                return Ok(session.clone());
            }
            debug!(host = %host, "Replacing closed session");
        }

        let session = self.open(host);
        sessions.insert(host.clone(), session.clone());
        Ok(session)
    }
}

/// Write side of one connection.
pub struct TcpSession {
    host: Host,
    queue: mpsc::Sender<Queued>,
}

impl TcpSession {
    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

impl Connection for TcpSession {
    fn write(&self, request: Arc<Request>) -> Option<WriteTicket> {
        let ticket = WriteTicket::new();
        match self.queue.try_send((request, ticket.clone())) {
            Ok(()) => Some(ticket),
            Err(mpsc::error::TrySendError::Full((request, _))) => {
                warn!(host = %self.host, request_id = request.id, "Write queue full");
                None
            }
            Err(mpsc::error::TrySendError::Closed((request, _))) => {
                debug!(host = %self.host, request_id = request.id, "Session closed");
                None
            }
        }
    }
}

struct SessionWorker {
    host: Host,
    receiver: mpsc::Receiver<Queued>,
    holder: Arc<LockHolder>,
    checker: Option<Arc<HostChecker>>,
    connect_timeout: Duration,
}

impl SessionWorker {
    async fn run(mut self) {
        let stream = match TcpTransportAsync::connect(&self.host.addr(), self.connect_timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(host = %self.host, error = %e, "Connect failed");
                if let Some(checker) = &self.checker {
                    checker.mark_down(&self.host, e.to_string());
                }
                self.deny_queued(format!("{} can not connect: {}", self.host, e));
                return;
            }
        };
        info!(host = %self.host, "Connected");

        let (reader, writer) = stream.into_split();
        let mut read_task = tokio::spawn(read_loop(self.host.clone(), reader, self.holder.clone()));

        let reason = tokio::select! {
            reason = self.write_loop(writer) => reason,
            _ = &mut read_task => "connection closed".to_string(),
        };
        read_task.abort();

        debug!(host = %self.host, reason = %reason, "Session closed");
        self.deny_queued(reason);
    }

    /// Writes queued requests until the socket fails or the session is dropped.
    async fn write_loop(&mut self, mut writer: OwnedWriteHalf) -> String {
        while let Some((request, ticket)) = self.receiver.recv().await {
            let frame = match JsonCodec::encode_request(&request) {
                Ok(frame) => frame,
                Err(e) => {
                    ticket.finish(Err(format!("encode failed: {}", e)));
                    continue;
                }
            };
            if frame.len() > MAX_MESSAGE_SIZE {
                ticket.finish(Err(format!("request too large: {} bytes", frame.len())));
                continue;
            }

            match TcpTransportAsync::send_message(&mut writer, &frame).await {
                Ok(()) => {
                    ticket.finish(Ok(()));
                }
                Err(e) => {
                    ticket.finish(Err(e.to_string()));
                    return format!("write failed: {}", e);
                }
            }
        }
        "session dropped".to_string()
    }

    /// Closes the queue and fails everything still waiting in it.
    fn deny_queued(&mut self, reason: String) {
        self.receiver.close();
        let mut denied = 0;
        while let Ok((_, ticket)) = self.receiver.try_recv() {
            ticket.finish(Err(reason.clone()));
            denied += 1;
        }
        if denied > 0 {
            debug!(host = %self.host, denied = denied, "Denied queued writes");
        }
    }
}

async fn read_loop(host: Host, mut reader: OwnedReadHalf, holder: Arc<LockHolder>) {
    loop {
        match TcpTransportAsync::receive_message(&mut reader).await {
            Ok(Some(frame)) => match JsonCodec::decode_response(&frame) {
                Ok(response) => {
                    holder.deliver(response);
                }
                Err(e) => {
                    warn!(host = %host, error = %e, "Dropping undecodable response");
                }
            },
            Ok(None) => {
                debug!(host = %host, "Peer closed connection");
                return;
            }
            Err(e) => {
                warn!(host = %host, error = %e, "Read failed");
                return;
            }
        }
    }
}
