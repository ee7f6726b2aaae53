use relayrpc_common::{Host, Outcome, Request, RequestId};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::completion::Completion;
use crate::session::WriteStatus;

/// Completion callback supplied by the caller.
pub type Callback = Box<dyn FnOnce(Outcome) + Send + 'static>;

/// One in-flight call.
///
/// The locker is the only thing that delivers a call's outcome. Whoever
/// completes it first decides the outcome; every later attempt is ignored,
/// so the callback and all waiters observe exactly one value.
pub struct RpcLocker {
    request: Arc<Request>,
    host: OnceLock<Host>,
    created_at: Instant,
    sent_at: OnceLock<Instant>,
    completion: Completion<Outcome>,
}

impl RpcLocker {
    pub fn new(request: Arc<Request>, callback: Option<Callback>) -> Self {
        let completion = Completion::new();
        if let Some(callback) = callback {
            completion.on_complete(callback);
        }
        Self {
            request,
            host: OnceLock::new(),
            created_at: Instant::now(),
            sent_at: OnceLock::new(),
            completion,
        }
    }

    pub fn id(&self) -> RequestId {
        self.request.id
    }

    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    pub fn api(&self) -> &str {
        &self.request.api
    }

    /// Records the resolved destination. Only the first host sticks.
    pub fn set_host(&self, host: Host) {
        let _ = self.host.set(host);
    }

    pub fn host(&self) -> Option<&Host> {
        self.host.get()
    }

    /// Time since the locker was created.
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Delivers `outcome` unless the call already has one.
    ///
    /// Returns `true` if this call decided the outcome.
    pub fn complete(&self, outcome: Outcome) -> bool {
        let delivered = self.completion.complete(outcome);
        if delivered {
            debug!(
                request_id = self.id(),
                api = %self.api(),
                elapsed_ms = self.elapsed().as_millis() as u64,
                "Call completed"
            );
        } else {
            trace!(request_id = self.id(), "Ignoring repeated completion");
        }
        delivered
    }

    /// Transport callback for the local write.
    ///
    /// A successful write only records when the request left; the call keeps
    /// waiting for its response. Failed writes are handled by the dispatch
    /// path, which owns the registration.
    pub fn on_written(&self, status: &WriteStatus) {
        match status {
            Ok(()) => {
                let _ = self.sent_at.set(Instant::now());
                trace!(
                    request_id = self.id(),
                    write_ms = self.elapsed().as_millis() as u64,
                    "Request written"
                );
            }
            Err(reason) => {
                debug!(request_id = self.id(), reason = %reason, "Request write failed");
            }
        }
    }

    /// When the request was handed to the socket, if it was.
    pub fn sent_at(&self) -> Option<Instant> {
        self.sent_at.get().copied()
    }

    pub fn is_done(&self) -> bool {
        self.completion.is_complete()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.completion.get()
    }

    pub fn on_complete<F>(&self, listener: F)
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.completion.on_complete(listener);
    }

    pub async fn wait(&self) -> Outcome {
        self.completion.wait().await
    }

    pub fn wait_blocking(&self, timeout: Option<Duration>) -> Option<Outcome> {
        self.completion.wait_blocking(timeout)
    }
}

impl std::fmt::Debug for RpcLocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcLocker")
            .field("id", &self.id())
            .field("api", &self.api())
            .field("host", &self.host())
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayrpc_common::{Params, RpcCode};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> Arc<Request> {
        Arc::new(Request::new("test.api", Params::Json("{}".into())))
    }

    #[test]
    fn test_callback_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let locker = RpcLocker::new(
            request(),
            Some(Box::new(move |outcome| {
                assert_eq!(outcome, Outcome::Success(json!(1)));
                c.fetch_add(1, Ordering::SeqCst);
            })),
        );

        assert!(locker.complete(Outcome::Success(json!(1))));
        assert!(!locker.complete(Outcome::communication(RpcCode::Timeout, "late")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(locker.outcome(), Some(Outcome::Success(json!(1))));
    }

    #[test]
    fn test_host_is_set_once() {
        let locker = RpcLocker::new(request(), None);
        assert!(locker.host().is_none());
        locker.set_host(Host::new("a", 1));
        locker.set_host(Host::new("b", 2));
        assert_eq!(locker.host(), Some(&Host::new("a", 1)));
    }

    #[test]
    fn test_successful_write_does_not_complete() {
        let locker = RpcLocker::new(request(), None);
        locker.on_written(&Ok(()));
        assert!(locker.sent_at().is_some());
        assert!(!locker.is_done());
    }

    #[test]
    fn test_without_callback() {
        let locker = RpcLocker::new(request(), None);
        assert!(!locker.is_done());
        assert!(locker.complete(Outcome::Success(json!(null))));
        assert!(locker.is_done());
    }
}
