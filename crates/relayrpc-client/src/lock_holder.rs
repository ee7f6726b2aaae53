//! Lock Holder - registry of in-flight calls.
//!
//! Maps request ids to the [`RpcLocker`] waiting for them, plus a deadline.
//! Two parties race to finish each call: the connection reader delivering a
//! response and the sweeper expiring the deadline. Both go through
//! [`LockHolder::remove`]; whoever removes the entry owns the completion, the
//! other sees nothing and backs off.

use dashmap::DashMap;
use relayrpc_common::{Outcome, RequestId, Response, RpcCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

use crate::locker::RpcLocker;

struct Entry {
    locker: Arc<RpcLocker>,
    deadline: Instant,
}

/// Counters for the lock holder.
#[derive(Debug, Default)]
pub struct LockHolderStats {
    /// Calls registered
    pub registered: AtomicU64,
    /// Calls completed by a response
    pub responded: AtomicU64,
    /// Calls expired by the sweeper
    pub timed_out: AtomicU64,
    /// Responses that found no waiting call
    pub late_responses: AtomicU64,
    /// Registrations withdrawn because the send failed
    pub reversed: AtomicU64,
}

#[derive(Default)]
pub struct LockHolder {
    pending: DashMap<RequestId, Entry>,
    stats: LockHolderStats,
}

impl LockHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `locker` until `deadline`.
    ///
    /// Ids are never reused while live. Should it happen anyway, the older
    /// call is failed so it cannot linger forever.
    pub fn register(&self, locker: Arc<RpcLocker>, deadline: Instant) {
        let id = locker.id();
        self.stats.registered.fetch_add(1, Ordering::Relaxed);
        let previous = self.pending.insert(id, Entry { locker, deadline });

        trace!(request_id = id, "Registered call");

        if let Some(previous) = previous {
            error!(request_id = id, "Request id registered twice, failing the older call");
            previous.locker.complete(Outcome::communication(
                RpcCode::SendFailed,
                format!("request id {} was reused", id),
            ));
        }
    }

    /// Removes and returns the call registered under `id`, if still there.
    pub fn remove(&self, id: RequestId) -> Option<Arc<RpcLocker>> {
        self.pending.remove(&id).map(|(_, entry)| entry.locker)
    }

    /// Withdraws a registration whose send failed.
    pub(crate) fn reverse(&self, id: RequestId) -> Option<Arc<RpcLocker>> {
        let removed = self.remove(id);
        if removed.is_some() {
            self.stats.reversed.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Completes the call a response belongs to.
    ///
    /// Returns `false` if the call is no longer registered (already timed
    /// out, or never ours); such late responses are counted and dropped.
    pub fn deliver(&self, response: Response) -> bool {
        let id = response.id;
        match self.remove(id) {
            Some(locker) => {
                self.stats.responded.fetch_add(1, Ordering::Relaxed);
                locker.complete(response.into_outcome())
            }
            None => {
                self.stats.late_responses.fetch_add(1, Ordering::Relaxed);
                debug!(request_id = id, "Response for unknown or expired request");
                false
            }
        }
    }

    /// Expires every call whose deadline is at or before `now`.
    ///
    /// Returns how many calls this sweep timed out. Ids are collected first
    /// and removed one by one, so completion callbacks never run under a
    /// map lock.
    pub fn sweep(&self, now: Instant) -> usize {
        let expired: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|entry| entry.value().deadline <= now)
            .map(|entry| *entry.key())
            .collect();

        let mut timed_out = 0;
        for id in expired {
            let Some(locker) = self.remove(id) else {
                continue;
            };
            self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
            let host = locker
                .host()
                .map(|h| h.to_string())
                .unwrap_or_else(|| "-".to_string());
            warn!(
                request_id = id,
                api = %locker.api(),
                host = %host,
                elapsed_ms = locker.elapsed().as_millis() as u64,
                "Call timed out"
            );
            let message = format!("{} timed out after {}ms", locker.api(), locker.elapsed().as_millis());
            if locker.complete(Outcome::communication(RpcCode::Timeout, message)) {
                timed_out += 1;
            }
        }
        timed_out
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn deadline(&self, id: RequestId) -> Option<Instant> {
        self.pending.get(&id).map(|entry| entry.deadline)
    }

    pub fn stats(&self) -> &LockHolderStats {
        &self.stats
    }

    /// Starts the periodic sweep.
    ///
    /// The task holds a weak reference and stops once the holder is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let holder: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let Some(holder) = holder.upgrade() else {
                    debug!("Lock holder dropped, stopping sweeper");
                    return;
                };
                let expired = holder.sweep(Instant::now());
                if expired > 0 {
                    debug!(expired = expired, "Swept expired calls");
                }
            }
        })
    }
}
