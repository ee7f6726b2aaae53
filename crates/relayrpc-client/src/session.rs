//! Connection abstraction used by the dispatch path.
//!
//! A [`SessionProvider`] hands out a writable [`Connection`] per host. A
//! write returns a [`WriteTicket`] that the transport completes once the
//! bytes were handed to the socket (or could not be). The ticket only
//! reports local I/O; the call itself completes when its response comes back
//! through [`LockHolder::deliver`](crate::LockHolder::deliver).

use relayrpc_common::{Host, Request, Result};
use std::sync::Arc;

use crate::completion::Completion;

/// Local result of a write: `Err` carries why the bytes never left.
pub type WriteStatus = std::result::Result<(), String>;

pub trait SessionProvider: Send + Sync {
    fn get_session(&self, host: &Host) -> Result<Arc<dyn Connection>>;
}

pub trait Connection: Send + Sync {
    /// Queues `request` for transmission.
    ///
    /// `None` means the request could not be queued at all.
    fn write(&self, request: Arc<Request>) -> Option<WriteTicket>;
}

/// Handle on one pending write. Cheap to clone.
#[derive(Clone, Default)]
pub struct WriteTicket {
    status: Arc<Completion<WriteStatus>>,
}

impl WriteTicket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the transport once the write finished, one way or the other.
    pub fn finish(&self, status: WriteStatus) -> bool {
        self.status.complete(status)
    }

    pub fn status(&self) -> Option<WriteStatus> {
        self.status.get()
    }

    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(WriteStatus) + Send + 'static,
    {
        self.status.on_complete(listener);
    }
}
