//! Single-assignment completion cell.
//!
//! [`Completion`] holds a value that is set at most once. Observers can
//! register listeners, await the value from async code, or block a thread on
//! it. Both [`RpcLocker`](crate::RpcLocker) and
//! [`WriteTicket`](crate::WriteTicket) are built on it.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

pub type Listener<T> = Box<dyn FnOnce(T) + Send + 'static>;

struct State<T> {
    value: Option<T>,
    listeners: Vec<Listener<T>>,
}

pub struct Completion<T> {
    state: Mutex<State<T>>,
    condvar: Condvar,
    notify: Notify,
}

impl<T: Clone + Send + 'static> Completion<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                value: None,
                listeners: Vec::new(),
            }),
            condvar: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Sets the value if it is still unset.
    ///
    /// Returns `false` when another caller got there first. Listeners run on
    /// the calling thread after the lock is released, in registration order.
    pub fn complete(&self, value: T) -> bool {
        let listeners = {
            let mut state = self.state.lock();
            if state.value.is_some() {
                return false;
            }
            state.value = Some(value.clone());
            std::mem::take(&mut state.listeners)
        };

        self.condvar.notify_all();
        self.notify.notify_waiters();

        for listener in listeners {
            listener(value.clone());
        }
        true
    }

    pub fn get(&self) -> Option<T> {
        self.state.lock().value.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().value.is_some()
    }

    /// Runs `listener` with the value once it is set; immediately if it
    /// already is.
    pub fn on_complete<F>(&self, listener: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        let ready = {
            let mut state = self.state.lock();
            match &state.value {
                Some(value) => value.clone(),
                None => {
                    state.listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        listener(ready);
    }

    /// Waits for the value without blocking the executor thread.
    pub async fn wait(&self) -> T {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a completion in between is not lost
            notified.as_mut().enable();

            if let Some(value) = self.get() {
                return value;
            }
            notified.await;
        }
    }

    /// Blocks the current thread until the value is set or `timeout` passes.
    ///
    /// Must not be called from inside an async task.
    pub fn wait_blocking(&self, timeout: Option<Duration>) -> Option<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if let Some(value) = &state.value {
                return Some(value.clone());
            }
            match deadline {
                Some(deadline) => {
                    if self.condvar.wait_until(&mut state, deadline).timed_out() {
                        return state.value.clone();
                    }
                }
                None => self.condvar.wait(&mut state),
            }
        }
    }
}

impl<T: Clone + Send + 'static> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}
