use futures::future::BoxFuture;
use relayrpc_common::{Host, Outcome, RequestId};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use crate::locker::RpcLocker;

/// Handle on a dispatched call.
///
/// `Pending` calls were written and wait for a response or their deadline.
/// `Failed` calls were decided before anything reached the network (no
/// route, no live host, send refused); they are already complete when
/// [`Sender::execute`](crate::Sender::execute) returns.
///
/// Both variants observe the same completion, so the outcome read here is
/// always the one the callback received.
///
/// # Example
///
/// ```no_run
/// # async fn demo(client: relayrpc_client::RpcClient) -> Result<(), Box<dyn std::error::Error>> {
/// use serde_json::json;
///
/// let future = client
///     .sender("user.get")
///     .params_as_array([json!(7)])
///     .execute()?;
///
/// let user = future.await.into_result()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub enum RpcFuture {
    Pending(Arc<RpcLocker>),
    /// A call the dispatch path gave up on before it was written.
    ///
    /// Read the outcome through [`try_outcome`](Self::try_outcome) or
    /// [`wait`](Self::wait), not from `error`.
    Failed {
        locker: Arc<RpcLocker>,
        /// The outcome dispatch meant to complete the call with. Another
        /// completer (a response or the sweep) may have won, in which case
        /// the locker holds a different outcome and that one is final.
        error: Outcome,
    },
}

impl RpcFuture {
    pub(crate) fn failed(locker: Arc<RpcLocker>, error: Outcome) -> Self {
        RpcFuture::Failed { locker, error }
    }

    fn locker(&self) -> &Arc<RpcLocker> {
        match self {
            RpcFuture::Pending(locker) => locker,
            RpcFuture::Failed { locker, .. } => locker,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.locker().id()
    }

    /// Destination the call was sent to, if one was resolved.
    pub fn host(&self) -> Option<Host> {
        self.locker().host().cloned()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RpcFuture::Failed { .. })
    }

    pub fn is_done(&self) -> bool {
        self.locker().is_done()
    }

    /// The outcome, if the call has finished.
    pub fn try_outcome(&self) -> Option<Outcome> {
        match self {
            RpcFuture::Pending(locker) => locker.outcome(),
            RpcFuture::Failed { locker, error } => {
                Some(locker.outcome().unwrap_or_else(|| error.clone()))
            }
        }
    }

    /// Runs `callback` with the outcome; immediately if the call is done.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.locker().on_complete(callback);
    }

    pub async fn wait(&self) -> Outcome {
        match self {
            RpcFuture::Pending(locker) => locker.wait().await,
            RpcFuture::Failed { locker, error } => {
                locker.outcome().unwrap_or_else(|| error.clone())
            }
        }
    }

    /// Blocks until the outcome is known or `timeout` passes.
    ///
    /// Must not be called from inside an async task.
    pub fn wait_blocking(&self, timeout: Option<Duration>) -> Option<Outcome> {
        match self {
            RpcFuture::Pending(locker) => locker.wait_blocking(timeout),
            RpcFuture::Failed { .. } => self.try_outcome(),
        }
    }
}

impl IntoFuture for RpcFuture {
    type Output = Outcome;
    type IntoFuture = BoxFuture<'static, Outcome>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}
