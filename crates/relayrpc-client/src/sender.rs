//! Per-call request builder and the dispatch path behind it.

use relayrpc_common::{Host, Outcome, Params, RelayError, Request, Result, RpcCode};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::client::ClientInner;
use crate::config::default_timeout;
use crate::future::RpcFuture;
use crate::locker::{Callback, RpcLocker};
use crate::route::Resolution;
use crate::session::WriteTicket;

/// Builds and sends one call.
///
/// Obtained from [`RpcClient::sender`](crate::RpcClient::sender). Setters
/// chain; [`execute`](Self::execute) consumes the builder.
///
/// # Example
///
/// ```no_run
/// # fn demo(client: relayrpc_client::RpcClient) -> relayrpc_common::Result<()> {
/// use relayrpc_common::Host;
/// use serde_json::json;
/// use std::time::Duration;
///
/// let future = client
///     .sender("order.create")
///     .params_as_array([json!("sku-1"), json!(2)])
///     .direct_hosts([Host::new("10.0.0.5", 9000), Host::new("10.0.0.6", 9000)])
///     .backup(true)
///     .total_timeout(Duration::from_secs(2))
///     .callback(|outcome| println!("done: {:?}", outcome))
///     .execute()?;
/// # Ok(())
/// # }
/// ```
pub struct Sender {
    inner: Arc<ClientInner>,
    api: String,
    params: Option<Params>,
    total_timeout: Option<Duration>,
    direct_hosts: Vec<Host>,
    backup: bool,
    callback: Option<Callback>,
}

impl Sender {
    pub(crate) fn new(inner: Arc<ClientInner>, api: String) -> Self {
        Self {
            inner,
            api,
            params: None,
            total_timeout: None,
            direct_hosts: Vec::new(),
            backup: false,
            callback: None,
        }
    }

    /// Positional arguments, each serialized to its JSON text.
    pub fn params_as_array<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let args = values.into_iter().map(|v| v.to_string()).collect();
        self.params = Some(Params::Array(args));
        self
    }

    /// A single pre-serialized JSON argument, passed through untouched.
    pub fn params_as_json(mut self, json: impl Into<String>) -> Self {
        self.params = Some(Params::Json(json.into()));
        self
    }

    /// Named arguments, sent as one JSON object.
    pub fn params_as_map(mut self, map: Map<String, Value>) -> Self {
        self.params = Some(Params::Json(Value::Object(map).to_string()));
        self
    }

    /// Hosts to try before the route table, round-robin.
    pub fn direct_hosts<I>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = Host>,
    {
        self.direct_hosts = hosts.into_iter().collect();
        self
    }

    /// Falls back to the route table when every direct host is down.
    pub fn backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    /// Deadline for the whole call. Zero means the configured default.
    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = Some(timeout);
        self
    }

    /// Called exactly once with the outcome, on whichever thread completes
    /// the call.
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Resolves a destination, registers the call and writes it.
    ///
    /// Never blocks. Failures that happen before the request reaches the
    /// network are returned as an already-completed [`RpcFuture::Failed`]
    /// whose outcome was also delivered to the callback.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if the api is blank or no params were set.
    pub fn execute(self) -> Result<RpcFuture> {
        let Sender {
            inner,
            api,
            params,
            total_timeout,
            direct_hosts,
            backup,
            callback,
        } = self;

        if api.trim().is_empty() {
            return Err(RelayError::InvalidRequest("api must not be empty".to_string()));
        }
        let Some(params) = params else {
            return Err(RelayError::InvalidRequest(format!(
                "params of {} must be set before execute",
                api
            )));
        };

        let timeout = match total_timeout {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => default_timeout(inner.settings.as_ref()),
        };
        let deadline = deadline_after(Instant::now(), timeout);

        let request = Arc::new(Request::new(api, params));
        let call = Call {
            request,
            direct_hosts,
            backup,
            deadline,
        };
        let future = dispatch(&inner, call, callback);

        if let RpcFuture::Failed { locker, error } = &future {
            inner.lock_holder.reverse(locker.id());
            locker.complete(error.clone());
        }
        Ok(future)
    }
}

struct Call {
    request: Arc<Request>,
    direct_hosts: Vec<Host>,
    backup: bool,
    deadline: Instant,
}

fn dispatch(inner: &ClientInner, call: Call, callback: Option<Callback>) -> RpcFuture {
    let locker = Arc::new(RpcLocker::new(call.request.clone(), callback));
    let api = call.request.api.as_str();

    let mut host = None;
    if !call.direct_hosts.is_empty() {
        host = inner.picker.pick(&call.direct_hosts, inner.gate.as_ref());
        if host.is_none() && !call.backup {
            let message = format!("all direct hosts are down: [{}]", join_hosts(&call.direct_hosts));
            warn!(request_id = locker.id(), api = %api, "{}", message);
            return RpcFuture::failed(locker, Outcome::communication(RpcCode::NoNodeAvailable, message));
        }
    }

    let host = match host {
        Some(host) => host,
        None => match inner.routes.resolve(api) {
            Resolution::Host(host) => host,
            Resolution::NoRoute => {
                let message = format!("can not find route for {}", api);
                warn!(request_id = locker.id(), "{}", message);
                return RpcFuture::failed(locker, Outcome::communication(RpcCode::NoRoute, message));
            }
            Resolution::NoLiveHost => {
                let message = format!("route for {} are all down", api);
                warn!(request_id = locker.id(), "{}", message);
                return RpcFuture::failed(
                    locker,
                    Outcome::communication(RpcCode::NoNodeAvailable, message),
                );
            }
        },
    };

    locker.set_host(host.clone());
    inner.lock_holder.register(locker.clone(), call.deadline);
    debug!(request_id = locker.id(), api = %api, host = %host, "Dispatching call");

    let Some(ticket) = write(inner, &host, call.request) else {
        return RpcFuture::failed(
            locker,
            Outcome::communication(RpcCode::SendFailed, format!("{} can not connect", host)),
        );
    };

    let holder = inner.lock_holder.clone();
    let written = locker.clone();
    ticket.add_listener(move |status| {
        written.on_written(&status);
        if let Err(reason) = status {
            // Only the party that removes the entry may complete the call
            if let Some(locker) = holder.reverse(written.id()) {
                locker.complete(Outcome::communication(
                    RpcCode::SendFailed,
                    format!("{} write failed: {}", host, reason),
                ));
            }
        }
    });

    RpcFuture::Pending(locker)
}

fn write(inner: &ClientInner, host: &Host, request: Arc<Request>) -> Option<WriteTicket> {
    let id = request.id;
    match inner.sessions.get_session(host) {
        Ok(session) => session.write(request),
        Err(e) => {
            error!(request_id = id, host = %host, error = %e, "Failed to get session");
            None
        }
    }
}

/// Longest deadline a call can get; larger timeouts are clamped to it.
const MAX_DEADLINE: Duration = Duration::from_secs(u32::MAX as u64);

fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout.min(MAX_DEADLINE))
        .or_else(|| start.checked_add(MAX_DEADLINE))
        .unwrap_or(start)
}

fn join_hosts(hosts: &[Host]) -> String {
    hosts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
