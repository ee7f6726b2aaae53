use relayrpc_common::{Response, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::{ClientConfig, EnvSettings, SessionConfig, Settings};
use crate::health::{HealthCheckConfig, HealthGate, HostChecker};
use crate::host_picker::HostPicker;
use crate::lock_holder::LockHolder;
use crate::route::{RouteTable, Routes};
use crate::sender::Sender;
use crate::session::SessionProvider;
use crate::tcp_session::TcpSessionProvider;

/// Services shared by every call made through one client.
pub(crate) struct ClientInner {
    pub(crate) gate: Arc<dyn HealthGate>,
    pub(crate) routes: Arc<dyn RouteTable>,
    pub(crate) sessions: Arc<dyn SessionProvider>,
    pub(crate) settings: Arc<dyn Settings>,
    pub(crate) lock_holder: Arc<LockHolder>,
    pub(crate) picker: Arc<HostPicker>,
    config: ClientConfig,
}

/// relayrpc client.
///
/// Holds the collaborators the dispatch path needs and hands out one
/// [`Sender`] per call. Cloning is cheap; clones share the same lock holder
/// and round-robin counter.
///
/// Responses reach waiting calls through [`deliver_response`](Self::deliver_response)
/// (the TCP sessions do this on their own), and expired calls are failed by
/// the sweeper started with [`spawn_sweeper`](Self::spawn_sweeper).
///
/// # Example
///
/// ```no_run
/// use relayrpc_client::{RpcClient, config::EnvSettings};
/// use relayrpc_common::Host;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let tcp = RpcClient::connect_tcp(Arc::new(EnvSettings::new()))?;
/// tcp.routes().register("echo", vec![Host::new("127.0.0.1", 9000)]);
///
/// let outcome = tcp.client().sender("echo").params_as_array([json!("hi")]).execute()?.await;
/// println!("{:?}", outcome);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    pub fn builder(sessions: Arc<dyn SessionProvider>) -> ClientBuilder {
        ClientBuilder::new(sessions)
    }

    /// Starts a call to `api`.
    pub fn sender(&self, api: impl Into<String>) -> Sender {
        Sender::new(self.inner.clone(), api.into())
    }

    pub fn lock_holder(&self) -> &Arc<LockHolder> {
        &self.inner.lock_holder
    }

    pub fn host_picker(&self) -> &Arc<HostPicker> {
        &self.inner.picker
    }

    /// Hands a response from a custom transport to the call waiting for it.
    ///
    /// Returns `false` if no call was waiting (late or unknown response).
    pub fn deliver_response(&self, response: Response) -> bool {
        self.inner.lock_holder.deliver(response)
    }

    /// Starts the timeout sweep at the configured interval.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.inner
            .lock_holder
            .spawn_sweeper(self.inner.config.sweep_interval)
    }

    /// Client over TCP sessions with default configuration.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect_tcp(settings: Arc<dyn Settings>) -> Result<TcpClient> {
        Self::connect_tcp_with(
            settings,
            ClientConfig::default(),
            SessionConfig::default(),
            HealthCheckConfig::default(),
        )
    }

    /// Wires health checking, routing, TCP sessions and the lock holder
    /// together and starts the sweeper and the health probe.
    pub fn connect_tcp_with(
        settings: Arc<dyn Settings>,
        config: ClientConfig,
        session_config: SessionConfig,
        health_config: HealthCheckConfig,
    ) -> Result<TcpClient> {
        let checker = Arc::new(HostChecker::new());
        let routes = Arc::new(Routes::new(checker.clone()));
        let lock_holder = Arc::new(LockHolder::new());
        let sessions = Arc::new(TcpSessionProvider::new(
            lock_holder.clone(),
            Some(checker.clone()),
            session_config,
        )?);

        let client = ClientBuilder::new(sessions.clone())
            .health(checker.clone())
            .routes(routes.clone())
            .settings(settings)
            .lock_holder(lock_holder)
            .config(config)
            .build();

        let tasks = vec![client.spawn_sweeper(), checker.spawn(health_config)];

        Ok(TcpClient {
            client,
            routes,
            checker,
            sessions,
            tasks,
        })
    }
}

/// Builder for [`RpcClient`].
///
/// Only the session provider is required. Defaults: a fresh [`HostChecker`]
/// as health gate, an empty [`Routes`] table over that gate, settings from
/// the environment, a new lock holder and host picker.
pub struct ClientBuilder {
    sessions: Arc<dyn SessionProvider>,
    gate: Option<Arc<dyn HealthGate>>,
    routes: Option<Arc<dyn RouteTable>>,
    settings: Option<Arc<dyn Settings>>,
    lock_holder: Option<Arc<LockHolder>>,
    picker: Option<Arc<HostPicker>>,
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn new(sessions: Arc<dyn SessionProvider>) -> Self {
        Self {
            sessions,
            gate: None,
            routes: None,
            settings: None,
            lock_holder: None,
            picker: None,
            config: ClientConfig::default(),
        }
    }

    pub fn health(mut self, gate: Arc<dyn HealthGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn routes(mut self, routes: Arc<dyn RouteTable>) -> Self {
        self.routes = Some(routes);
        self
    }

    pub fn settings(mut self, settings: Arc<dyn Settings>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn lock_holder(mut self, lock_holder: Arc<LockHolder>) -> Self {
        self.lock_holder = Some(lock_holder);
        self
    }

    pub fn host_picker(mut self, picker: Arc<HostPicker>) -> Self {
        self.picker = Some(picker);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> RpcClient {
        let gate = self
            .gate
            .unwrap_or_else(|| Arc::new(HostChecker::new()) as Arc<dyn HealthGate>);
        let routes = self
            .routes
            .unwrap_or_else(|| Arc::new(Routes::new(gate.clone())) as Arc<dyn RouteTable>);

        RpcClient {
            inner: Arc::new(ClientInner {
                gate,
                routes,
                sessions: self.sessions,
                settings: self
                    .settings
                    .unwrap_or_else(|| Arc::new(EnvSettings::new()) as Arc<dyn Settings>),
                lock_holder: self.lock_holder.unwrap_or_default(),
                picker: self.picker.unwrap_or_default(),
                config: self.config,
            }),
        }
    }
}

/// A TCP-backed client together with the pieces it was wired from.
///
/// Dropping it stops the sweeper and the health probe.
pub struct TcpClient {
    client: RpcClient,
    routes: Arc<Routes>,
    checker: Arc<HostChecker>,
    sessions: Arc<TcpSessionProvider>,
    tasks: Vec<JoinHandle<()>>,
}

impl TcpClient {
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    pub fn routes(&self) -> &Arc<Routes> {
        &self.routes
    }

    pub fn checker(&self) -> &Arc<HostChecker> {
        &self.checker
    }

    pub fn sessions(&self) -> &Arc<TcpSessionProvider> {
        &self.sessions
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
