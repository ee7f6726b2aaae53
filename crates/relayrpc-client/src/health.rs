use dashmap::DashMap;
use relayrpc_common::transport::TcpTransportAsync;
use relayrpc_common::Host;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Answers whether a host is currently marked down.
///
/// The dispatch path only reads this; marking hosts up and down is the
/// business of whoever implements it.
pub trait HealthGate: Send + Sync {
    fn is_down(&self, host: &Host) -> bool;
}

/// Health probe configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// How often downed hosts are probed
    pub interval: Duration,
    /// Connect timeout for a single probe
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_millis(2000),
        }
    }
}

/// Why and since when a host is down.
#[derive(Debug, Clone)]
pub struct DownHost {
    pub since: Instant,
    pub reason: String,
}

/// Tracks downed hosts and brings them back once they accept connections.
///
/// Hosts are marked down by the session layer when a connect fails, or
/// manually. [`spawn`](Self::spawn) starts a background probe that tries to
/// connect to every downed host on each tick and marks reachable ones up.
#[derive(Default)]
pub struct HostChecker {
    downed: DashMap<Host, DownHost>,
}

impl HostChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a host down. Returns `true` if it was up before.
    pub fn mark_down(&self, host: &Host, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let newly_down = self
            .downed
            .insert(
                host.clone(),
                DownHost {
                    since: Instant::now(),
                    reason: reason.clone(),
                },
            )
            .is_none();
        if newly_down {
            warn!(host = %host, reason = %reason, "Host marked down");
        }
        newly_down
    }

    /// Marks a host up. Returns `true` if it was down before.
    pub fn mark_up(&self, host: &Host) -> bool {
        match self.downed.remove(host) {
            Some((_, down)) => {
                info!(
                    host = %host,
                    down_ms = down.since.elapsed().as_millis() as u64,
                    "Host recovered"
                );
                true
            }
            None => false,
        }
    }

    pub fn down_info(&self, host: &Host) -> Option<DownHost> {
        self.downed.get(host).map(|entry| entry.value().clone())
    }

    pub fn downed_hosts(&self) -> Vec<Host> {
        let mut hosts: Vec<Host> = self.downed.iter().map(|e| e.key().clone()).collect();
        hosts.sort();
        hosts
    }

    pub fn down_count(&self) -> usize {
        self.downed.len()
    }

    /// Starts the probe task.
    ///
    /// The task holds only a weak reference and exits once the checker is
    /// dropped.
    pub fn spawn(self: &Arc<Self>, config: HealthCheckConfig) -> tokio::task::JoinHandle<()> {
        let checker = Arc::downgrade(self);
        tokio::spawn(async move {
            Self::run(checker, config).await;
        })
    }

    async fn run(checker: Weak<Self>, config: HealthCheckConfig) {
        let mut interval = tokio::time::interval(config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let Some(checker) = checker.upgrade() else {
                debug!("Host checker dropped, stopping probe");
                return;
            };
            checker.probe_downed(config.timeout).await;
        }
    }

    /// Probes every downed host once, in parallel. Returns how many recovered.
    pub async fn probe_downed(&self, timeout: Duration) -> usize {
        let hosts = self.downed_hosts();
        if hosts.is_empty() {
            return 0;
        }

        let probes: Vec<_> = hosts
            .into_iter()
            .map(|host| async move {
                let reachable = TcpTransportAsync::connect(&host.addr(), timeout).await.is_ok();
                (host, reachable)
            })
            .collect();

        let results = futures::future::join_all(probes).await;

        let mut recovered = 0;
        for (host, reachable) in results {
            if reachable && self.mark_up(&host) {
                recovered += 1;
            } else if !reachable {
                debug!(host = %host, "Host still unreachable");
            }
        }
        recovered
    }
}

impl HealthGate for HostChecker {
    fn is_down(&self, host: &Host) -> bool {
        self.downed.contains_key(host)
    }
}
