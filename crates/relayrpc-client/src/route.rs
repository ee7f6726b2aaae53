use parking_lot::RwLock;
use relayrpc_common::Host;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::health::HealthGate;

/// Result of resolving an api through the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Host(Host),
    /// Nothing serves this api
    NoRoute,
    /// The api is served, but every host behind it is down
    NoLiveHost,
}

/// Maps an api name to a live destination host.
pub trait RouteTable: Send + Sync {
    fn resolve(&self, api: &str) -> Resolution;
}

/// The hosts serving one api, picked round-robin.
pub struct RpcRoute {
    hosts: Vec<Host>,
    cursor: AtomicUsize,
}

impl RpcRoute {
    pub fn new(hosts: Vec<Host>) -> Self {
        Self {
            hosts,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next host in rotation that the gate does not report down.
    pub fn next_host(&self, gate: &dyn HealthGate) -> Option<Host> {
        let count = self.hosts.len();
        if count == 0 {
            return None;
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        (0..count)
            .map(|offset| &self.hosts[start.wrapping_add(offset) % count])
            .find(|host| !gate.is_down(host))
            .cloned()
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }
}

/// In-memory route table.
///
/// Routes are registered per api by whatever keeps the table current
/// (static configuration, a registry watcher, tests). Resolution consults
/// the shared health gate so downed hosts are skipped.
pub struct Routes {
    gate: Arc<dyn HealthGate>,
    routes: RwLock<HashMap<String, Arc<RpcRoute>>>,
}

impl Routes {
    pub fn new(gate: Arc<dyn HealthGate>) -> Self {
        Self {
            gate,
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Sets the hosts serving `api`, replacing any previous route.
    ///
    /// Duplicate hosts are dropped; an empty list removes the route.
    pub fn register(&self, api: impl Into<String>, hosts: Vec<Host>) {
        let api = api.into();
        let mut unique = Vec::with_capacity(hosts.len());
        for host in hosts {
            if !unique.contains(&host) {
                unique.push(host);
            }
        }

        let mut routes = self.routes.write();
        if unique.is_empty() {
            routes.remove(&api);
        } else {
            routes.insert(api, Arc::new(RpcRoute::new(unique)));
        }
    }

    pub fn remove(&self, api: &str) -> bool {
        self.routes.write().remove(api).is_some()
    }

    pub fn route(&self, api: &str) -> Option<Arc<RpcRoute>> {
        self.routes.read().get(api).cloned()
    }

    pub fn apis(&self) -> Vec<String> {
        let mut apis: Vec<String> = self.routes.read().keys().cloned().collect();
        apis.sort();
        apis
    }
}

impl RouteTable for Routes {
    fn resolve(&self, api: &str) -> Resolution {
        let Some(route) = self.route(api) else {
            return Resolution::NoRoute;
        };
        match route.next_host(self.gate.as_ref()) {
            Some(host) => Resolution::Host(host),
            None => Resolution::NoLiveHost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HostChecker;

    fn hosts(n: u16) -> Vec<Host> {
        (1..=n).map(|p| Host::new("10.0.0.1", p)).collect()
    }

    #[test]
    fn test_round_robin() {
        let checker = HostChecker::new();
        let route = RpcRoute::new(hosts(3));

        assert_eq!(route.next_host(&checker), Some(Host::new("10.0.0.1", 1)));
        assert_eq!(route.next_host(&checker), Some(Host::new("10.0.0.1", 2)));
        assert_eq!(route.next_host(&checker), Some(Host::new("10.0.0.1", 3)));
        // wraps around
        assert_eq!(route.next_host(&checker), Some(Host::new("10.0.0.1", 1)));
    }

    #[test]
    fn test_skips_down_hosts() {
        let checker = HostChecker::new();
        checker.mark_down(&Host::new("10.0.0.1", 2), "test");
        let route = RpcRoute::new(hosts(3));

        let picked: Vec<_> = (0..6).filter_map(|_| route.next_host(&checker)).collect();
        assert_eq!(picked.len(), 6);
        assert!(picked.iter().all(|h| h.port != 2));
    }

    #[test]
    fn test_all_down_returns_none() {
        let checker = HostChecker::new();
        for host in hosts(2) {
            checker.mark_down(&host, "test");
        }
        let route = RpcRoute::new(hosts(2));
        assert_eq!(route.next_host(&checker), None);
    }

    #[test]
    fn test_resolve_distinguishes_no_route_and_no_live_host() {
        let checker = Arc::new(HostChecker::new());
        let routes = Routes::new(checker.clone());

        assert_eq!(routes.resolve("user.get"), Resolution::NoRoute);

        routes.register("user.get", vec![Host::new("10.0.0.9", 80)]);
        assert_eq!(
            routes.resolve("user.get"),
            Resolution::Host(Host::new("10.0.0.9", 80))
        );

        checker.mark_down(&Host::new("10.0.0.9", 80), "test");
        assert_eq!(routes.resolve("user.get"), Resolution::NoLiveHost);
    }

    #[test]
    fn test_register_dedups_and_empty_removes() {
        let routes = Routes::new(Arc::new(HostChecker::new()));
        routes.register("a", vec![Host::new("h", 1), Host::new("h", 1), Host::new("h", 2)]);
        assert_eq!(routes.route("a").unwrap().host_count(), 2);

        routes.register("a", vec![]);
        assert!(routes.route("a").is_none());
        assert!(!routes.remove("a"));
    }

    #[test]
    fn test_apis_listing() {
        let routes = Routes::new(Arc::new(HostChecker::new()));
        routes.register("b.api", hosts(1));
        routes.register("a.api", hosts(1));
        assert_eq!(routes.apis(), vec!["a.api".to_string(), "b.api".to_string()]);
        assert!(routes.remove("a.api"));
        assert_eq!(routes.apis(), vec!["b.api".to_string()]);
    }
}
