//! Dispatch path tests
//!
//! Drive `Sender::execute` against an in-memory session provider so every
//! step of resolution, registration and completion can be observed without
//! a network.

use parking_lot::Mutex;
use relayrpc_client::config::TIMEOUT_KEY;
use relayrpc_client::{
    Connection, HostChecker, HostPicker, LockHolder, MapSettings, Routes, RpcClient, RpcFuture,
    SessionProvider, WriteTicket,
};
use relayrpc_common::{Host, Outcome, Params, RelayError, Request, Response, Result, RpcCode};
use serde_json::{json, Map};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Accept,
    Refuse,
    Fail,
}

struct Written {
    host: Host,
    request: Arc<Request>,
    ticket: WriteTicket,
    registered_before_write: bool,
}

/// Session provider that records writes instead of sending them.
struct MockSessions {
    mode: Mutex<Mode>,
    holder: Arc<LockHolder>,
    written: Mutex<Vec<Written>>,
}

impl MockSessions {
    fn new(holder: Arc<LockHolder>) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(Mode::Accept),
            holder,
            written: Mutex::new(Vec::new()),
        })
    }

    fn set_mode(&self, mode: Mode) {
        *self.mode.lock() = mode;
    }

    fn hosts(&self) -> Vec<Host> {
        self.written.lock().iter().map(|w| w.host.clone()).collect()
    }

    fn last_ticket(&self) -> WriteTicket {
        self.written.lock().last().unwrap().ticket.clone()
    }

    fn last_request(&self) -> Arc<Request> {
        self.written.lock().last().unwrap().request.clone()
    }
}

struct MockConnection {
    host: Host,
    sessions: Arc<MockSessions>,
}

impl Connection for MockConnection {
    fn write(&self, request: Arc<Request>) -> Option<WriteTicket> {
        if *self.sessions.mode.lock() == Mode::Refuse {
            return None;
        }
        let ticket = WriteTicket::new();
        self.sessions.written.lock().push(Written {
            host: self.host.clone(),
            registered_before_write: self.sessions.holder.contains(request.id),
            request,
            ticket: ticket.clone(),
        });
        Some(ticket)
    }
}

struct Provider(Arc<MockSessions>);

impl SessionProvider for Provider {
    fn get_session(&self, host: &Host) -> Result<Arc<dyn Connection>> {
        if *self.0.mode.lock() == Mode::Fail {
            return Err(RelayError::Connection(format!("{} refused", host)));
        }
        Ok(Arc::new(MockConnection {
            host: host.clone(),
            sessions: self.0.clone(),
        }))
    }
}

struct Harness {
    client: RpcClient,
    holder: Arc<LockHolder>,
    checker: Arc<HostChecker>,
    routes: Arc<Routes>,
    sessions: Arc<MockSessions>,
}

fn harness() -> Harness {
    harness_with(MapSettings::new())
}

fn harness_with(settings: MapSettings) -> Harness {
    let holder = Arc::new(LockHolder::new());
    let checker = Arc::new(HostChecker::new());
    let routes = Arc::new(Routes::new(checker.clone()));
    let sessions = MockSessions::new(holder.clone());

    let client = RpcClient::builder(Arc::new(Provider(sessions.clone())))
        .health(checker.clone())
        .routes(routes.clone())
        .settings(Arc::new(settings))
        .lock_holder(holder.clone())
        .host_picker(Arc::new(HostPicker::new()))
        .build();

    Harness {
        client,
        holder,
        checker,
        routes,
        sessions,
    }
}

fn host(port: u16) -> Host {
    Host::new("10.0.0.1", port)
}

fn counting_callback() -> (
    Arc<AtomicUsize>,
    Arc<Mutex<Option<Outcome>>>,
    impl FnOnce(Outcome) + Send + 'static,
) {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen: Arc<Mutex<Option<Outcome>>> = Arc::new(Mutex::new(None));
    let (c, s) = (calls.clone(), seen.clone());
    let callback = move |outcome: Outcome| {
        c.fetch_add(1, Ordering::SeqCst);
        *s.lock() = Some(outcome);
    };
    (calls, seen, callback)
}

fn code_of(future: &RpcFuture) -> Option<RpcCode> {
    future.try_outcome().and_then(|o| o.rpc_code())
}

fn message_of(future: &RpcFuture) -> String {
    match future.try_outcome() {
        Some(Outcome::CommunicationFailure { message, .. }) => message,
        other => panic!("expected communication failure, got {:?}", other),
    }
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_blank_api_is_rejected() {
    let h = harness();
    let result = h.client.sender("  ").params_as_json("{}").execute();
    assert!(matches!(result, Err(RelayError::InvalidRequest(_))));
    assert_eq!(h.holder.pending_count(), 0);
}

#[test]
fn test_missing_params_is_rejected() {
    let h = harness();
    h.routes.register("user.get", vec![host(1)]);
    let result = h.client.sender("user.get").execute();
    assert!(matches!(result, Err(RelayError::InvalidRequest(_))));
    assert!(h.sessions.hosts().is_empty());
}

// ============================================================================
// Direct hosts
// ============================================================================

#[test]
fn test_all_direct_hosts_down_without_backup() {
    let h = harness();
    h.checker.mark_down(&host(1), "test");
    h.checker.mark_down(&host(2), "test");
    h.routes.register("user.get", vec![host(3)]);
    let (calls, seen, callback) = counting_callback();

    let future = h
        .client
        .sender("user.get")
        .params_as_json("{}")
        .direct_hosts([host(1), host(2)])
        .callback(callback)
        .execute()
        .unwrap();

    assert!(future.is_failed());
    assert_eq!(code_of(&future), Some(RpcCode::NoNodeAvailable));
    assert_eq!(
        message_of(&future),
        "all direct hosts are down: [10.0.0.1:1, 10.0.0.1:2]"
    );
    assert_eq!(h.holder.pending_count(), 0);
    assert!(h.sessions.hosts().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock(), future.try_outcome());
}

#[test]
fn test_down_direct_host_is_skipped() {
    let h = harness();
    h.checker.mark_down(&host(1), "test");

    for _ in 0..4 {
        let future = h
            .client
            .sender("user.get")
            .params_as_json("{}")
            .direct_hosts([host(1), host(2)])
            .execute()
            .unwrap();
        assert_eq!(future.host(), Some(host(2)));
    }
    assert_eq!(h.sessions.hosts(), vec![host(2); 4]);
}

#[test]
fn test_direct_hosts_alternate_across_calls() {
    let h = harness();

    for _ in 0..4 {
        h.client
            .sender("user.get")
            .params_as_json("{}")
            .direct_hosts([host(1), host(2)])
            .execute()
            .unwrap();
    }

    assert_eq!(h.sessions.hosts(), vec![host(2), host(1), host(2), host(1)]);
}

#[test]
fn test_backup_falls_through_to_route() {
    let h = harness();
    h.checker.mark_down(&host(1), "test");
    h.routes.register("user.get", vec![host(7)]);

    let future = h
        .client
        .sender("user.get")
        .params_as_json("{}")
        .direct_hosts([host(1)])
        .backup(true)
        .execute()
        .unwrap();

    assert!(!future.is_failed());
    assert_eq!(future.host(), Some(host(7)));
}

#[test]
fn test_backup_without_route_is_no_route() {
    let h = harness();
    h.checker.mark_down(&host(1), "test");

    let future = h
        .client
        .sender("user.get")
        .params_as_json("{}")
        .direct_hosts([host(1)])
        .backup(true)
        .execute()
        .unwrap();

    assert_eq!(code_of(&future), Some(RpcCode::NoRoute));
    assert_eq!(message_of(&future), "can not find route for user.get");
    assert_eq!(h.holder.pending_count(), 0);
}

// ============================================================================
// Routes
// ============================================================================

#[test]
fn test_route_all_down() {
    let h = harness();
    h.routes.register("user.get", vec![host(1), host(2)]);
    h.checker.mark_down(&host(1), "test");
    h.checker.mark_down(&host(2), "test");

    let future = h.client.sender("user.get").params_as_json("{}").execute().unwrap();

    assert_eq!(code_of(&future), Some(RpcCode::NoNodeAvailable));
    assert_eq!(message_of(&future), "route for user.get are all down");
    assert_eq!(h.holder.pending_count(), 0);
}

#[test]
fn test_registered_before_write() {
    let h = harness();
    h.routes.register("user.get", vec![host(1)]);

    let future = h.client.sender("user.get").params_as_json("{}").execute().unwrap();

    assert!(h.sessions.written.lock()[0].registered_before_write);
    assert!(h.holder.contains(future.request_id()));
    assert!(!future.is_done());
}

// ============================================================================
// Send failures
// ============================================================================

#[test]
fn test_session_error_reverses_registration() {
    let h = harness();
    h.routes.register("user.get", vec![host(1)]);
    h.sessions.set_mode(Mode::Fail);
    let (calls, _, callback) = counting_callback();

    let future = h
        .client
        .sender("user.get")
        .params_as_json("{}")
        .callback(callback)
        .execute()
        .unwrap();

    assert_eq!(code_of(&future), Some(RpcCode::SendFailed));
    assert_eq!(message_of(&future), "10.0.0.1:1 can not connect");
    assert!(!h.holder.contains(future.request_id()));
    assert_eq!(h.holder.stats().reversed.load(Ordering::Relaxed), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_refused_write_reverses_registration() {
    let h = harness();
    h.routes.register("user.get", vec![host(1)]);
    h.sessions.set_mode(Mode::Refuse);

    let future = h.client.sender("user.get").params_as_json("{}").execute().unwrap();

    assert_eq!(code_of(&future), Some(RpcCode::SendFailed));
    assert_eq!(h.holder.pending_count(), 0);
}

#[test]
fn test_write_denial_fails_call() {
    let h = harness();
    h.routes.register("user.get", vec![host(1)]);
    let (calls, _, callback) = counting_callback();

    let future = h
        .client
        .sender("user.get")
        .params_as_json("{}")
        .callback(callback)
        .execute()
        .unwrap();
    assert!(!future.is_done());

    h.sessions.last_ticket().finish(Err("connection reset".to_string()));

    assert_eq!(code_of(&future), Some(RpcCode::SendFailed));
    assert!(!h.holder.contains(future.request_id()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A response racing the denial finds nothing to complete
    assert!(!h
        .client
        .deliver_response(Response::success(future.request_id(), json!(1))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_write_confirmation_keeps_call_pending() {
    let h = harness();
    h.routes.register("user.get", vec![host(1)]);

    let future = h.client.sender("user.get").params_as_json("{}").execute().unwrap();
    h.sessions.last_ticket().finish(Ok(()));

    assert!(!future.is_done());
    assert!(h.holder.contains(future.request_id()));
}

// ============================================================================
// Completion
// ============================================================================

#[tokio::test]
async fn test_response_completes_call() {
    let h = harness();
    h.routes.register("user.get", vec![host(1)]);
    let (calls, seen, callback) = counting_callback();

    let future = h
        .client
        .sender("user.get")
        .params_as_array([json!(7)])
        .callback(callback)
        .execute()
        .unwrap();
    h.sessions.last_ticket().finish(Ok(()));

    assert!(h
        .client
        .deliver_response(Response::success(future.request_id(), json!({"name": "ann"}))));

    let outcome = future.clone().await;
    assert_eq!(outcome, Outcome::Success(json!({"name": "ann"})));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock(), Some(outcome));
    assert_eq!(h.holder.pending_count(), 0);
}

#[test]
fn test_application_error_is_passed_through() {
    let h = harness();
    h.routes.register("user.get", vec![host(1)]);

    let future = h.client.sender("user.get").params_as_json("{}").execute().unwrap();
    h.client
        .deliver_response(Response::error(future.request_id(), 404, "no such user"));

    let result = future
        .wait_blocking(Some(Duration::from_secs(1)))
        .unwrap()
        .into_result();
    assert_eq!(
        result.unwrap_err().to_string(),
        "application failure [404]: no such user"
    );
}

#[test]
fn test_timeout_then_late_response_is_noop() {
    let h = harness();
    h.routes.register("user.get", vec![host(1)]);
    let (calls, _, callback) = counting_callback();

    let future = h
        .client
        .sender("user.get")
        .params_as_json("{}")
        .total_timeout(Duration::from_millis(1))
        .callback(callback)
        .execute()
        .unwrap();

    let expired = h.holder.sweep(Instant::now() + Duration::from_millis(5));
    assert_eq!(expired, 1);
    assert_eq!(code_of(&future), Some(RpcCode::Timeout));

    assert!(!h
        .client
        .deliver_response(Response::success(future.request_id(), json!("late"))));
    assert_eq!(code_of(&future), Some(RpcCode::Timeout));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.holder.stats().late_responses.load(Ordering::Relaxed), 1);
}

#[test]
fn test_response_and_sweep_race_completes_once() {
    let h = harness();
    h.routes.register("user.get", vec![host(1)]);

    for _ in 0..200 {
        let (calls, _, callback) = counting_callback();
        let future = h
            .client
            .sender("user.get")
            .params_as_json("{}")
            .total_timeout(Duration::from_millis(1))
            .callback(callback)
            .execute()
            .unwrap();
        let id = future.request_id();
        let barrier = Arc::new(Barrier::new(2));

        let responder = {
            let client = h.client.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                client.deliver_response(Response::success(id, json!("ok")))
            })
        };
        let sweeper = {
            let holder = h.holder.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                holder.sweep(Instant::now() + Duration::from_secs(1))
            })
        };

        let delivered = responder.join().unwrap();
        let expired = sweeper.join().unwrap();

        assert_eq!(delivered as usize + expired, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(future.is_done());
    }
    assert_eq!(h.holder.pending_count(), 0);
}

// ============================================================================
// Timeout and params
// ============================================================================

#[test]
fn test_timeout_defaults_from_settings() {
    let h = harness_with(MapSettings::new().with(TIMEOUT_KEY, 1234));
    h.routes.register("user.get", vec![host(1)]);

    let before = Instant::now();
    let future = h
        .client
        .sender("user.get")
        .params_as_json("{}")
        .total_timeout(Duration::ZERO)
        .execute()
        .unwrap();
    let after = Instant::now();

    let deadline = h.holder.deadline(future.request_id()).unwrap();
    assert!(deadline >= before + Duration::from_millis(1234));
    assert!(deadline <= after + Duration::from_millis(1234));
}

#[test]
fn test_explicit_timeout_wins() {
    let h = harness_with(MapSettings::new().with(TIMEOUT_KEY, 1234));
    h.routes.register("user.get", vec![host(1)]);

    let before = Instant::now();
    let future = h
        .client
        .sender("user.get")
        .params_as_json("{}")
        .total_timeout(Duration::from_secs(60))
        .execute()
        .unwrap();

    let deadline = h.holder.deadline(future.request_id()).unwrap();
    assert!(deadline >= before + Duration::from_secs(60));
}

#[test]
fn test_unbounded_timeout_stays_pending() {
    let h = harness();
    h.routes.register("user.get", vec![host(1)]);

    let before = Instant::now();
    let future = h
        .client
        .sender("user.get")
        .params_as_json("{}")
        .total_timeout(Duration::MAX)
        .execute()
        .unwrap();

    assert!(!future.is_failed());
    assert!(!future.is_done());
    assert!(h.holder.contains(future.request_id()));
    let deadline = h.holder.deadline(future.request_id()).unwrap();
    assert!(deadline >= before + Duration::from_secs(365 * 24 * 3600));
    assert_eq!(h.holder.sweep(Instant::now() + Duration::from_secs(3600)), 0);
}

#[test]
fn test_params_shapes() {
    let h = harness();
    h.routes.register("user.get", vec![host(1)]);

    h.client
        .sender("user.get")
        .params_as_array([json!("ann"), json!(1), json!({"a": true})])
        .execute()
        .unwrap();
    assert_eq!(
        h.sessions.last_request().params,
        Params::Array(vec![
            "\"ann\"".to_string(),
            "1".to_string(),
            "{\"a\":true}".to_string()
        ])
    );

    let mut map = Map::new();
    map.insert("id".to_string(), json!(7));
    h.client.sender("user.get").params_as_map(map).execute().unwrap();
    assert_eq!(
        h.sessions.last_request().params,
        Params::Json("{\"id\":7}".to_string())
    );

    // Later setter replaces the earlier one
    h.client
        .sender("user.get")
        .params_as_array([json!(1)])
        .params_as_json("\"raw\"")
        .execute()
        .unwrap();
    assert_eq!(
        h.sessions.last_request().params,
        Params::Json("\"raw\"".to_string())
    );
}
