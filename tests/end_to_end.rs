//! End-to-end: RegistryServer + Session + DynamicClient dalam satu proses
//!
//! Server jalan di thread sendiri dengan `run_until`, client di thread test.
//!
//! Usage:
//!   cargo test --test end_to_end -- --nocapture

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use wirecall::registry::demo;
use wirecall::{
    ClientConfig, CommandId, Dialect, DynamicClient, Error, RecordLayout, Registry,
    RegistryConfig, RegistryServer, Session, StreamState, Strictness, Transport, TransportError,
    Value,
};

struct Running {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn start(registry: Registry) -> Running {
    let config = RegistryConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        tick: Duration::from_millis(5),
        layout: RecordLayout::Current,
    };
    let mut server = RegistryServer::bind(registry, config).unwrap();
    let addr = server.local_addr().unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    let flag = stop.clone();
    let handle = thread::spawn(move || {
        server.run_until(&flag).unwrap();
    });

    Running {
        addr,
        stop,
        handle: Some(handle),
    }
}

fn client(addr: SocketAddr, dialect: Dialect) -> DynamicClient<Session> {
    let config = ClientConfig::new("127.0.0.1", addr.port())
        .with_dialect(dialect)
        .with_call_timeout(Duration::from_secs(5));
    let session = Session::open(config).unwrap();
    DynamicClient::connect(session, RecordLayout::Current, Strictness::Lenient).unwrap()
}

fn no_inputs() -> Vec<(String, String)> {
    Vec::new()
}

#[test]
fn test_discovery_lists_demo_contracts() {
    let server = start(demo::registry(Instant::now()).unwrap());
    let client = client(server.addr, Dialect::Http);

    let ids: Vec<char> = client.contracts().iter().map(|c| c.id.as_char()).collect();
    assert_eq!(ids, vec!['1', '2', '3', '4', 'L']);
    assert!(client.contract(CommandId::new(b'3')).unwrap().is_stream());
}

#[test]
fn test_unary_calls_over_both_dialects() {
    let server = start(demo::registry(Instant::now()).unwrap());

    for dialect in [Dialect::Http, Dialect::Raw] {
        let mut client = client(server.addr, dialect);

        let weather = client.call(CommandId::new(b'1'), &no_inputs()).unwrap();
        assert_eq!(weather.raw.len(), 24);
        let record = weather.decoded.unwrap();
        assert_eq!(record.get("date"), Some(&Value::U32(20260120)));
        assert_eq!(record.get("summary"), Some(&Value::Text("Chilly".into())));

        let status = client.call(CommandId::new(b'2'), &no_inputs()).unwrap();
        assert_eq!(status.raw, b"OK");
    }
}

#[test]
fn test_register_then_login() {
    let server = start(demo::registry(Instant::now()).unwrap());
    let mut client = client(server.addr, Dialect::Http);

    let registered = client
        .call(
            CommandId::new(b'4'),
            &[("name", "Ann"), ("email", "ann@example.com"), ("password", "pw")],
        )
        .unwrap();
    let record = registered.decoded.unwrap();
    assert_eq!(record.get("id"), Some(&Value::U32(1)));
    assert_eq!(record.get("email"), Some(&Value::Text("ann@example.com".into())));

    let duplicate = client
        .call(
            CommandId::new(b'4'),
            &[("name", "Ann"), ("email", "ann@example.com"), ("password", "pw")],
        )
        .unwrap();
    assert_eq!(duplicate.raw, demo::DUPLICATE_REPLY);

    let login = client
        .call(CommandId::new(b'L'), &[("email", "ann@example.com"), ("password", "pw")])
        .unwrap();
    assert_eq!(login.decoded.unwrap().get("name"), Some(&Value::Text("Ann".into())));

    let rejected = client
        .call(CommandId::new(b'L'), &[("email", "ann@example.com"), ("password", "nope")])
        .unwrap();
    assert!(rejected.raw.is_empty());
}

#[test]
fn test_unknown_id_is_404_over_http() {
    let server = start(demo::registry(Instant::now()).unwrap());
    let mut client = client(server.addr, Dialect::Http);

    match client.transport_mut().call(CommandId::new(b'Z'), None) {
        Err(TransportError::Status { status, .. }) => assert_eq!(status, 404),
        other => panic!("expected 404, got {:?}", other),
    }

    // Not in the snapshot, so the dynamic client refuses before sending.
    assert!(matches!(
        client.call(CommandId::new(b'Z'), &no_inputs()),
        Err(Error::UnknownCommand(_))
    ));
}

#[test]
fn test_unknown_id_is_empty_over_raw() {
    let server = start(demo::registry(Instant::now()).unwrap());
    let mut client = client(server.addr, Dialect::Raw);

    let raw = client.transport_mut().call(CommandId::new(b'Z'), None).unwrap();
    assert!(raw.is_empty());
}

#[test]
fn test_stream_delivers_in_order_and_unsubscribes() {
    let mut registry = Registry::new();
    let mut letters = b"ABC".iter();
    registry
        .register_stream(CommandId::new(b'S'), "Letters", 1, "c1:letter", move || {
            letters.next().map(|b| vec![*b]).unwrap_or_default()
        })
        .unwrap();
    let server = start(registry);
    let mut client = client(server.addr, Dialect::Http);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let subscription = client
        .subscribe(CommandId::new(b'S'), move |response| {
            let letter = response
                .decoded
                .ok()
                .and_then(|r| r.get("letter").and_then(Value::as_text).map(str::to_string))
                .unwrap_or_default();
            sink.borrow_mut().push(letter);
        })
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.borrow().len() < 3 && Instant::now() < deadline {
        client.run_for(Duration::from_millis(20)).unwrap();
    }
    assert_eq!(subscription.state(), StreamState::Open);
    assert_eq!(*seen.borrow(), vec!["A", "B", "C"]);

    subscription.unsubscribe();
    subscription.unsubscribe();
    client.run_for(Duration::from_millis(50)).unwrap();

    assert_eq!(subscription.state(), StreamState::Closed);
    assert!(subscription.last_error().is_none());
    assert_eq!(client.transport().in_flight(), 0);
}

#[test]
fn test_subscribe_to_unary_is_rejected() {
    let server = start(demo::registry(Instant::now()).unwrap());
    let mut client = client(server.addr, Dialect::Http);

    let outcome = client.subscribe(CommandId::new(b'1'), |_| {});
    assert!(matches!(outcome, Err(Error::WrongKind { .. })));
}

#[test]
fn test_unusual_command_bytes_reach_their_handler() {
    let mut registry = Registry::new();
    for (byte, name) in [(b' ', "Space"), (0xE9u8, "Latin"), (b'%', "Percent")] {
        registry
            .register_command(CommandId::new(byte), name, 1, "", "u8:id", move |_| vec![byte])
            .unwrap();
    }
    let server = start(registry);

    for dialect in [Dialect::Http, Dialect::Raw] {
        let mut client = client(server.addr, dialect);
        assert_eq!(client.contracts().len(), 3);
        for byte in [b' ', 0xE9u8, b'%'] {
            let response = client.call(CommandId::new(byte), &no_inputs()).unwrap();
            assert_eq!(response.raw, vec![byte], "{:?} {:?}", dialect, byte);
        }
    }
}
