//! Remote routing integration tests
//!
//! Two process hubs in one test process talk through a real message router
//! bound to an ephemeral port.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use areg::sync::Timeout;
use areg::transport::{encode_frame, RouterMessage, MAGIC};
use areg::{
    Error, EventData, MessageId, ProcessHub, Proxy, ProxyClient, RemoteConfig, RequestEvent,
    ResponseEvent, ResultType, RouterServer, ServiceInterface, ServiceItem, ServiceKey,
    ServiceKind, ServiceStub, StubAddress, StubBase, Version,
};

const REQ_ADD: MessageId = MessageId::request(0);
const RESP_ADD: MessageId = MessageId::response(0);
const ATTR_TOTAL: MessageId = MessageId::attribute(0);

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn adder_interface() -> Arc<ServiceInterface> {
    Arc::new(
        ServiceInterface::builder("Adder", Version::new(1, 0, 0))
            .request(REQ_ADD, Some(RESP_ADD))
            .response(RESP_ADD)
            .attribute(ATTR_TOTAL)
            .public()
            .build()
            .unwrap(),
    )
}

#[derive(Default)]
struct Adder {
    total: i64,
}

impl ServiceStub for Adder {
    fn process_request(&mut self, stub: &mut StubBase, request: &RequestEvent) -> areg::Result<()> {
        let (a, b): (i64, i64) = request.data.value()?;
        self.total += a + b;
        stub.send_response(RESP_ADD, EventData::from_value(&(a + b))?);
        stub.set_attribute(ATTR_TOTAL, EventData::from_value(&self.total)?);
        Ok(())
    }
}

struct Watcher {
    tx: Mutex<mpsc::Sender<Option<ResponseEvent>>>,
}

impl Watcher {
    fn new() -> (Arc<Self>, mpsc::Receiver<Option<ResponseEvent>>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self { tx: Mutex::new(tx) }), rx)
    }
}

impl ProxyClient for Watcher {
    fn service_connected(&self, _proxy: &Proxy, connected: bool) {
        if !connected {
            let _ = self.tx.lock().unwrap().send(None);
        }
    }

    fn process_response(&self, _proxy: &Proxy, response: &ResponseEvent) {
        let _ = self.tx.lock().unwrap().send(Some(response.clone()));
    }
}

fn start_router() -> RouterServer {
    init_tracing();
    RouterServer::start(&RemoteConfig::new("127.0.0.1", 0)).unwrap()
}

fn remote_hub(name: &str, router: &RouterServer) -> ProcessHub {
    let config = RemoteConfig::new("127.0.0.1", router.port())
        .with_reconnect_interval(Duration::from_millis(100));
    let hub = ProcessHub::builder(name).with_remote(config).build().unwrap();
    let client = hub.router().expect("router connection configured");
    assert!(client.wait_connected(Timeout::Millis(5000)));
    hub
}

/// Service process hosting the adder and client process using it
fn service_pair(router: &RouterServer, prefix: &str) -> (ProcessHub, ProcessHub, Proxy) {
    let service = remote_hub(&format!("{prefix}-service"), router);
    service.start_thread("worker").unwrap();
    service
        .start_stub("worker", "adder", adder_interface(), Adder::default())
        .unwrap();

    let client = remote_hub(&format!("{prefix}-client"), router);
    client.start_thread("ui").unwrap();
    let proxy = client.create_proxy("ui", "adder", adder_interface()).unwrap();
    assert!(proxy.wait_connected(Timeout::Millis(5000)));
    (service, client, proxy)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_remote_call() {
    let router = start_router();
    let (service, client, proxy) = service_pair(&router, "call");
    assert_eq!(router.connection_count(), 2);

    let stub = proxy.stub_address().unwrap();
    assert!(stub.is_remote());
    assert_eq!(
        client.find_stub(&ServiceKey::new("Adder", "adder")),
        Some(stub)
    );

    let response = proxy
        .call_blocking(REQ_ADD, EventData::from_value(&(40i64, 2i64)).unwrap(), WAIT)
        .unwrap();
    assert_eq!(response.result(), ResultType::RequestOK);
    assert_eq!(response.data.value::<i64>().unwrap(), 42);

    client.shutdown();
    service.shutdown();
    router.stop();
    assert!(!router.is_running());
}

#[test]
fn test_remote_attribute_notifications() {
    let router = start_router();
    let (service, client, proxy) = service_pair(&router, "attribute");
    let (watcher, rx) = Watcher::new();
    let id = proxy.register_client(watcher);
    proxy.notify_on(id, ATTR_TOTAL, true).unwrap();

    let initial = rx.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(initial.result(), ResultType::DataInvalid);

    for (a, b) in [(1i64, 2i64), (3, 4)] {
        proxy
            .call_blocking(REQ_ADD, EventData::from_value(&(a, b)).unwrap(), WAIT)
            .unwrap();
    }
    let totals: Vec<i64> = (0..2)
        .map(|_| rx.recv_timeout(WAIT).unwrap().unwrap().data.value().unwrap())
        .collect();
    assert_eq!(totals, vec![3, 10]);
    assert_eq!(proxy.attribute_value::<i64>(ATTR_TOTAL).unwrap(), Some(10));

    client.shutdown();
    service.shutdown();
}

#[test]
fn test_local_stub_preferred_over_remote() {
    let router = start_router();
    let (service, client, proxy) = service_pair(&router, "prefer");
    assert!(proxy.stub_address().unwrap().is_remote());

    client.start_thread("local-worker").unwrap();
    client
        .start_stub("local-worker", "adder", adder_interface(), Adder::default())
        .unwrap();
    assert!(wait_until(|| proxy
        .stub_address()
        .is_some_and(|stub| !stub.is_remote())));

    let response = proxy
        .call_blocking(REQ_ADD, EventData::from_value(&(1i64, 1i64)).unwrap(), WAIT)
        .unwrap();
    assert_eq!(response.data.value::<i64>().unwrap(), 2);

    client.shutdown();
    service.shutdown();
}

#[test]
fn test_peer_loss_disconnects_proxies() {
    let router = start_router();
    let (service, client, proxy) = service_pair(&router, "peer-loss");
    let (watcher, rx) = Watcher::new();
    proxy.register_client(watcher);

    // The service process drops off the router
    service.router().unwrap().stop();
    assert!(matches!(rx.recv_timeout(WAIT), Ok(None)));
    assert!(!proxy.is_connected());
    assert!(client.find_stub(&ServiceKey::new("Adder", "adder")).is_none());
    assert!(wait_until(|| router.connection_count() == 1));

    let err = proxy
        .call_blocking(REQ_ADD, EventData::from_value(&(1i64, 1i64)).unwrap(), WAIT)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::RequestFailed {
            result: ResultType::MessageUndelivered,
            ..
        }
    ));

    client.shutdown();
    service.shutdown();
}

#[test]
fn test_router_stop_disconnects_everyone() {
    let router = start_router();
    let (service, client, proxy) = service_pair(&router, "router-stop");

    router.stop();
    assert!(wait_until(|| !proxy.is_connected()));
    assert!(wait_until(|| !client.is_router_connected()));
    assert!(wait_until(|| !service.is_router_connected()));

    client.shutdown();
    service.shutdown();
}

#[test]
fn test_connection_limit() {
    init_tracing();
    let router =
        RouterServer::start(&RemoteConfig::new("127.0.0.1", 0).with_max_connections(1)).unwrap();
    let first = remote_hub("limit-first", &router);

    let config = RemoteConfig::new("127.0.0.1", router.port())
        .with_reconnect_interval(Duration::from_millis(100));
    let second = ProcessHub::builder("limit-second")
        .with_remote(config)
        .build()
        .unwrap();
    assert!(!second
        .router()
        .unwrap()
        .wait_connected(Timeout::Millis(500)));
    assert_eq!(router.connection_count(), 1);

    // A freed slot lets the waiting process in
    first.shutdown();
    assert!(second
        .router()
        .unwrap()
        .wait_connected(Timeout::Millis(5000)));
    second.shutdown();
}

#[test]
fn test_malformed_frame_drops_connection() {
    let router = start_router();
    let mut stream = TcpStream::connect(("127.0.0.1", router.port())).unwrap();
    stream.set_read_timeout(Some(WAIT)).unwrap();
    assert!(wait_until(|| router.connection_count() == 1));

    stream.write_all(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
    let mut buffer = [0u8; 16];
    match stream.read(&mut buffer) {
        Ok(read) => assert_eq!(read, 0),
        Err(e) => assert_ne!(e.kind(), std::io::ErrorKind::WouldBlock),
    }
    assert!(wait_until(|| router.connection_count() == 0));
    assert!(router.is_running());
}

#[test]
fn test_partial_frame_does_not_stall_router() {
    let router = start_router();
    let mut stalled = TcpStream::connect(("127.0.0.1", router.port())).unwrap();
    let mut header = MAGIC.to_be_bytes().to_vec();
    header.extend_from_slice(&100u32.to_be_bytes());
    stalled.write_all(&header).unwrap();
    assert!(wait_until(|| router.connection_count() == 1));

    // The half-sent frame must not hold up anyone else
    let (service, client, proxy) = service_pair(&router, "partial");
    let response = proxy
        .call_blocking(REQ_ADD, EventData::from_value(&(5i64, 6i64)).unwrap(), WAIT)
        .unwrap();
    assert_eq!(response.data.value::<i64>().unwrap(), 11);
    assert_eq!(router.connection_count(), 3);

    // The body finally arrives and does not decode
    stalled.write_all(&[0xFF; 100]).unwrap();
    assert!(wait_until(|| router.connection_count() == 2));
    assert!(proxy.is_connected());

    client.shutdown();
    service.shutdown();
}

#[test]
fn test_busy_peer_does_not_starve_others() {
    let router = start_router();
    let running = Arc::new(AtomicBool::new(true));

    let mut noisy = TcpStream::connect(("127.0.0.1", router.port())).unwrap();
    noisy
        .write_all(
            &encode_frame(&RouterMessage::Connect {
                name: "noisy".to_string(),
                instance: uuid::Uuid::new_v4(),
            })
            .unwrap(),
        )
        .unwrap();
    // Unregistering a stub that was never registered produces no traffic back
    let stub = StubAddress::new(
        ServiceItem::new("Nothing", Version::new(1, 0, 0), ServiceKind::Public),
        "nothing",
        "nowhere",
    );
    let frame = encode_frame(&RouterMessage::UnregisterStub(stub)).unwrap();
    let burst: Vec<u8> = frame.iter().copied().cycle().take(frame.len() * 256).collect();
    let flooding = running.clone();
    let flooder = std::thread::spawn(move || {
        while flooding.load(Ordering::Relaxed) {
            if noisy.write_all(&burst).is_err() {
                break;
            }
        }
    });

    let (service, client, proxy) = service_pair(&router, "busy");
    for i in 0..10i64 {
        let response = proxy
            .call_blocking(REQ_ADD, EventData::from_value(&(i, 1i64)).unwrap(), WAIT)
            .unwrap();
        assert_eq!(response.data.value::<i64>().unwrap(), i + 1);
    }

    running.store(false, Ordering::Relaxed);
    client.shutdown();
    service.shutdown();
    router.stop();
    flooder.join().unwrap();
}
