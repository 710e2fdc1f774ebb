//! Dispatch and framing benchmarks for areg

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

use areg::event::classes;
use areg::sync::Timeout;
use areg::transport::{decode_header, encode_frame, RouterMessage};
use areg::{
    AddressFilter, Channel, CustomEvent, DispatchContext, Event, EventData, EventFilter, MessageId,
    ProcessHub, ProxyAddress, RemoteEvent, RequestEvent, ServiceInterface, ServiceStub, StubAddress,
    StubBase, Version,
};

const REQ_ECHO: MessageId = MessageId::request(0);
const RESP_ECHO: MessageId = MessageId::response(0);

areg::runtime_class!(BENCH_EVENT = "BenchEvent" : classes::CUSTOM_EVENT);

struct Echo;

impl ServiceStub for Echo {
    fn process_request(&mut self, stub: &mut StubBase, request: &RequestEvent) -> areg::Result<()> {
        stub.send_response(RESP_ECHO, request.data.clone());
        Ok(())
    }
}

fn echo_interface() -> Arc<ServiceInterface> {
    Arc::new(
        ServiceInterface::builder("Echo", Version::new(1, 0, 0))
            .request(REQ_ECHO, Some(RESP_ECHO))
            .response(RESP_ECHO)
            .build()
            .unwrap(),
    )
}

/// Frame encoding of remote requests
fn benchmark_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");
    let service = echo_interface().service_item();

    for size in [64, 1024, 16384].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("encode_request", size), size, |b, &size| {
            let proxy = ProxyAddress::new(service.clone(), "echo", "client")
                .with_channel(Channel::remote(256, 257, 256));
            let stub = StubAddress::new(service.clone(), "echo", "worker")
                .with_channel(Channel::remote(257, 256, 257));
            let data = EventData::from_bytes(vec![0u8; size]);
            b.iter(|| {
                let request = RequestEvent::new(proxy.clone(), stub.clone(), REQ_ECHO, 1, data.clone());
                let frame = encode_frame(&RouterMessage::Event(RemoteEvent::Request(request))).unwrap();
                let mut header = [0u8; 8];
                header.copy_from_slice(&frame[..8]);
                black_box(decode_header(&header).unwrap());
            });
        });
    }

    group.finish();
}

/// Round trip of a call through two dispatcher threads
fn benchmark_local_calls(c: &mut Criterion) {
    let hub = ProcessHub::new("bench_calls");
    hub.start_thread("worker").unwrap();
    hub.start_thread("client").unwrap();
    hub.start_stub("worker", "echo", echo_interface(), Echo).unwrap();
    let proxy = hub.create_proxy("client", "echo", echo_interface()).unwrap();
    assert!(proxy.wait_connected(Timeout::Millis(5000)));

    let mut group = c.benchmark_group("local_calls");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("call_blocking", |b| {
        let data = EventData::from_value(&42u64).unwrap();
        b.iter(|| {
            let response = proxy
                .call_blocking(REQ_ECHO, data.clone(), Duration::from_secs(5))
                .unwrap();
            black_box(response);
        });
    });

    let rt = Runtime::new().unwrap();
    group.bench_function("call_async", |b| {
        let data = EventData::from_value(&42u64).unwrap();
        b.iter(|| {
            let response = rt
                .block_on(proxy.call(REQ_ECHO, data.clone(), Duration::from_secs(5)))
                .unwrap();
            black_box(response);
        });
    });

    group.finish();
    hub.shutdown();
}

/// Custom event throughput to a single consumer
fn benchmark_custom_events(c: &mut Criterion) {
    let hub = ProcessHub::new("bench_events");
    let handle = hub.start_thread("sink").unwrap();
    let (tx, rx) = mpsc::channel::<u32>();
    handle
        .register_consumer(
            "sink",
            vec![EventFilter::new(&classes::CUSTOM_EVENT, AddressFilter::Any)],
            Box::new(move |event: &Event, _ctx: &mut DispatchContext| {
                if let Event::Custom(custom) = event {
                    if let Some(value) = custom.payload::<u32>() {
                        let _ = tx.send(*value);
                    }
                }
            }),
        )
        .unwrap();

    let mut group = c.benchmark_group("custom_events");
    for count in [100u32, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("post_and_drain", count), count, |b, &count| {
            b.iter(|| {
                for i in 0..count {
                    hub.post_custom_event("sink", CustomEvent::new(&BENCH_EVENT, i))
                        .unwrap();
                }
                for _ in 0..count {
                    black_box(rx.recv().unwrap());
                }
            });
        });
    }

    group.finish();
    hub.shutdown();
}

criterion_group!(
    benches,
    benchmark_framing,
    benchmark_local_calls,
    benchmark_custom_events
);

criterion_main!(benches);
