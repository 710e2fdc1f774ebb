//! Calculator service over local dispatch or the message router

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use areg::sync::Timeout;
use areg::{
    EventData, MessageId, ProcessHub, Proxy, ProxyClient, RemoteConfig, RequestEvent,
    ResponseEvent, ResultType, RouterServer, ServiceInterface, ServiceStub, StubBase, Version,
};
use serde::{Deserialize, Serialize};

const REQ_ADD: MessageId = MessageId::request(0);
const REQ_DIVIDE: MessageId = MessageId::request(1);
const RESP_ADD: MessageId = MessageId::response(0);
const RESP_DIVIDE: MessageId = MessageId::response(1);
const BCAST_RESULT: MessageId = MessageId::response(2);
const ATTR_CALLS: MessageId = MessageId::attribute(0);

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Operands {
    pub a: i64,
    pub b: i64,
}

fn calculator_interface() -> anyhow::Result<Arc<ServiceInterface>> {
    let interface = ServiceInterface::builder("Calculator", Version::new(1, 0, 0))
        .request(REQ_ADD, Some(RESP_ADD))
        .request(REQ_DIVIDE, Some(RESP_DIVIDE))
        .response(RESP_ADD)
        .response(RESP_DIVIDE)
        .broadcast(BCAST_RESULT)
        .attribute(ATTR_CALLS)
        .public()
        .build()?;
    Ok(Arc::new(interface))
}

#[derive(Default)]
pub struct Calculator {
    calls: u32,
}

impl ServiceStub for Calculator {
    fn process_request(&mut self, stub: &mut StubBase, request: &RequestEvent) -> areg::Result<()> {
        let Operands { a, b } = request.data.value()?;
        let (response, result) = match request.msg_id() {
            REQ_ADD => (RESP_ADD, a + b),
            REQ_DIVIDE if b == 0 => {
                return Err(areg::Error::invalid_request(
                    "division by zero",
                    Some("b".to_string()),
                ))
            }
            REQ_DIVIDE => (RESP_DIVIDE, a / b),
            other => {
                return Err(areg::Error::unknown_message(stub.interface().name(), other.0))
            }
        };
        println!("🧮 {} computed {result}", stub.address().role);

        self.calls += 1;
        stub.send_response(response, EventData::from_value(&result)?);
        stub.send_broadcast(BCAST_RESULT, EventData::from_value(&result)?);
        stub.set_attribute(ATTR_CALLS, EventData::from_value(&self.calls)?);
        Ok(())
    }

    fn startup(&mut self, stub: &mut StubBase) {
        println!("✅ Calculator '{}' ready", stub.address().role);
        if let Ok(data) = EventData::from_value(&self.calls) {
            stub.set_attribute(ATTR_CALLS, data);
        }
    }
}

/// Prints notifications of the calculator
struct Display;

impl ProxyClient for Display {
    fn service_connected(&self, proxy: &Proxy, connected: bool) {
        let state = if connected { "connected" } else { "disconnected" };
        println!("🔗 {} {}", proxy.address(), state);
    }

    fn process_response(&self, _proxy: &Proxy, response: &ResponseEvent) {
        match (response.msg_id(), response.result()) {
            (ATTR_CALLS, ResultType::DataOK) => {
                if let Ok(calls) = response.data.value::<u32>() {
                    println!("📊 Calls served: {calls}");
                }
            }
            (BCAST_RESULT, ResultType::DataOK) => {
                if let Ok(result) = response.data.value::<i64>() {
                    println!("📣 Result broadcast: {result}");
                }
            }
            (msg_id, result) => println!("ℹ️  {msg_id}: {result}"),
        }
    }
}

async fn run_client(hub: &ProcessHub) -> anyhow::Result<()> {
    hub.start_thread("display")?;
    let proxy = hub.create_proxy("display", "calculator", calculator_interface()?)?;
    let display = proxy.register_client(Arc::new(Display));
    proxy.notify_on(display, ATTR_CALLS, true)?;
    proxy.notify_on(display, BCAST_RESULT, true)?;

    let waiter = proxy.clone();
    let connected =
        tokio::task::spawn_blocking(move || waiter.wait_connected(Timeout::Millis(10_000))).await?;
    anyhow::ensure!(connected, "calculator service not available");

    let sum = proxy
        .call(REQ_ADD, EventData::from_value(&Operands { a: 10, b: 5 })?, CALL_TIMEOUT)
        .await?;
    println!("✅ 10 + 5 = {}", sum.data.value::<i64>()?);

    let quotient = proxy
        .call(REQ_DIVIDE, EventData::from_value(&Operands { a: 42, b: 6 })?, CALL_TIMEOUT)
        .await?;
    println!("✅ 42 / 6 = {}", quotient.data.value::<i64>()?);

    match proxy
        .call(REQ_DIVIDE, EventData::from_value(&Operands { a: 1, b: 0 })?, CALL_TIMEOUT)
        .await
    {
        Ok(response) => println!("❓ 1 / 0 = {:?}", response.data.value::<i64>()),
        Err(e) => println!("❌ 1 / 0 failed: {e}"),
    }

    // Let the last notifications arrive
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

fn start_services(hub: &ProcessHub) -> anyhow::Result<()> {
    hub.start_thread("worker")?;
    hub.start_stub("worker", "calculator", calculator_interface()?, Calculator::default())?;
    Ok(())
}

fn router_config(port: Option<&String>) -> anyhow::Result<RemoteConfig> {
    let mut config = RemoteConfig::default();
    if let Some(port) = port {
        config.port = port.parse().context("invalid port")?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("router") => {
            let router = RouterServer::start(&router_config(args.get(2))?)?;
            println!("🔄 Router running on {}... Press Ctrl+C to stop", router.address());
            tokio::signal::ctrl_c().await?;
            router.stop();
            Ok(())
        }
        Some("services") => {
            let hub = ProcessHub::builder("calculator_services")
                .with_remote(router_config(args.get(2))?)
                .build()?;
            start_services(&hub)?;
            println!("🔄 Services running... Press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;
            hub.shutdown();
            Ok(())
        }
        Some("client") => {
            let hub = ProcessHub::builder("calculator_client")
                .with_remote(router_config(args.get(2))?)
                .build()?;
            let result = run_client(&hub).await;
            hub.shutdown();
            result?;
            println!("✅ Client completed!");
            Ok(())
        }
        _ => {
            println!("Usage: {} [router|services|client] [port]", args[0]);
            println!("🎬 Running demo with services and client in one process...");

            let hub = ProcessHub::new("calculator_demo");
            start_services(&hub)?;
            let result = run_client(&hub).await;
            hub.shutdown();
            result?;
            println!("\n🎯 Demo completed!");
            Ok(())
        }
    }
}
