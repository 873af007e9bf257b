use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use liftlink_cockpit::GatewayServer;
use liftlink_hal::{ElevatorController, ElevatorTiming, RecordingScheduler};
use liftlink_middleware::testing::FakeDevice;
use liftlink_middleware::{
    ConnectionSupervisor, DeviceDirectory, EventBus, RelayProxy, StaticDirectory, StatusRegistry,
    SupervisorConfig, SupervisorRegistry, Topic, WsConnector,
};
use liftlink_runtime::{RobotMover, TransitOrchestrator, TransitTiming, Waypoint};
use liftlink_types::{DeviceRecord, Event, EventPayload, LiftError};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type TestResult = Result<(), Box<dyn std::error::Error>>;
type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(3);

struct Gateway {
    addr: SocketAddr,
    bus: Arc<EventBus>,
    supervisors: SupervisorRegistry,
}

async fn start(records: Vec<DeviceRecord>, transit: Option<TransitOrchestrator>) -> Result<Gateway, Box<dyn std::error::Error>> {
    let bus = Arc::new(EventBus::default());
    let status = StatusRegistry::new();
    start_with(records, transit, bus, status).await
}

async fn start_with(
    records: Vec<DeviceRecord>,
    transit: Option<TransitOrchestrator>,
    bus: Arc<EventBus>,
    status: StatusRegistry,
) -> Result<Gateway, Box<dyn std::error::Error>> {
    let directory: Arc<dyn DeviceDirectory> = Arc::new(StaticDirectory::new(records));
    let supervisors = SupervisorRegistry::new(
        SupervisorConfig {
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_millis(50),
        },
        Arc::new(WsConnector::default()),
        Arc::clone(&bus),
        status.clone(),
    );
    let proxy = RelayProxy::new(Arc::clone(&directory), supervisors.clone());
    let mut server = GatewayServer::new(Arc::clone(&bus), status, directory, proxy);
    if let Some(orchestrator) = transit {
        server = server.with_transit(orchestrator);
    }

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(server.serve(listener));
    Ok(Gateway {
        addr,
        bus,
        supervisors,
    })
}

async fn next_frame(client: &mut Client) -> Option<Message> {
    tokio::time::timeout(WAIT, client.next())
        .await
        .ok()
        .flatten()
        .and_then(Result::ok)
}

async fn http_get(addr: SocketAddr, path: &str) -> Result<String, Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect(addr).await?;
    stream
        .write_all(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
        .await?;
    let mut response = String::new();
    tokio::time::timeout(WAIT, stream.read_to_string(&mut response)).await??;
    Ok(response)
}

/// Never finishes a move, so a started transit keeps its robot claimed.
struct StalledMover;

#[async_trait]
impl RobotMover for StalledMover {
    async fn move_to(&self, _robot_id: &str, _waypoint: &Waypoint) -> Result<(), LiftError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn unknown_relay_target_gets_404() -> TestResult {
    let gateway = start(vec![], None).await?;

    let err = connect_async(format!("ws://{}/?robotId=ghost", gateway.addr))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 404),
        other => panic!("expected HTTP 404, got {other:?}"),
    }
    assert!(gateway.supervisors.ids().is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_robot_id_gets_404() -> TestResult {
    let gateway = start(vec![], None).await?;
    let err = connect_async(format!("ws://{}/relay", gateway.addr))
        .await
        .unwrap_err();
    assert!(matches!(err, tungstenite::Error::Http(ref r) if r.status() == 404));
    Ok(())
}

#[tokio::test]
async fn relay_path_forwards_frames_both_ways() -> TestResult {
    let mut device = FakeDevice::start().await?;
    let gateway = start(vec![device.robot_record("R1")], None).await?;

    let (mut client, _) = connect_async(format!("ws://{}/?robotId=R1", gateway.addr)).await?;
    let supervisor = gateway.supervisors.get("R1").expect("supervisor created");
    supervisor.wait_for_connected(WAIT).await?;

    client.send(Message::text(r#"{"cmd":"ping"}"#)).await?;
    assert_eq!(
        device.next_inbound().await,
        Some(Message::text(r#"{"cmd":"ping"}"#))
    );

    device.push_text(r#"{"battery":87}"#);
    assert_eq!(
        next_frame(&mut client).await,
        Some(Message::text(r#"{"battery":87}"#))
    );
    Ok(())
}

#[tokio::test]
async fn status_endpoint_reports_devices() -> TestResult {
    let device = FakeDevice::start().await?;
    let gateway = start(vec![device.robot_record("R1")], None).await?;
    let (_client, _) = connect_async(format!("ws://{}/relay?robotId=R1", gateway.addr)).await?;
    gateway
        .supervisors
        .get("R1")
        .expect("supervisor created")
        .wait_for_connected(WAIT)
        .await?;

    let response = http_get(gateway.addr, "/status").await?;
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    let body: Value = serde_json::from_str(response.split("\r\n\r\n").nth(1).unwrap_or(""))?;
    assert_eq!(body["devices"][0]["device_id"], "R1");
    assert_eq!(body["devices"][0]["connection"], "connected");
    Ok(())
}

#[tokio::test]
async fn plain_http_elsewhere_is_404() -> TestResult {
    let gateway = start(vec![], None).await?;
    let response = http_get(gateway.addr, "/favicon.ico").await?;
    assert!(response.starts_with("HTTP/1.1 404"));
    Ok(())
}

#[tokio::test]
async fn events_stream_bus_traffic() -> TestResult {
    let gateway = start(vec![], None).await?;
    let (mut client, _) = connect_async(format!("ws://{}/events", gateway.addr)).await?;

    gateway.bus.emit(
        Topic::Alerts,
        Event::new("test", EventPayload::OperatorAlert("door stuck".into())),
    );

    let Some(Message::Text(text)) = next_frame(&mut client).await else {
        panic!("expected an event frame");
    };
    let event: Event = serde_json::from_str(text.as_str())?;
    assert!(matches!(event.payload, EventPayload::OperatorAlert(ref m) if m == "door stuck"));
    Ok(())
}

#[tokio::test]
async fn topic_filter_skips_other_lanes() -> TestResult {
    let gateway = start(vec![], None).await?;
    let (mut client, _) =
        connect_async(format!("ws://{}/events?topic=alerts", gateway.addr)).await?;

    gateway.bus.emit(
        Topic::Connection,
        Event::new("test", EventPayload::OperatorAlert("wrong lane".into())),
    );
    gateway.bus.emit(
        Topic::Alerts,
        Event::new("test", EventPayload::OperatorAlert("right lane".into())),
    );

    let Some(Message::Text(text)) = next_frame(&mut client).await else {
        panic!("expected an event frame");
    };
    let event: Event = serde_json::from_str(text.as_str())?;
    assert!(matches!(event.payload, EventPayload::OperatorAlert(ref m) if m == "right lane"));
    Ok(())
}

#[tokio::test]
async fn transit_requests_are_accepted_then_rejected_while_busy() -> TestResult {
    let lift = FakeDevice::start().await?;
    let bus = Arc::new(EventBus::default());
    let status = StatusRegistry::new();
    let supervisor = ConnectionSupervisor::new(
        lift.elevator_record("lift"),
        SupervisorConfig::default(),
        Arc::new(WsConnector::default()),
        Arc::clone(&bus),
        &status,
    )?;
    let scheduler = Arc::new(RecordingScheduler::new());
    let elevator = ElevatorController::new(
        supervisor,
        Arc::clone(&bus),
        scheduler.clone(),
        ElevatorTiming::default(),
    );
    let orchestrator = TransitOrchestrator::new(
        elevator,
        Arc::new(StalledMover),
        scheduler,
        Arc::clone(&bus),
        TransitTiming::default(),
    );
    let robot = DeviceRecord::robot("R1", "127.0.0.1", "127.0.0.1", "s");
    let gateway = start_with(vec![robot], Some(orchestrator), bus, status).await?;
    let (mut client, _) = connect_async(format!("ws://{}/events?topic=alerts", gateway.addr)).await?;

    let request = json!({"op": "transit", "robotId": "R1", "from": 1, "to": 2});
    client.send(Message::text(request.to_string())).await?;
    let Some(Message::Text(text)) = next_frame(&mut client).await else {
        panic!("expected a reply");
    };
    let reply: Value = serde_json::from_str(text.as_str())?;
    assert_eq!(reply["type"], "transit_accepted");
    assert_eq!(reply["robotId"], "R1");
    assert!(reply["transitId"].is_string());

    client.send(Message::text(request.to_string())).await?;
    let Some(Message::Text(text)) = next_frame(&mut client).await else {
        panic!("expected a reply");
    };
    let reply: Value = serde_json::from_str(text.as_str())?;
    assert_eq!(reply["type"], "transit_rejected");

    let unknown = json!({"op": "transit", "robotId": "R9", "from": 1, "to": 2});
    client.send(Message::text(unknown.to_string())).await?;
    let Some(Message::Text(text)) = next_frame(&mut client).await else {
        panic!("expected a reply");
    };
    let reply: Value = serde_json::from_str(text.as_str())?;
    assert_eq!(reply["type"], "transit_rejected");
    assert_eq!(reply["robotId"], "R9");
    Ok(())
}
