use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use liftlink_middleware::testing::{FakeDevice, RefusingDevice};
use liftlink_middleware::{
    EventBus, RelayProxy, RelayStats, StaticDirectory, StatusRegistry, SupervisorConfig,
    SupervisorRegistry, WsConnector,
};
use liftlink_types::{ConnectionState, DeviceRecord, LiftError};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, connect_async};

type TestResult = Result<(), Box<dyn std::error::Error>>;
type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(3);

fn proxy_for(records: Vec<DeviceRecord>) -> (RelayProxy, SupervisorRegistry) {
    let registry = SupervisorRegistry::new(
        SupervisorConfig {
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_millis(50),
        },
        Arc::new(WsConnector::default()),
        Arc::new(EventBus::default()),
        StatusRegistry::new(),
    );
    let directory = Arc::new(StaticDirectory::new(records));
    (RelayProxy::new(directory, registry.clone()), registry)
}

/// Open a session for `device_id` and connect a websocket client to it.
async fn attach(
    proxy: &RelayProxy,
    device_id: &str,
) -> Result<(Client, JoinHandle<RelayStats>), Box<dyn std::error::Error>> {
    let session = proxy.open_session(device_id)?;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept client");
        let ws = accept_async(stream).await.expect("client handshake");
        session.run(ws).await
    });
    let (client, _) = connect_async(format!("ws://{addr}")).await?;
    Ok((client, task))
}

async fn next_frame(client: &mut Client) -> Option<Message> {
    tokio::time::timeout(WAIT, client.next())
        .await
        .ok()
        .flatten()
        .and_then(Result::ok)
}

#[tokio::test]
async fn unknown_device_is_rejected() {
    let (proxy, registry) = proxy_for(vec![]);
    let result = proxy.open_session("R404");
    assert!(matches!(result, Err(LiftError::RelayTargetUnknown(ref id)) if id == "R404"));
    assert!(registry.ids().is_empty());
}

#[tokio::test]
async fn frames_are_forwarded_verbatim_both_ways() -> TestResult {
    let mut device = FakeDevice::start().await?;
    let (proxy, registry) = proxy_for(vec![device.robot_record("R1")]);

    let (mut client, _task) = attach(&proxy, "R1").await?;
    registry
        .get("R1")
        .ok_or("supervisor missing")?
        .wait_for_connected(WAIT)
        .await?;

    // Odd spacing and key order must survive untouched.
    let upstream = r#"{ "op":"subscribe",  "topic":"/tracked_pose" }"#;
    client.send(Message::text(upstream)).await?;
    assert_eq!(device.next_inbound().await, Some(Message::text(upstream)));

    let binary = Message::binary(vec![0x01, 0xfe, 0x00, 0x7f]);
    client.send(binary.clone()).await?;
    assert_eq!(device.next_inbound().await, Some(binary));

    let downstream = r#"{"topic":"/tracked_pose","pos":[1.5, 2.25]}"#;
    device.push_text(downstream);
    assert_eq!(next_frame(&mut client).await, Some(Message::text(downstream)));
    Ok(())
}

#[tokio::test]
async fn sessions_share_one_supervisor_and_close_independently() -> TestResult {
    let mut device = FakeDevice::start().await?;
    let (proxy, registry) = proxy_for(vec![device.robot_record("R1")]);

    let (mut first, first_task) = attach(&proxy, "R1").await?;
    let (mut second, _second_task) = attach(&proxy, "R1").await?;
    assert_eq!(registry.ids(), vec!["R1".to_string()]);

    let supervisor = registry.get("R1").ok_or("supervisor missing")?;
    supervisor.wait_for_connected(WAIT).await?;

    // Prove both pumps are running before the device talks.
    first.send(Message::text("a")).await?;
    second.send(Message::text("b")).await?;
    let mut got = vec![device.next_inbound().await, device.next_inbound().await];
    got.sort_by_key(|m| format!("{m:?}"));
    assert_eq!(got, vec![Some(Message::text("a")), Some(Message::text("b"))]);

    device.push_text("fan-out");
    assert_eq!(next_frame(&mut first).await, Some(Message::text("fan-out")));
    assert_eq!(next_frame(&mut second).await, Some(Message::text("fan-out")));

    first.close(None).await?;
    let stats = tokio::time::timeout(WAIT, first_task).await??;
    assert_eq!(stats.to_device, 1);
    assert_eq!(stats.to_client, 1);

    // The other session and the device link are untouched.
    assert_eq!(supervisor.state(), ConnectionState::Connected);
    second.send(Message::text("still here")).await?;
    assert_eq!(device.next_inbound().await, Some(Message::text("still here")));
    Ok(())
}

#[tokio::test]
async fn client_frames_are_dropped_while_device_is_down() -> TestResult {
    let device = RefusingDevice::start().await?;
    let (proxy, _registry) = proxy_for(vec![device.elevator_record("lift")]);

    let (mut client, task) = attach(&proxy, "lift").await?;
    client.send(Message::text(r#"{"type":"set_relay","relay":"doorOpen","state":true}"#)).await?;
    client.close(None).await?;

    let stats = tokio::time::timeout(WAIT, task).await??;
    assert_eq!(stats.to_device, 0);
    assert_eq!(stats.dropped, 1);
    Ok(())
}

#[tokio::test]
async fn new_client_restarts_a_device_that_gave_up() -> TestResult {
    let device = RefusingDevice::start().await?;
    let (proxy, registry) = proxy_for(vec![device.elevator_record("lift")]);

    let (_first, first_task) = attach(&proxy, "lift").await?;
    let supervisor = registry.get("lift").ok_or("supervisor missing")?;
    supervisor.wait_for_state(ConnectionState::Failed, WAIT).await?;
    tokio::time::timeout(WAIT, first_task).await??;
    assert_eq!(device.accepted(), 3);

    // A fresh round of attempts, and the session ends once it fails again.
    let (mut second, second_task) = attach(&proxy, "lift").await?;
    second.send(Message::text("hello")).await?;
    let stats = tokio::time::timeout(WAIT, second_task).await??;
    assert_eq!(stats.to_device, 0);
    assert_eq!(device.accepted(), 6);
    assert_eq!(supervisor.state(), ConnectionState::Failed);
    Ok(())
}

#[tokio::test]
async fn removed_device_can_be_reopened_while_old_handles_live() -> TestResult {
    let mut device = FakeDevice::start().await?;
    let (proxy, registry) = proxy_for(vec![device.robot_record("R1")]);

    let (_old_client, old_task) = attach(&proxy, "R1").await?;
    let old = registry.get("R1").ok_or("supervisor missing")?;
    old.wait_for_connected(WAIT).await?;

    assert!(registry.remove("R1").await);
    assert!(!registry.remove("R1").await);
    assert_eq!(old.state(), ConnectionState::Disconnected);

    // `old` is still held, as a controller or another session would.
    let (mut client, _task) = attach(&proxy, "R1").await?;
    registry
        .get("R1")
        .ok_or("supervisor missing")?
        .wait_for_connected(WAIT)
        .await?;
    client.send(Message::text("after remove")).await?;
    assert_eq!(device.next_inbound().await, Some(Message::text("after remove")));

    tokio::time::timeout(WAIT, old_task).await??;
    drop(old);
    Ok(())
}
