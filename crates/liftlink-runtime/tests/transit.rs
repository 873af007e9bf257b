use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use liftlink_hal::{ElevatorController, ElevatorTiming, ManualScheduler, RecordingScheduler, Scheduler};
use liftlink_middleware::testing::FakeDevice;
use liftlink_middleware::{
    ConnectionSupervisor, EventBus, StatusRegistry, SupervisorConfig, Topic, TopicReceiver,
    WsConnector,
};
use liftlink_runtime::{RobotMover, TransitOrchestrator, TransitTiming, Waypoint};
use liftlink_types::{ConnectionState, EventPayload, LiftError, TransitRequest, TransitState};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const WAIT: Duration = Duration::from_secs(3);

#[derive(Default)]
struct ScriptedMover {
    moves: Mutex<Vec<String>>,
    fail_at: Option<String>,
}

impl ScriptedMover {
    fn failing_at(waypoint: &str) -> Self {
        Self {
            fail_at: Some(waypoint.to_string()),
            ..Default::default()
        }
    }

    fn moves(&self) -> Vec<String> {
        self.moves.lock().unwrap().clone()
    }
}

#[async_trait]
impl RobotMover for ScriptedMover {
    async fn move_to(&self, robot_id: &str, waypoint: &Waypoint) -> Result<(), LiftError> {
        let name = waypoint.name();
        self.moves.lock().unwrap().push(name.clone());
        if self.fail_at.as_deref() == Some(name.as_str()) {
            return Err(LiftError::Movement {
                robot_id: robot_id.to_string(),
                details: format!("{name} unreachable"),
            });
        }
        Ok(())
    }
}

struct Rig {
    device: FakeDevice,
    supervisor: ConnectionSupervisor,
    orchestrator: TransitOrchestrator,
    mover: Arc<ScriptedMover>,
    bus: Arc<EventBus>,
    _status: StatusRegistry,
}

async fn rig(scheduler: Arc<dyn Scheduler>, mover: ScriptedMover) -> Result<Rig, Box<dyn std::error::Error>> {
    let device = FakeDevice::start().await?;
    let bus = Arc::new(EventBus::default());
    let status = StatusRegistry::new();
    let supervisor = ConnectionSupervisor::new(
        device.elevator_record("lift"),
        SupervisorConfig {
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(30),
        },
        Arc::new(WsConnector::default()),
        Arc::clone(&bus),
        &status,
    )?;
    let elevator = ElevatorController::new(
        supervisor.clone(),
        Arc::clone(&bus),
        Arc::clone(&scheduler),
        ElevatorTiming::default(),
    );
    let mover = Arc::new(mover);
    let orchestrator = TransitOrchestrator::new(
        elevator,
        mover.clone(),
        scheduler,
        Arc::clone(&bus),
        TransitTiming::default(),
    );
    supervisor.connect();
    supervisor.wait_for_connected(WAIT).await?;
    Ok(Rig {
        device,
        supervisor,
        orchestrator,
        mover,
        bus,
        _status: status,
    })
}

/// `(state, hold_ms)` of every progress event, then the failure if any.
fn drain(events: &mut TopicReceiver) -> (Vec<(TransitState, Option<u64>)>, Option<(TransitState, LiftError)>) {
    let mut progress = Vec::new();
    let mut failure = None;
    while let Ok(event) = events.try_recv() {
        match event.payload {
            EventPayload::TransitProgress { state, hold_ms, .. } => progress.push((state, hold_ms)),
            EventPayload::TransitFailed { failed_in, error, .. } => failure = Some((failed_in, error)),
            _ => {}
        }
    }
    (progress, failure)
}

async fn relay_commands(device: &mut FakeDevice, count: usize) -> Vec<(String, bool)> {
    let mut out = Vec::new();
    for _ in 0..count {
        if let Some(Message::Text(text)) = device.next_inbound().await {
            let value: Value = serde_json::from_str(text.as_str()).unwrap_or(Value::Null);
            out.push((
                value["relay"].as_str().unwrap_or("").to_string(),
                value["state"].as_bool().unwrap_or(false),
            ));
        }
    }
    out
}

fn ms(values: &[u64]) -> Vec<Duration> {
    values.iter().map(|v| Duration::from_millis(*v)).collect()
}

#[tokio::test]
async fn floor_one_to_three_runs_every_step_in_order() -> TestResult {
    let scheduler = RecordingScheduler::new();
    let mut rig = rig(Arc::new(scheduler.clone()), ScriptedMover::default()).await?;
    let mut events = rig.bus.subscribe_to(Topic::Transit);

    let report = rig.orchestrator.execute(TransitRequest::new("R1", 1, 3)).await?;
    assert_eq!(report.robot_id, "R1");
    assert_eq!(report.destination_floor, 3);

    use TransitState::*;
    let (progress, failure) = drain(&mut events);
    assert!(failure.is_none());
    assert_eq!(
        progress,
        vec![
            (ApproachingElevator, None),
            (OpeningEntryDoor, None),
            (AwaitingEntry, Some(5_000)),
            (ClosingEntryDoor, None),
            (SelectingFloor, None),
            (Travelling, Some(10_000)),
            (OpeningExitDoor, None),
            (AwaitingExit, Some(5_000)),
            (ClosingExitDoor, None),
            (Completed, None),
        ]
    );

    assert_eq!(
        scheduler.waits(),
        ms(&[1_000, 5_000, 1_000, 500, 10_000, 1_000, 5_000, 1_000])
    );
    assert_eq!(
        rig.mover.moves(),
        vec!["floor_1_approach", "floor_1_entrance", "floor_3_exit"]
    );

    let commands = relay_commands(&mut rig.device, 10).await;
    let expected: Vec<(String, bool)> = [
        ("doorOpen", true),
        ("doorOpen", false),
        ("doorClose", true),
        ("doorClose", false),
        ("floor3", true),
        ("floor3", false),
        ("doorOpen", true),
        ("doorOpen", false),
        ("doorClose", true),
        ("doorClose", false),
    ]
    .into_iter()
    .map(|(r, s)| (r.to_string(), s))
    .collect();
    assert_eq!(commands, expected);
    assert!(!rig.orchestrator.is_busy("R1"));
    Ok(())
}

#[tokio::test]
async fn second_transit_for_same_robot_is_rejected() -> TestResult {
    let (scheduler, mut clock) = ManualScheduler::new();
    let rig = rig(Arc::new(scheduler), ScriptedMover::default()).await?;

    let first = rig.orchestrator.spawn(TransitRequest::new("R1", 1, 3))?;
    let door_hold = clock.next_wait(WAIT).await.ok_or("first transit never waited")?;
    assert_eq!(door_hold.duration, Duration::from_millis(1_000));
    assert_eq!(first.state(), TransitState::OpeningEntryDoor);

    let second = rig.orchestrator.execute(TransitRequest::new("R1", 2, 4)).await;
    assert_eq!(
        second.map(|r| r.transit_id),
        Err(LiftError::SequenceBusy { robot_id: "R1".into() })
    );
    assert!(matches!(
        rig.orchestrator.spawn(TransitRequest::new("R1", 3, 1)),
        Err(LiftError::SequenceBusy { .. })
    ));
    assert_eq!(rig.orchestrator.active(), vec!["R1".to_string()]);

    // The first transit is unaffected.
    door_hold.release();
    let releaser = tokio::spawn(async move {
        while let Some(wait) = clock.next_wait(WAIT).await {
            wait.release();
        }
    });
    let report = tokio::time::timeout(WAIT, first.wait()).await??;
    assert_eq!(report.origin_floor, 1);
    assert!(!rig.orchestrator.is_busy("R1"));
    releaser.abort();
    Ok(())
}

#[tokio::test]
async fn device_drop_while_travelling_fails_the_transit() -> TestResult {
    let (scheduler, mut clock) = ManualScheduler::new();
    let rig = rig(Arc::new(scheduler), ScriptedMover::default()).await?;
    let mut events = rig.bus.subscribe_to(Topic::Transit);

    let handle = rig.orchestrator.spawn(TransitRequest::new("R1", 1, 3))?;
    let travel = loop {
        let wait = clock.next_wait(WAIT).await.ok_or("transit stalled")?;
        if wait.duration == Duration::from_millis(10_000) {
            break wait;
        }
        wait.release();
    };
    assert_eq!(handle.state(), TransitState::Travelling);

    rig.device.shutdown();
    let deadline = tokio::time::Instant::now() + WAIT;
    while rig.supervisor.state() == ConnectionState::Connected && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    travel.release();

    let result = tokio::time::timeout(WAIT, handle.wait()).await?;
    assert!(matches!(result, Err(LiftError::NotConnected { ref device_id }) if device_id == "lift"));

    let (progress, failure) = drain(&mut events);
    let (failed_in, error) = failure.ok_or("no failure event")?;
    assert_eq!(failed_in, TransitState::OpeningExitDoor);
    assert!(matches!(error, LiftError::NotConnected { .. }));
    assert!(
        progress
            .iter()
            .all(|(s, _)| s.ordinal() <= TransitState::OpeningExitDoor.ordinal())
    );
    assert!(!rig.mover.moves().contains(&"floor_3_exit".to_string()));
    assert!(!rig.orchestrator.is_busy("R1"));
    Ok(())
}

#[tokio::test]
async fn movement_failure_aborts_before_any_relay_command() -> TestResult {
    let scheduler = RecordingScheduler::new();
    let mut rig = rig(
        Arc::new(scheduler.clone()),
        ScriptedMover::failing_at("floor_1_entrance"),
    )
    .await?;
    let mut events = rig.bus.subscribe_to(Topic::Transit);

    let result = rig.orchestrator.execute(TransitRequest::new("R1", 1, 2)).await;
    assert!(matches!(result, Err(LiftError::Movement { .. })));

    let (progress, failure) = drain(&mut events);
    assert_eq!(progress, vec![(TransitState::ApproachingElevator, None)]);
    assert_eq!(failure.map(|(s, _)| s), Some(TransitState::ApproachingElevator));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rig.device.drain_inbound().is_empty());
    assert!(scheduler.waits().is_empty());
    assert!(!rig.orchestrator.is_busy("R1"));
    Ok(())
}

#[tokio::test]
async fn invalid_destination_fails_at_floor_selection() -> TestResult {
    let scheduler = RecordingScheduler::new();
    let mut rig = rig(Arc::new(scheduler.clone()), ScriptedMover::default()).await?;
    let mut events = rig.bus.subscribe_to(Topic::Transit);

    let result = rig.orchestrator.execute(TransitRequest::new("R1", 1, 6)).await;
    assert_eq!(result.map(|r| r.transit_id), Err(LiftError::InvalidFloor(6)));

    let (progress, failure) = drain(&mut events);
    let states: Vec<_> = progress.iter().map(|(s, _)| *s).collect();
    assert_eq!(
        &states[states.len() - 2..],
        &[TransitState::ClosingEntryDoor, TransitState::SelectingFloor]
    );
    assert_eq!(failure.map(|(s, _)| s), Some(TransitState::SelectingFloor));

    // Entry door was pulsed; no floor relay was touched.
    let commands = relay_commands(&mut rig.device, 4).await;
    assert!(commands.iter().all(|(relay, _)| relay.starts_with("door")));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rig.device.drain_inbound().is_empty());
    Ok(())
}
