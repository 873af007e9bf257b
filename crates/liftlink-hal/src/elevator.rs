//! Elevator relay controller.
//!
//! Wraps the [`ConnectionSupervisor`] of the relay board.  Commands go out
//! as `set_relay` frames; the board answers with `relay_state` frames that
//! are merged into the local [`RelayBoard`] snapshot.  The snapshot is only
//! ever changed by what the device reports.
//!
//! Door and floor actions are [`PulseStep`]s: relay on, fixed hold, relay
//! off.  Nothing confirms that a door actually moved or that the car
//! arrived; the holds are the whole contract.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use liftlink_middleware::{ConnectionSupervisor, EventBus, Topic};
use liftlink_types::{
    ElevatorFrame, Event, EventPayload, LiftError, RelayBoard, RelayChange, RelayName,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::relay::{PulseStep, RelayDriver};
use crate::scheduler::Scheduler;

/// Pulse holds of the door and floor-select buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElevatorTiming {
    pub door_pulse: Duration,
    pub floor_pulse: Duration,
}

impl Default for ElevatorTiming {
    fn default() -> Self {
        Self {
            door_pulse: Duration::from_millis(1_000),
            floor_pulse: Duration::from_millis(500),
        }
    }
}

struct Inner {
    supervisor: ConnectionSupervisor,
    bus: Arc<EventBus>,
    scheduler: Arc<dyn Scheduler>,
    timing: ElevatorTiming,
    board: RwLock<RelayBoard>,
}

#[derive(Clone)]
pub struct ElevatorController {
    inner: Arc<Inner>,
}

impl ElevatorController {
    pub fn new(
        supervisor: ConnectionSupervisor,
        bus: Arc<EventBus>,
        scheduler: Arc<dyn Scheduler>,
        timing: ElevatorTiming,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                supervisor,
                bus,
                scheduler,
                timing,
                board: RwLock::new(RelayBoard::default()),
            }),
        }
    }

    pub fn device_id(&self) -> &str {
        self.inner.supervisor.id()
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.inner.supervisor
    }

    pub fn timing(&self) -> ElevatorTiming {
        self.inner.timing
    }

    /// Snapshot of the last reported relay board.
    pub fn board(&self) -> RelayBoard {
        *self.inner.board.read().unwrap_or_else(|e| e.into_inner())
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    /// Send one `set_relay` frame.  Fails with [`LiftError::NotConnected`]
    /// while the board is unreachable.
    pub async fn set_relay(&self, relay: RelayName, state: bool) -> Result<(), LiftError> {
        let frame = ElevatorFrame::SetRelay { relay, state }.to_text()?;
        self.inner.supervisor.send(Message::text(frame)).await?;
        info!(device_id = self.device_id(), %relay, state, "relay command sent");
        Ok(())
    }

    pub async fn pulse(&self, step: PulseStep) -> Result<(), LiftError> {
        step.execute(self, self.inner.scheduler.as_ref()).await
    }

    pub async fn open_door(&self) -> Result<(), LiftError> {
        self.pulse(PulseStep::new(RelayName::DoorOpen, self.inner.timing.door_pulse))
            .await
    }

    pub async fn close_door(&self) -> Result<(), LiftError> {
        self.pulse(PulseStep::new(RelayName::DoorClose, self.inner.timing.door_pulse))
            .await
    }

    /// Press the call button for `floor`.  Floors without a select relay
    /// fail with [`LiftError::InvalidFloor`] before anything is sent.
    pub async fn select_floor(&self, floor: u8) -> Result<(), LiftError> {
        let relay = RelayName::floor(floor).ok_or(LiftError::InvalidFloor(floor))?;
        self.pulse(PulseStep::new(relay, self.inner.timing.floor_pulse))
            .await
    }

    // ── Inbound ──────────────────────────────────────────────────────────────

    /// Apply one parsed device frame and return the relay changes it caused.
    ///
    /// Device errors are surfaced as [`EventPayload::DeviceFault`] and leave
    /// the connection alone.  Unknown and malformed frames are logged and
    /// dropped.
    pub fn handle_frame(&self, value: &Value) -> Vec<RelayChange> {
        let frame = match ElevatorFrame::from_value(value) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(device_id = self.device_id(), error = %e, "dropping elevator frame");
                return Vec::new();
            }
        };

        match frame {
            ElevatorFrame::RelayState { states } => self.apply_relay_state(states),
            ElevatorFrame::Error { error } => {
                self.surface_device_error(error);
                Vec::new()
            }
            ElevatorFrame::SetRelay { relay, .. } => {
                debug!(device_id = self.device_id(), %relay, "ignoring set_relay echoed by device");
                Vec::new()
            }
            ElevatorFrame::Unknown => {
                debug!(
                    device_id = self.device_id(),
                    frame_type = value.get("type").and_then(serde_json::Value::as_str).unwrap_or(""),
                    "ignoring frame of unknown type"
                );
                Vec::new()
            }
        }
    }

    /// Feed every structured frame of the supervisor into
    /// [`handle_frame`](Self::handle_frame) until the supervisor goes away.
    pub fn spawn_listener(&self) -> JoinHandle<()> {
        let controller = self.clone();
        let mut frames = self.inner.supervisor.subscribe_frames();
        tokio::spawn(async move {
            loop {
                match frames.recv().await {
                    Ok(value) => {
                        controller.handle_frame(&value);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(device_id = controller.device_id(), lagged_by = n, "elevator listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn apply_relay_state(&self, states: std::collections::BTreeMap<String, bool>) -> Vec<RelayChange> {
        let reported = states.into_iter().filter_map(|(name, state)| match name.parse::<RelayName>() {
            Ok(relay) => Some((relay, state)),
            Err(_) => {
                debug!(device_id = self.device_id(), relay = %name, "ignoring unknown relay");
                None
            }
        });

        let (changes, board) = {
            let mut board = self.inner.board.write().unwrap_or_else(|e| e.into_inner());
            let changes = board.merge(reported);
            (changes, *board)
        };
        self.inner.supervisor.record_relays(board);

        for change in &changes {
            info!(
                device_id = self.device_id(),
                "{}: {} -> {}",
                change.relay,
                on_off(change.previous),
                on_off(change.current)
            );
            self.inner.bus.emit(
                Topic::Relay,
                Event::new(
                    self.source(),
                    EventPayload::RelayChanged {
                        device_id: self.device_id().to_string(),
                        change: *change,
                    },
                ),
            );
        }
        changes
    }

    fn surface_device_error(&self, message: String) {
        let error = LiftError::DeviceReported {
            device_id: self.device_id().to_string(),
            message: message.clone(),
        };
        error!(device_id = self.device_id(), %error, "elevator device error");
        self.inner.supervisor.record_device_error(message);
        self.inner.bus.emit(
            Topic::Relay,
            Event::new(
                self.source(),
                EventPayload::DeviceFault {
                    device_id: self.device_id().to_string(),
                    error,
                },
            ),
        );
    }

    fn source(&self) -> String {
        format!("liftlink-hal::elevator/{}", self.device_id())
    }
}

#[async_trait]
impl RelayDriver for ElevatorController {
    async fn set_relay(&self, relay: RelayName, state: bool) -> Result<(), LiftError> {
        ElevatorController::set_relay(self, relay, state).await
    }

    fn relay_state(&self, relay: RelayName) -> bool {
        self.board().get(relay)
    }
}

fn on_off(state: bool) -> &'static str {
    if state { "ON" } else { "OFF" }
}
