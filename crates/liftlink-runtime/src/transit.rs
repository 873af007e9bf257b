//! Cross-floor transit orchestration.
//!
//! A transit is planned up front as an ordered list of [`TransitStep`]s,
//! one per [`TransitState`], and executed strictly in order:
//!
//! | State | Actions |
//! |---|---|
//! | `ApproachingElevator` | move to `floor_{o}_approach`, then `floor_{o}_entrance` |
//! | `OpeningEntryDoor` | door-open pulse |
//! | `AwaitingEntry` | wait `traverse` |
//! | `ClosingEntryDoor` | door-close pulse |
//! | `SelectingFloor` | floor-select pulse for the destination |
//! | `Travelling` | wait `per_floor_travel × |d − o|` |
//! | `OpeningExitDoor` | door-open pulse |
//! | `AwaitingExit` | move to `floor_{d}_exit`, wait `traverse` |
//! | `ClosingExitDoor` | door-close pulse |
//!
//! The first failing action moves the transit to `Failed` with the error
//! attached; nothing already done is undone.  At most one transit per robot
//! runs at a time.  Transits of different robots are *not* serialised
//! against each other on the shared elevator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use liftlink_hal::{ElevatorController, Scheduler};
use liftlink_middleware::{EventBus, Topic};
use liftlink_types::{Event, EventPayload, LiftError, TransitRequest, TransitState};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::movement::{RobotMover, Waypoint};

/// Fixed waits standing in for hardware feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitTiming {
    /// Time allowed for the robot to drive into or out of the car.
    pub traverse: Duration,
    /// Car travel time per floor.
    pub per_floor_travel: Duration,
}

impl Default for TransitTiming {
    fn default() -> Self {
        Self {
            traverse: Duration::from_millis(5_000),
            per_floor_travel: Duration::from_millis(5_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitAction {
    Move(Waypoint),
    OpenDoor,
    CloseDoor,
    SelectFloor(u8),
    Wait(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitStep {
    pub state: TransitState,
    pub actions: Vec<TransitAction>,
    /// Fixed wait carried by this state, reported with its progress event.
    pub hold: Option<Duration>,
}

impl TransitStep {
    fn new(state: TransitState, actions: Vec<TransitAction>) -> Self {
        let hold = actions.iter().find_map(|a| match a {
            TransitAction::Wait(d) => Some(*d),
            _ => None,
        });
        Self { state, actions, hold }
    }
}

/// The full ordered step list for `request`.
pub fn plan(request: &TransitRequest, timing: &TransitTiming) -> Vec<TransitStep> {
    use TransitAction::*;
    use TransitState as S;

    let origin = request.origin_floor;
    let destination = request.destination_floor;
    let travel = timing.per_floor_travel * request.floor_distance();

    vec![
        TransitStep::new(
            S::ApproachingElevator,
            vec![Move(Waypoint::approach(origin)), Move(Waypoint::entrance(origin))],
        ),
        TransitStep::new(S::OpeningEntryDoor, vec![OpenDoor]),
        TransitStep::new(S::AwaitingEntry, vec![Wait(timing.traverse)]),
        TransitStep::new(S::ClosingEntryDoor, vec![CloseDoor]),
        TransitStep::new(S::SelectingFloor, vec![SelectFloor(destination)]),
        TransitStep::new(S::Travelling, vec![Wait(travel)]),
        TransitStep::new(S::OpeningExitDoor, vec![OpenDoor]),
        TransitStep::new(
            S::AwaitingExit,
            vec![Move(Waypoint::exit(destination)), Wait(timing.traverse)],
        ),
        TransitStep::new(S::ClosingExitDoor, vec![CloseDoor]),
    ]
}

/// Outcome of a completed transit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitReport {
    pub transit_id: Uuid,
    pub robot_id: String,
    pub origin_floor: u8,
    pub destination_floor: u8,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

struct Inner {
    elevator: ElevatorController,
    mover: Arc<dyn RobotMover>,
    scheduler: Arc<dyn Scheduler>,
    bus: Arc<EventBus>,
    timing: TransitTiming,
    active: Arc<Mutex<HashMap<String, Uuid>>>,
}

#[derive(Clone)]
pub struct TransitOrchestrator {
    inner: Arc<Inner>,
}

impl TransitOrchestrator {
    pub fn new(
        elevator: ElevatorController,
        mover: Arc<dyn RobotMover>,
        scheduler: Arc<dyn Scheduler>,
        bus: Arc<EventBus>,
        timing: TransitTiming,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                elevator,
                mover,
                scheduler,
                bus,
                timing,
                active: Arc::new(Mutex::new(HashMap::new())),
            }),
        }
    }

    pub fn timing(&self) -> TransitTiming {
        self.inner.timing
    }

    pub fn is_busy(&self, robot_id: &str) -> bool {
        self.lock_active().contains_key(robot_id)
    }

    /// Robots with a transit in flight, sorted.
    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.lock_active().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run a transit to completion on the current task.
    pub async fn execute(&self, request: TransitRequest) -> Result<TransitReport, LiftError> {
        let claim = self.claim(&request)?;
        let (state, _) = watch::channel(TransitState::Idle);
        let result = self.run(&request, &state).await;
        drop(claim);
        result
    }

    /// Claim the robot now and run the transit on its own task.
    ///
    /// The busy check happens before this returns, so a rejected request
    /// never starts.
    pub fn spawn(&self, request: TransitRequest) -> Result<TransitHandle, LiftError> {
        let claim = self.claim(&request)?;
        let (state_tx, state_rx) = watch::channel(TransitState::Idle);
        let transit_id = request.id;
        let robot_id = request.robot_id.clone();
        let orchestrator = self.clone();
        let task = tokio::spawn(async move {
            let result = orchestrator.run(&request, &state_tx).await;
            drop(claim);
            result
        });
        Ok(TransitHandle {
            transit_id,
            robot_id,
            state: state_rx,
            task,
        })
    }

    fn claim(&self, request: &TransitRequest) -> Result<ActiveClaim, LiftError> {
        let mut active = self.lock_active();
        if active.contains_key(&request.robot_id) {
            return Err(LiftError::SequenceBusy {
                robot_id: request.robot_id.clone(),
            });
        }
        active.insert(request.robot_id.clone(), request.id);
        Ok(ActiveClaim {
            active: Arc::clone(&self.inner.active),
            robot_id: request.robot_id.clone(),
        })
    }

    async fn run(
        &self,
        request: &TransitRequest,
        state: &watch::Sender<TransitState>,
    ) -> Result<TransitReport, LiftError> {
        let started_at = Utc::now();
        info!(
            transit_id = %request.id,
            robot_id = %request.robot_id,
            from = request.origin_floor,
            to = request.destination_floor,
            "transit started"
        );

        for step in plan(request, &self.inner.timing) {
            if let Err(error) = self.enter(request, state, step.state, step.hold) {
                return Err(self.fail(request, state, error));
            }
            for action in &step.actions {
                if let Err(error) = self.perform(request, action).await {
                    return Err(self.fail(request, state, error));
                }
            }
        }

        if let Err(error) = self.enter(request, state, TransitState::Completed, None) {
            return Err(self.fail(request, state, error));
        }
        info!(transit_id = %request.id, robot_id = %request.robot_id, "transit completed");
        Ok(TransitReport {
            transit_id: request.id,
            robot_id: request.robot_id.clone(),
            origin_floor: request.origin_floor,
            destination_floor: request.destination_floor,
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn enter(
        &self,
        request: &TransitRequest,
        state: &watch::Sender<TransitState>,
        next: TransitState,
        hold: Option<Duration>,
    ) -> Result<(), LiftError> {
        let current = *state.borrow();
        if !current.can_advance_to(next) {
            return Err(LiftError::Sequence(format!("{current} cannot advance to {next}")));
        }
        state.send_replace(next);
        let hold_ms = hold.map(|d| d.as_millis() as u64);
        info!(transit_id = %request.id, robot_id = %request.robot_id, state = %next, ?hold_ms, "transit state");
        self.inner.bus.emit(
            Topic::Transit,
            Event::new(
                self.source(request),
                EventPayload::TransitProgress {
                    transit_id: request.id,
                    robot_id: request.robot_id.clone(),
                    state: next,
                    hold_ms,
                },
            ),
        );
        Ok(())
    }

    async fn perform(&self, request: &TransitRequest, action: &TransitAction) -> Result<(), LiftError> {
        debug!(transit_id = %request.id, ?action, "transit action");
        let elevator = &self.inner.elevator;
        match action {
            TransitAction::Move(waypoint) => {
                self.inner.mover.move_to(&request.robot_id, waypoint).await
            }
            TransitAction::OpenDoor => elevator.open_door().await,
            TransitAction::CloseDoor => elevator.close_door().await,
            TransitAction::SelectFloor(floor) => elevator.select_floor(*floor).await,
            TransitAction::Wait(duration) => {
                self.inner.scheduler.sleep(*duration).await;
                Ok(())
            }
        }
    }

    fn fail(
        &self,
        request: &TransitRequest,
        state: &watch::Sender<TransitState>,
        error: LiftError,
    ) -> LiftError {
        let failed_in = state.send_replace(TransitState::Failed);
        error!(
            transit_id = %request.id,
            robot_id = %request.robot_id,
            state = %failed_in,
            %error,
            "transit failed; physical intervention may be required"
        );
        self.inner.bus.emit(
            Topic::Transit,
            Event::new(
                self.source(request),
                EventPayload::TransitFailed {
                    transit_id: request.id,
                    robot_id: request.robot_id.clone(),
                    failed_in,
                    error: error.clone(),
                },
            ),
        );
        error
    }

    fn source(&self, request: &TransitRequest) -> String {
        format!("liftlink-runtime::transit/{}", request.robot_id)
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<String, Uuid>> {
        self.inner.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Releases the per-robot claim when the transit retires.
struct ActiveClaim {
    active: Arc<Mutex<HashMap<String, Uuid>>>,
    robot_id: String,
}

impl Drop for ActiveClaim {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.robot_id);
    }
}

/// A transit running on its own task.
pub struct TransitHandle {
    transit_id: Uuid,
    robot_id: String,
    state: watch::Receiver<TransitState>,
    task: JoinHandle<Result<TransitReport, LiftError>>,
}

impl TransitHandle {
    pub fn transit_id(&self) -> Uuid {
        self.transit_id
    }

    pub fn robot_id(&self) -> &str {
        &self.robot_id
    }

    pub fn state(&self) -> TransitState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<TransitState> {
        self.state.clone()
    }

    /// Wait for the terminal outcome.
    pub async fn wait(self) -> Result<TransitReport, LiftError> {
        self.task
            .await
            .map_err(|e| LiftError::Sequence(format!("transit task ended abnormally: {e}")))?
    }
}
