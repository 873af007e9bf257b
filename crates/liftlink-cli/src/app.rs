//! Process wiring: one bus, one status registry, one supervisor per device,
//! the elevator controller, the transit orchestrator and the gateway.

use std::sync::Arc;
use std::time::Duration;

use liftlink_cockpit::GatewayServer;
use liftlink_hal::{ElevatorController, TokioScheduler};
use liftlink_middleware::{
    DeviceDirectory, EventBus, RelayProxy, StaticDirectory, StatusRegistry, SupervisorRegistry,
    WsConnector,
};
use liftlink_runtime::{HttpRobotMover, TransitOrchestrator};
use liftlink_types::{DeviceKind, LiftError};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;

const MOVE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct App {
    pub bus: Arc<EventBus>,
    pub status: StatusRegistry,
    pub directory: Arc<StaticDirectory>,
    pub supervisors: SupervisorRegistry,
    pub elevator: ElevatorController,
    pub transit: TransitOrchestrator,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Build and start everything described by `cfg`.  Must run inside a
    /// Tokio runtime.
    pub fn start(cfg: &Config) -> Result<Self, LiftError> {
        let bus = Arc::new(EventBus::default());
        let status = StatusRegistry::new();
        let directory = Arc::new(StaticDirectory::new(
            std::iter::once(cfg.elevator_record()).chain(cfg.robot_records()),
        ));
        let supervisors = SupervisorRegistry::new(
            cfg.supervisor_config(),
            Arc::new(WsConnector::default()),
            Arc::clone(&bus),
            status.clone(),
        );

        let scheduler = Arc::new(TokioScheduler);
        let elevator_link = supervisors.get_or_create(cfg.elevator_record())?;
        let elevator = ElevatorController::new(
            elevator_link,
            Arc::clone(&bus),
            scheduler.clone(),
            cfg.elevator_timing(),
        );
        let mut tasks = vec![elevator.spawn_listener()];

        for record in cfg.robot_records() {
            supervisors.get_or_create(record)?;
        }

        let mover = HttpRobotMover::new(MOVE_REQUEST_TIMEOUT)?;
        for target in cfg.robot_targets() {
            mover.register(target);
        }
        let transit = TransitOrchestrator::new(
            elevator.clone(),
            Arc::new(mover),
            scheduler,
            Arc::clone(&bus),
            cfg.transit_timing(),
        );

        let shared: Arc<dyn DeviceDirectory> = directory.clone();
        let gateway = GatewayServer::new(
            Arc::clone(&bus),
            status.clone(),
            Arc::clone(&shared),
            RelayProxy::new(shared, supervisors.clone()),
        )
        .with_transit(transit.clone())
        .with_port(cfg.gateway_port);
        let port = gateway.port();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = gateway.run().await {
                error!(error = %e, "gateway stopped");
            }
        }));
        info!(
            port,
            robots = directory.robots().len(),
            elevator = elevator.device_id(),
            "liftlink started"
        );

        Ok(Self {
            bus,
            status,
            directory,
            supervisors,
            elevator,
            transit,
            tasks,
        })
    }

    /// Start (or restart) the supervisor of a registered device.
    pub fn connect(&self, device_id: &str) -> Result<(), LiftError> {
        match self.supervisors.get(device_id) {
            Some(supervisor) => supervisor.connect(),
            None => {
                let record = self
                    .directory
                    .lookup(device_id)
                    .ok_or_else(|| LiftError::UnknownDevice(device_id.to_string()))?;
                self.supervisors.get_or_create(record)?;
            }
        }
        Ok(())
    }

    pub async fn disconnect(&self, device_id: &str) -> Result<(), LiftError> {
        let supervisor = self
            .supervisors
            .get(device_id)
            .ok_or_else(|| LiftError::UnknownDevice(device_id.to_string()))?;
        supervisor.disconnect().await;
        Ok(())
    }

    pub fn is_robot(&self, device_id: &str) -> bool {
        self.directory
            .lookup(device_id)
            .is_some_and(|r| r.kind() == DeviceKind::Robot)
    }

    /// Stop background tasks and close every device socket.
    pub async fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
        self.supervisors.disconnect_all().await;
        info!("liftlink stopped");
    }
}
