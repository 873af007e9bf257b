//! Owned registry of connection supervisors, one per device identifier.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use liftlink_types::{DeviceRecord, LiftError};
use tracing::info;

use crate::bus::EventBus;
use crate::status::StatusRegistry;
use crate::supervisor::{ConnectionSupervisor, SupervisorConfig};
use crate::transport::Connector;

/// Creates supervisors lazily and hands out shared handles to them.
#[derive(Clone)]
pub struct SupervisorRegistry {
    supervisors: Arc<Mutex<HashMap<String, ConnectionSupervisor>>>,
    config: SupervisorConfig,
    connector: Arc<dyn Connector>,
    bus: Arc<EventBus>,
    status: StatusRegistry,
}

impl SupervisorRegistry {
    pub fn new(
        config: SupervisorConfig,
        connector: Arc<dyn Connector>,
        bus: Arc<EventBus>,
        status: StatusRegistry,
    ) -> Self {
        Self {
            supervisors: Arc::new(Mutex::new(HashMap::new())),
            config,
            connector,
            bus,
            status,
        }
    }

    /// Return the supervisor for `record`, creating and starting it on
    /// first use.  Exactly one supervisor exists per device identifier.
    pub fn get_or_create(&self, record: DeviceRecord) -> Result<ConnectionSupervisor, LiftError> {
        let mut supervisors = self.lock();
        if let Some(existing) = supervisors.get(record.id()) {
            return Ok(existing.clone());
        }
        let id = record.id().to_string();
        let supervisor = ConnectionSupervisor::new(
            record,
            self.config,
            Arc::clone(&self.connector),
            Arc::clone(&self.bus),
            &self.status,
        )?;
        supervisor.connect();
        info!(device_id = %id, "supervisor created");
        supervisors.insert(id, supervisor.clone());
        Ok(supervisor)
    }

    pub fn get(&self, device_id: &str) -> Option<ConnectionSupervisor> {
        self.lock().get(device_id).cloned()
    }

    /// Retire and forget a supervisor so the next `get_or_create` builds a
    /// fresh one, even while old handles are still held elsewhere.  Returns
    /// `false` if none existed.
    pub async fn remove(&self, device_id: &str) -> bool {
        let removed = self.lock().remove(device_id);
        match removed {
            Some(supervisor) => {
                supervisor.retire().await;
                info!(%device_id, "supervisor removed");
                true
            }
            None => false,
        }
    }

    /// Identifiers of live supervisors, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Disconnect every supervisor (used on shutdown).
    pub async fn disconnect_all(&self) {
        let all: Vec<_> = self.lock().values().cloned().collect();
        for supervisor in all {
            supervisor.disconnect().await;
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn status(&self) -> &StatusRegistry {
        &self.status
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConnectionSupervisor>> {
        self.supervisors.lock().unwrap_or_else(|e| e.into_inner())
    }
}
