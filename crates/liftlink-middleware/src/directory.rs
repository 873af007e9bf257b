//! Read-only view of registered devices.

use std::collections::HashMap;
use std::sync::RwLock;

use liftlink_types::{DeviceKind, DeviceRecord};

/// Lookup interface to whatever persists device registrations.
pub trait DeviceDirectory: Send + Sync {
    fn lookup(&self, device_id: &str) -> Option<DeviceRecord>;

    /// Every registered device, ordered by identifier.
    fn all(&self) -> Vec<DeviceRecord>;

    fn robots(&self) -> Vec<DeviceRecord> {
        self.all()
            .into_iter()
            .filter(|r| r.kind() == DeviceKind::Robot)
            .collect()
    }
}

/// In-memory directory, typically built from the config file.
#[derive(Default)]
pub struct StaticDirectory {
    records: RwLock<HashMap<String, DeviceRecord>>,
}

impl StaticDirectory {
    pub fn new(records: impl IntoIterator<Item = DeviceRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|r| (r.id().to_string(), r))
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    /// Register or replace a record.
    pub fn insert(&self, record: DeviceRecord) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id().to_string(), record);
    }

    pub fn remove(&self, device_id: &str) -> Option<DeviceRecord> {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(device_id)
    }
}

impl DeviceDirectory for StaticDirectory {
    fn lookup(&self, device_id: &str) -> Option<DeviceRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(device_id)
            .cloned()
    }

    fn all(&self) -> Vec<DeviceRecord> {
        let mut all: Vec<_> = self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }
}
