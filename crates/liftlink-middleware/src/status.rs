//! Process-wide status registry.
//!
//! Maps every device identifier to its last-known connection state, failure
//! counter, relay board and last device error.  Any number of readers may
//! take snapshots concurrently; each key has exactly one writer at a time,
//! obtained through [`StatusRegistry::claim`] and released when the
//! [`StatusWriter`] is dropped or [`StatusWriter::release`] is called.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use liftlink_types::{ConnectionState, DeviceKind, LiftError, RelayBoard};
use serde::Serialize;

/// Snapshot of one device as seen by the rest of the process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub kind: DeviceKind,
    pub connection: ConnectionState,
    /// Consecutive failed connect attempts.
    pub failed_attempts: u32,
    /// Last board reported by an elevator relay device.
    pub relays: Option<RelayBoard>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Entries {
    devices: HashMap<String, DeviceStatus>,
    claimed: HashSet<String>,
}

/// Shared status map.  Clone it cheaply.
#[derive(Clone, Default)]
pub struct StatusRegistry {
    inner: Arc<RwLock<Entries>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Become the single writer for `device_id`.
    ///
    /// Fails while another [`StatusWriter`] for the same key is alive.  An
    /// entry is created on first claim and survives the writer.
    pub fn claim(&self, device_id: &str, kind: DeviceKind) -> Result<StatusWriter, LiftError> {
        let mut entries = self.write();
        if !entries.claimed.insert(device_id.to_string()) {
            return Err(LiftError::Sequence(format!(
                "status for '{device_id}' already has a writer"
            )));
        }
        entries
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceStatus {
                device_id: device_id.to_string(),
                kind,
                connection: ConnectionState::Disconnected,
                failed_attempts: 0,
                relays: None,
                last_error: None,
                updated_at: Utc::now(),
            });
        Ok(StatusWriter {
            registry: self.clone(),
            device_id: device_id.to_string(),
            released: AtomicBool::new(false),
        })
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceStatus> {
        self.read().devices.get(device_id).cloned()
    }

    /// All entries, ordered by device identifier.
    pub fn snapshot(&self) -> Vec<DeviceStatus> {
        let mut all: Vec<_> = self.read().devices.values().cloned().collect();
        all.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        all
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Exclusive write handle for one registry key.
pub struct StatusWriter {
    registry: StatusRegistry,
    device_id: String,
    released: AtomicBool,
}

impl StatusWriter {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn set_connection(&self, state: ConnectionState, failed_attempts: u32) {
        self.update(|s| {
            s.connection = state;
            s.failed_attempts = failed_attempts;
        });
    }

    pub fn set_relays(&self, board: RelayBoard) {
        self.update(|s| s.relays = Some(board));
    }

    pub fn set_error(&self, error: Option<String>) {
        self.update(|s| s.last_error = error);
    }

    /// Give up the claim early.  Later updates through this writer are
    /// ignored, so a fresh claim for the same key is never overwritten.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.registry.write().claimed.remove(&self.device_id);
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn update(&self, apply: impl FnOnce(&mut DeviceStatus)) {
        if self.is_released() {
            return;
        }
        let mut entries = self.registry.write();
        if let Some(status) = entries.devices.get_mut(&self.device_id) {
            apply(status);
            status.updated_at = Utc::now();
        }
    }
}

impl Drop for StatusWriter {
    fn drop(&mut self) {
        self.release();
    }
}
