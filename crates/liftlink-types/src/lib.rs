//! `liftlink-types` – shared vocabulary of the liftlink stack.
//!
//! Device records, connection and transit state machines, the elevator relay
//! board, the JSON wire frames spoken by the relay device, the event envelope
//! routed over the bus, and the workspace-wide [`LiftError`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Default robot API / websocket port.
pub const DEFAULT_ROBOT_PORT: u16 = 8090;

/// Default websocket port of the elevator relay board.
pub const DEFAULT_ELEVATOR_PORT: u16 = 81;

// ─────────────────────────────────────────────────────────────────────────────
// Devices
// ─────────────────────────────────────────────────────────────────────────────

/// What sits at the far end of a device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// A mobile robot exposing a websocket topic channel and a REST API.
    Robot,
    /// The six-relay board wired into the elevator control panel.
    ElevatorRelay,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Robot => write!(f, "robot"),
            DeviceKind::ElevatorRelay => write!(f, "elevator-relay"),
        }
    }
}

/// Registration record of a single device.
///
/// Identity and kind are fixed at registration; only the network addresses
/// and the shared secret can change afterwards.  The secret is wiped from
/// memory when the record is dropped and never shows up in `Debug` output.
#[derive(Clone, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct DeviceRecord {
    #[zeroize(skip)]
    id: String,
    #[zeroize(skip)]
    kind: DeviceKind,
    #[zeroize(skip)]
    #[serde(default)]
    public_address: String,
    #[zeroize(skip)]
    #[serde(default)]
    private_address: String,
    #[zeroize(skip)]
    port: u16,
    /// Path appended to the websocket URL, e.g. `/ws/v2/topics`.
    #[zeroize(skip)]
    #[serde(default)]
    path: String,
    #[serde(default)]
    secret: String,
}

impl DeviceRecord {
    /// Register a robot reachable on [`DEFAULT_ROBOT_PORT`].
    pub fn robot(
        id: impl Into<String>,
        public_address: impl Into<String>,
        private_address: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: DeviceKind::Robot,
            public_address: public_address.into(),
            private_address: private_address.into(),
            port: DEFAULT_ROBOT_PORT,
            path: String::new(),
            secret: secret.into(),
        }
    }

    /// Register an elevator relay board at `address:port`.
    pub fn elevator(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        let address = address.into();
        Self {
            id: id.into(),
            kind: DeviceKind::ElevatorRelay,
            public_address: address.clone(),
            private_address: address,
            port,
            path: String::new(),
            secret: String::new(),
        }
    }

    /// Override the port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the websocket path (builder-style).
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Override the shared secret (builder-style).
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.rotate_secret(secret);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn public_address(&self) -> &str {
        &self.public_address
    }

    pub fn private_address(&self) -> &str {
        &self.private_address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The shared secret sent to the robot REST API.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Replace the network addresses.
    pub fn update_address(
        &mut self,
        public_address: impl Into<String>,
        private_address: impl Into<String>,
    ) {
        self.public_address = public_address.into();
        self.private_address = private_address.into();
    }

    /// Replace the shared secret, wiping the old one first.
    pub fn rotate_secret(&mut self, secret: impl Into<String>) {
        self.secret.zeroize();
        self.secret = secret.into();
    }

    /// Websocket URL of the device control channel.
    ///
    /// The private (LAN) address is preferred; the public one is used when no
    /// private address is registered.
    pub fn ws_url(&self) -> String {
        let host = if self.private_address.is_empty() {
            &self.public_address
        } else {
            &self.private_address
        };
        format!("ws://{host}:{}{}", self.port, self.path)
    }

    /// Base URL of the robot REST API (public address preferred).
    pub fn base_url(&self) -> String {
        let host = if self.public_address.is_empty() {
            &self.private_address
        } else {
            &self.public_address
        };
        format!("http://{host}:{}", self.port)
    }
}

impl fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("public_address", &self.public_address)
            .field("private_address", &self.private_address)
            .field("port", &self.port)
            .field("path", &self.path)
            .field(
                "secret",
                if self.secret.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of one device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect budget exhausted; only an explicit connect resumes.
    Failed,
}

impl ConnectionState {
    /// `true` while the supervisor is working towards (or holding) a socket.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Relay board
// ─────────────────────────────────────────────────────────────────────────────

/// One of the six physical relays on the elevator board.
///
/// Serialises to the names the board firmware uses (`doorOpen`, `floor3`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelayName {
    DoorOpen,
    DoorClose,
    Floor1,
    Floor2,
    Floor3,
    Floor4,
}

impl RelayName {
    /// Every relay, in board order.
    pub const ALL: [RelayName; 6] = [
        RelayName::DoorOpen,
        RelayName::DoorClose,
        RelayName::Floor1,
        RelayName::Floor2,
        RelayName::Floor3,
        RelayName::Floor4,
    ];

    /// Wire name of the relay.
    pub fn as_str(self) -> &'static str {
        match self {
            RelayName::DoorOpen => "doorOpen",
            RelayName::DoorClose => "doorClose",
            RelayName::Floor1 => "floor1",
            RelayName::Floor2 => "floor2",
            RelayName::Floor3 => "floor3",
            RelayName::Floor4 => "floor4",
        }
    }

    /// Floor-select relay for `floor`, if the board has one.
    pub fn floor(floor: u8) -> Option<Self> {
        match floor {
            1 => Some(RelayName::Floor1),
            2 => Some(RelayName::Floor2),
            3 => Some(RelayName::Floor3),
            4 => Some(RelayName::Floor4),
            _ => None,
        }
    }
}

impl fmt::Display for RelayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayName {
    type Err = LiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelayName::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| LiftError::UnknownRelay(s.to_string()))
    }
}

/// A single relay transition observed on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayChange {
    pub relay: RelayName,
    pub previous: bool,
    pub current: bool,
}

/// Last-known state of all six relays as reported by the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayBoard {
    pub door_open: bool,
    pub door_close: bool,
    pub floor1: bool,
    pub floor2: bool,
    pub floor3: bool,
    pub floor4: bool,
}

impl RelayBoard {
    pub fn get(&self, relay: RelayName) -> bool {
        match relay {
            RelayName::DoorOpen => self.door_open,
            RelayName::DoorClose => self.door_close,
            RelayName::Floor1 => self.floor1,
            RelayName::Floor2 => self.floor2,
            RelayName::Floor3 => self.floor3,
            RelayName::Floor4 => self.floor4,
        }
    }

    pub fn set(&mut self, relay: RelayName, state: bool) {
        let slot = match relay {
            RelayName::DoorOpen => &mut self.door_open,
            RelayName::DoorClose => &mut self.door_close,
            RelayName::Floor1 => &mut self.floor1,
            RelayName::Floor2 => &mut self.floor2,
            RelayName::Floor3 => &mut self.floor3,
            RelayName::Floor4 => &mut self.floor4,
        };
        *slot = state;
    }

    /// Iterate `(relay, state)` pairs in board order.
    pub fn iter(&self) -> impl Iterator<Item = (RelayName, bool)> + '_ {
        RelayName::ALL.into_iter().map(|r| (r, self.get(r)))
    }

    /// Overwrite the reported relays field-by-field and return one
    /// [`RelayChange`] per relay whose value actually changed.
    ///
    /// Relays absent from `reported` keep their previous value.
    pub fn merge(
        &mut self,
        reported: impl IntoIterator<Item = (RelayName, bool)>,
    ) -> Vec<RelayChange> {
        let previous = *self;
        for (relay, state) in reported {
            self.set(relay, state);
        }
        RelayName::ALL
            .into_iter()
            .filter(|r| previous.get(*r) != self.get(*r))
            .map(|relay| RelayChange {
                relay,
                previous: previous.get(relay),
                current: self.get(relay),
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire frames
// ─────────────────────────────────────────────────────────────────────────────

/// JSON frames exchanged with the elevator relay board.
///
/// Every frame carries a `type` field; any type not listed here decodes to
/// [`ElevatorFrame::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElevatorFrame {
    /// Device → controller: partial relay-name → state map.
    RelayState {
        #[serde(default)]
        states: BTreeMap<String, bool>,
    },
    /// Device → controller: a device-side error message.
    Error {
        #[serde(default)]
        error: String,
    },
    /// Controller → device: drive one relay.
    SetRelay { relay: RelayName, state: bool },
    #[serde(other)]
    Unknown,
}

impl ElevatorFrame {
    /// Decode an already-parsed JSON value.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, LiftError> {
        Self::deserialize(value).map_err(|e| LiftError::MalformedFrame(e.to_string()))
    }

    /// Encode as a JSON text frame.
    pub fn to_text(&self) -> Result<String, LiftError> {
        serde_json::to_string(self).map_err(|e| LiftError::Serialization(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transit
// ─────────────────────────────────────────────────────────────────────────────

/// Request to move one robot between floors through the elevator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitRequest {
    pub id: Uuid,
    pub robot_id: String,
    pub origin_floor: u8,
    pub destination_floor: u8,
    pub created_at: DateTime<Utc>,
}

impl TransitRequest {
    pub fn new(robot_id: impl Into<String>, origin_floor: u8, destination_floor: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            robot_id: robot_id.into(),
            origin_floor,
            destination_floor,
            created_at: Utc::now(),
        }
    }

    /// Number of floors the car travels.
    pub fn floor_distance(&self) -> u32 {
        u32::from(self.origin_floor.abs_diff(self.destination_floor))
    }
}

/// Progress of one transit.  States only ever move forward; `Failed` is the
/// single absorbing exit from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitState {
    #[default]
    Idle,
    ApproachingElevator,
    OpeningEntryDoor,
    AwaitingEntry,
    ClosingEntryDoor,
    SelectingFloor,
    Travelling,
    OpeningExitDoor,
    AwaitingExit,
    ClosingExitDoor,
    Completed,
    Failed,
}

impl TransitState {
    /// Position in the forward order of the sequence.
    pub fn ordinal(self) -> u8 {
        match self {
            TransitState::Idle => 0,
            TransitState::ApproachingElevator => 1,
            TransitState::OpeningEntryDoor => 2,
            TransitState::AwaitingEntry => 3,
            TransitState::ClosingEntryDoor => 4,
            TransitState::SelectingFloor => 5,
            TransitState::Travelling => 6,
            TransitState::OpeningExitDoor => 7,
            TransitState::AwaitingExit => 8,
            TransitState::ClosingExitDoor => 9,
            TransitState::Completed => 10,
            TransitState::Failed => 11,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransitState::Completed | TransitState::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: TransitState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == TransitState::Failed || next.ordinal() > self.ordinal()
    }
}

impl fmt::Display for TransitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"liftlink-middleware::supervisor/elevator"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A supervisor changed lifecycle state.
    ConnectionChanged {
        device_id: String,
        state: ConnectionState,
        /// Consecutive failed connect attempts at the time of the change.
        attempt: u32,
    },
    /// Terminal: the reconnect budget is spent.  Must reach an operator.
    ReconnectExhausted { device_id: String, error: LiftError },
    /// One relay on the elevator board changed value.
    RelayChanged { device_id: String, change: RelayChange },
    /// A device reported an error; the connection stays up.
    DeviceFault { device_id: String, error: LiftError },
    /// A transit entered a new state.
    TransitProgress {
        transit_id: Uuid,
        robot_id: String,
        state: TransitState,
        /// Fixed wait attached to the state, if any.
        hold_ms: Option<u64>,
    },
    /// Terminal: a transit aborted.  Physical intervention may be required.
    TransitFailed {
        transit_id: Uuid,
        robot_id: String,
        failed_in: TransitState,
        error: LiftError,
    },
    /// A client relay session opened or closed.
    RelaySession {
        device_id: String,
        session_id: Uuid,
        open: bool,
    },
    /// Free-form operator-facing alert.
    OperatorAlert(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Workspace-wide error type.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiftError {
    #[error("device '{device_id}' is not connected")]
    NotConnected { device_id: String },

    #[error("invalid floor {0}: no floor-select relay on the board")]
    InvalidFloor(u8),

    #[error("robot '{robot_id}' already has a transit in progress")]
    SequenceBusy { robot_id: String },

    #[error("device '{device_id}' gave up after {attempts} failed connect attempts")]
    MaxReconnectExceeded { device_id: String, attempts: u32 },

    #[error("relay target '{0}' is not a registered device")]
    RelayTargetUnknown(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("unknown relay '{0}'")]
    UnknownRelay(String),

    #[error("device '{device_id}' reported: {message}")]
    DeviceReported { device_id: String, message: String },

    #[error("movement of robot '{robot_id}' failed: {details}")]
    Movement { robot_id: String, details: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("sequence error: {0}")]
    Sequence(String),
}
