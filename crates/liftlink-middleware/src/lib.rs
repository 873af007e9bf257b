//! `liftlink-middleware` – device connectivity.
//!
//! Everything between the network and the elevator / transit logic: the
//! event bus, the status registry, one supervised socket per device, and
//! the transparent client relay.
//!
//! # Modules
//!
//! - [`bus`] – topic-based publish/subscribe event bus on Tokio broadcast
//!   channels.
//! - [`status`] – concurrent status map with a single writer per device.
//! - [`transport`] – the [`Connector`] seam and its websocket implementation.
//! - [`supervisor`] – connect / bounded-reconnect lifecycle of one device.
//! - [`pool`] – owned registry of supervisors keyed by device identifier.
//! - [`directory`] – read-only lookup of registered devices.
//! - [`relay_proxy`] – verbatim client ↔ device frame relay.
//! - [`testing`] – loopback fake devices.

pub mod bus;
pub mod directory;
pub mod pool;
pub mod relay_proxy;
pub mod status;
pub mod supervisor;
pub mod testing;
pub mod transport;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use directory::{DeviceDirectory, StaticDirectory};
pub use pool::SupervisorRegistry;
pub use relay_proxy::{RelayProxy, RelaySession, RelayStats};
pub use status::{DeviceStatus, StatusRegistry, StatusWriter};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig};
pub use transport::{Connector, DeviceSocket, WsConnector};
