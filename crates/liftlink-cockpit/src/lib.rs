//! `liftlink-cockpit` – Operator gateway
//!
//! Boots a small HTTP + WebSocket server (default port `3000`) that:
//!
//! 1. **Relays** robot and elevator connections: a WebSocket client opening
//!    `/?robotId=<id>` is paired with that device's supervisor and every
//!    frame is forwarded verbatim both ways.
//!
//! 2. **Streams** the internal [`EventBus`] to operator tools on `/events`,
//!    optionally narrowed to one [`Topic`] with `?topic=`.
//!
//! 3. **Accepts** upstream transit requests on the same socket and answers
//!    with `transit_accepted` / `transit_rejected` frames.
//!
//! `GET /status` returns the status registry snapshot as JSON.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use liftlink_cockpit::GatewayServer;
//! use liftlink_middleware::{
//!     DeviceDirectory, EventBus, RelayProxy, StaticDirectory, StatusRegistry,
//!     SupervisorConfig, SupervisorRegistry, WsConnector,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = Arc::new(EventBus::default());
//!     let status = StatusRegistry::new();
//!     let directory: Arc<dyn DeviceDirectory> = Arc::new(StaticDirectory::default());
//!     let supervisors = SupervisorRegistry::new(
//!         SupervisorConfig::default(),
//!         Arc::new(WsConnector::default()),
//!         Arc::clone(&bus),
//!         status.clone(),
//!     );
//!     let proxy = RelayProxy::new(Arc::clone(&directory), supervisors);
//!     GatewayServer::new(bus, status, directory, proxy)
//!         .run()
//!         .await
//!         .expect("gateway failed");
//! }
//! ```
//!
//! [`EventBus`]: liftlink_middleware::EventBus
//! [`Topic`]: liftlink_middleware::Topic

pub mod server;

pub use server::{DEFAULT_PORT, GatewayServer};
