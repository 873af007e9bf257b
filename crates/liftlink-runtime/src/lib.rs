//! `liftlink-runtime` – transit orchestration.
//!
//! # Modules
//!
//! - [`transit`] – [`TransitOrchestrator`]: plans and runs the cross-floor
//!   sequence robot → elevator → robot, one transit per robot at a time,
//!   publishing every state change on the event bus.
//! - [`movement`] – the [`RobotMover`] seam and the REST-backed
//!   [`HttpRobotMover`].
//! - [`telemetry`] – [`init_tracing`]: global `tracing` subscriber with an
//!   optional OTLP span exporter.

pub mod movement;
pub mod telemetry;
pub mod transit;

pub use movement::{HttpRobotMover, RobotMover, RobotTarget, Waypoint, WaypointKind};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
pub use transit::{
    TransitAction, TransitHandle, TransitOrchestrator, TransitReport, TransitStep, TransitTiming,
    plan,
};
