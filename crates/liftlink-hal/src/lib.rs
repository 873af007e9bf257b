//! `liftlink-hal` – elevator hardware layer.
//!
//! - [`scheduler`] – the [`Scheduler`] used for every fixed-duration wait,
//!   with recording and manually-released fakes.
//! - [`relay`] – the [`RelayDriver`] trait and [`PulseStep`].
//! - [`elevator`] – [`ElevatorController`] on top of the relay board's
//!   connection supervisor.

pub mod elevator;
pub mod relay;
pub mod scheduler;

pub use elevator::{ElevatorController, ElevatorTiming};
pub use relay::{PulseStep, RelayDriver};
pub use scheduler::{
    ManualClock, ManualScheduler, PendingWait, RecordingScheduler, Scheduler, TokioScheduler,
};
