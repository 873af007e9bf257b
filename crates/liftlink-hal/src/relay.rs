//! Relay drivers and timed pulses.

use std::time::Duration;

use async_trait::async_trait;
use liftlink_types::{LiftError, RelayName};
use tracing::debug;

use crate::scheduler::Scheduler;

/// Something that can drive the six named relays.
#[async_trait]
pub trait RelayDriver: Send + Sync {
    /// Command one relay.  Returns once the command is sent; there is no
    /// hardware acknowledgement.
    async fn set_relay(&self, relay: RelayName, state: bool) -> Result<(), LiftError>;

    /// Last state the device reported for `relay`.
    fn relay_state(&self, relay: RelayName) -> bool;
}

/// Energise a relay, hold it, release it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseStep {
    pub relay: RelayName,
    pub hold: Duration,
}

impl PulseStep {
    pub fn new(relay: RelayName, hold: Duration) -> Self {
        Self { relay, hold }
    }

    /// Run the pulse.  If the release fails the relay may be left on; the
    /// error is returned and nothing is retried.
    pub async fn execute(
        &self,
        driver: &dyn RelayDriver,
        scheduler: &dyn Scheduler,
    ) -> Result<(), LiftError> {
        debug!(relay = %self.relay, hold_ms = self.hold.as_millis() as u64, "relay pulse");
        driver.set_relay(self.relay, true).await?;
        scheduler.sleep(self.hold).await;
        driver.set_relay(self.relay, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::RecordingScheduler;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockRelays {
        calls: Mutex<Vec<(RelayName, bool)>>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl RelayDriver for MockRelays {
        async fn set_relay(&self, relay: RelayName, state: bool) -> Result<(), LiftError> {
            let mut calls = self.calls.lock().unwrap();
            if self.fail_after.is_some_and(|n| calls.len() >= n) {
                return Err(LiftError::NotConnected {
                    device_id: "mock".into(),
                });
            }
            calls.push((relay, state));
            Ok(())
        }

        fn relay_state(&self, relay: RelayName) -> bool {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(r, _)| *r == relay)
                .is_some_and(|(_, s)| *s)
        }
    }

    #[tokio::test]
    async fn pulse_sets_holds_and_releases() {
        let relays = MockRelays::default();
        let scheduler = RecordingScheduler::new();
        let step = PulseStep::new(RelayName::DoorOpen, Duration::from_millis(1_000));

        step.execute(&relays, &scheduler).await.unwrap();

        assert_eq!(
            *relays.calls.lock().unwrap(),
            vec![(RelayName::DoorOpen, true), (RelayName::DoorOpen, false)]
        );
        assert_eq!(scheduler.waits(), vec![Duration::from_millis(1_000)]);
        assert!(!relays.relay_state(RelayName::DoorOpen));
    }

    #[tokio::test]
    async fn failed_release_is_reported() {
        let relays = MockRelays {
            fail_after: Some(1),
            ..Default::default()
        };
        let scheduler = RecordingScheduler::new();
        let step = PulseStep::new(RelayName::Floor2, Duration::from_millis(500));

        let result = step.execute(&relays, &scheduler).await;
        assert!(matches!(result, Err(LiftError::NotConnected { .. })));
        // The relay is left energised.
        assert!(relays.relay_state(RelayName::Floor2));
    }

    #[tokio::test]
    async fn failed_set_skips_the_hold() {
        let relays = MockRelays {
            fail_after: Some(0),
            ..Default::default()
        };
        let scheduler = RecordingScheduler::new();
        let step = PulseStep::new(RelayName::DoorClose, Duration::from_millis(1_000));

        assert!(step.execute(&relays, &scheduler).await.is_err());
        assert!(scheduler.waits().is_empty());
    }
}
