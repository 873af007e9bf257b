//! Transparent client ↔ device relay.
//!
//! A [`RelayProxy`] turns an inbound client connection that names a device
//! into a [`RelaySession`].  The session forwards every text and binary
//! frame verbatim in both directions:
//!
//! * device → client: taken from the supervisor's raw stream, so several
//!   sessions on the same device all see the same inbound frames;
//! * client → device: sent through the supervisor while it is `Connected`,
//!   dropped otherwise.
//!
//! A session ends when its client goes away or when the shared supervisor
//! stops for good (`Failed` or `Disconnected`).  Ending a session never
//! touches the supervisor or any other session.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use liftlink_types::{ConnectionState, Event, EventPayload, LiftError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{EventBus, Topic};
use crate::directory::DeviceDirectory;
use crate::pool::SupervisorRegistry;
use crate::supervisor::ConnectionSupervisor;

/// Entry point for relay sessions, keyed by device identifier.
#[derive(Clone)]
pub struct RelayProxy {
    directory: Arc<dyn DeviceDirectory>,
    supervisors: SupervisorRegistry,
}

impl RelayProxy {
    pub fn new(directory: Arc<dyn DeviceDirectory>, supervisors: SupervisorRegistry) -> Self {
        Self {
            directory,
            supervisors,
        }
    }

    /// Resolve `device_id` and pair a new session with its supervisor.  A
    /// supervisor that has given up or was disconnected is started again,
    /// so every new client gets a fresh round of connect attempts.
    ///
    /// Unregistered devices are rejected with
    /// [`LiftError::RelayTargetUnknown`].
    pub fn open_session(&self, device_id: &str) -> Result<RelaySession, LiftError> {
        let record = self
            .directory
            .lookup(device_id)
            .ok_or_else(|| LiftError::RelayTargetUnknown(device_id.to_string()))?;
        let supervisor = self.supervisors.get_or_create(record)?;
        if is_terminal(supervisor.state()) {
            info!(%device_id, state = %supervisor.state(), "restarting device link for new relay client");
            supervisor.connect();
        }
        Ok(RelaySession {
            id: Uuid::new_v4(),
            supervisor,
            bus: Arc::clone(self.supervisors.bus()),
        })
    }
}

fn is_terminal(state: ConnectionState) -> bool {
    matches!(state, ConnectionState::Failed | ConnectionState::Disconnected)
}

/// Summary of a finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub to_device: u64,
    pub to_client: u64,
    /// Client frames discarded because the device was not connected.
    pub dropped: u64,
}

/// One client paired with one device.
pub struct RelaySession {
    id: Uuid,
    supervisor: ConnectionSupervisor,
    bus: Arc<EventBus>,
}

impl RelaySession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn device_id(&self) -> &str {
        self.supervisor.id()
    }

    /// Pump frames until either side ends the session.
    pub async fn run<S>(self, client: WebSocketStream<S>) -> RelayStats
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let device_id = self.device_id().to_string();
        let (mut client_tx, mut client_rx) = client.split();
        let mut device_rx = self.supervisor.subscribe_raw();
        let mut state_rx = self.supervisor.watch_state();
        let mut stats = RelayStats::default();

        self.announce(true);
        info!(%device_id, session_id = %self.id, "relay session opened");

        // The link may have stopped between `open_session` and now.
        let initial = *state_rx.borrow_and_update();
        let mut stopped = is_terminal(initial);
        if stopped {
            debug!(%device_id, session_id = %self.id, state = %initial, "device stopped, ending session");
        }

        while !stopped {
            tokio::select! {
                frame = device_rx.recv() => match frame {
                    Ok(message) => {
                        if client_tx.send(message).await.is_err() {
                            break;
                        }
                        stats.to_client += 1;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%device_id, session_id = %self.id, lagged_by = n, "relay client lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                frame = client_rx.next() => match frame {
                    Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                        match self.supervisor.send(message).await {
                            Ok(()) => stats.to_device += 1,
                            Err(e) => {
                                stats.dropped += 1;
                                debug!(%device_id, session_id = %self.id, error = %e, "client frame dropped");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *state_rx.borrow_and_update();
                    if is_terminal(state) {
                        debug!(%device_id, session_id = %self.id, %state, "device stopped, ending session");
                        stopped = true;
                    }
                }
            }
        }

        let _ = client_tx.close().await;
        self.announce(false);
        info!(
            %device_id,
            session_id = %self.id,
            to_device = stats.to_device,
            to_client = stats.to_client,
            dropped = stats.dropped,
            "relay session closed"
        );
        stats
    }

    fn announce(&self, open: bool) {
        self.bus.emit(
            Topic::Relay,
            Event::new(
                format!("liftlink-middleware::relay/{}", self.device_id()),
                EventPayload::RelaySession {
                    device_id: self.device_id().to_string(),
                    session_id: self.id,
                    open,
                },
            ),
        );
    }
}
