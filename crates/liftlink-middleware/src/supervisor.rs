//! Per-device connection supervisor.
//!
//! A [`ConnectionSupervisor`] owns the single outbound socket to one device.
//! Its driver task connects, pumps inbound frames, and on failure or
//! unexpected closure waits a fixed delay before trying again.  After
//! `max_reconnect_attempts` consecutive failed connects it parks in
//! [`ConnectionState::Failed`] and emits
//! [`EventPayload::ReconnectExhausted`]; only an explicit
//! [`connect`](ConnectionSupervisor::connect) starts it again.
//!
//! Inbound frames fan out on two broadcast streams:
//!
//! | Stream | Content | Consumer |
//! |---|---|---|
//! | [`subscribe_raw`](ConnectionSupervisor::subscribe_raw) | verbatim text/binary frames | relay sessions |
//! | [`subscribe_frames`](ConnectionSupervisor::subscribe_frames) | frames that parse as JSON | elevator controller |
//!
//! Outbound frames go through one async mutex around the socket sink, so
//! frames from concurrent callers reach the device in submission order.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use liftlink_types::{
    ConnectionState, DeviceRecord, Event, EventPayload, LiftError, RelayBoard,
};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, Topic};
use crate::status::{StatusRegistry, StatusWriter};
use crate::transport::{Connector, DeviceSocket};

const STREAM_CAPACITY: usize = 256;

/// Reconnect policy of one supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Consecutive failed connects before giving up.
    pub max_reconnect_attempts: u32,
    /// Fixed delay between attempts.
    pub reconnect_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(5_000),
        }
    }
}

type DeviceSink = SplitSink<DeviceSocket, Message>;

struct Inner {
    record: DeviceRecord,
    config: SupervisorConfig,
    connector: Arc<dyn Connector>,
    bus: Arc<EventBus>,
    status: StatusWriter,
    state: watch::Sender<ConnectionState>,
    failed_attempts: AtomicU32,
    sink: tokio::sync::Mutex<Option<DeviceSink>>,
    raw: broadcast::Sender<Message>,
    frames: broadcast::Sender<Value>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one device connection.  Clones share the same socket.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<Inner>,
}

impl ConnectionSupervisor {
    /// Create an idle supervisor.  Claims the device's status entry, so at
    /// most one supervisor per device identifier can exist per registry.
    pub fn new(
        record: DeviceRecord,
        config: SupervisorConfig,
        connector: Arc<dyn Connector>,
        bus: Arc<EventBus>,
        status: &StatusRegistry,
    ) -> Result<Self, LiftError> {
        let writer = status.claim(record.id(), record.kind())?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (raw, _) = broadcast::channel(STREAM_CAPACITY);
        let (frames, _) = broadcast::channel(STREAM_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                record,
                config,
                connector,
                bus,
                status: writer,
                state,
                failed_attempts: AtomicU32::new(0),
                sink: tokio::sync::Mutex::new(None),
                raw,
                frames,
                driver: Mutex::new(None),
            }),
        })
    }

    pub fn id(&self) -> &str {
        self.inner.record.id()
    }

    pub fn record(&self) -> &DeviceRecord {
        &self.inner.record
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch channel following every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Consecutive failed connect attempts since the last success.
    pub fn failed_attempts(&self) -> u32 {
        self.inner.failed_attempts.load(Ordering::SeqCst)
    }

    /// Start the driver task.  A no-op while a driver is already running;
    /// after `Failed` or `disconnect` it starts over with a fresh counter.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        if self.inner.status.is_released() {
            warn!(device_id = self.id(), "connect ignored, supervisor retired");
            return;
        }
        let mut driver = self.inner.driver.lock().unwrap_or_else(|e| e.into_inner());
        if driver.as_ref().is_some_and(|h| !h.is_finished()) && self.state() != ConnectionState::Failed {
            debug!(device_id = self.id(), "connect ignored, driver already running");
            return;
        }
        // A failed driver is about to exit on its own.
        if let Some(old) = driver.take() {
            old.abort();
        }
        self.inner.failed_attempts.store(0, Ordering::SeqCst);
        // Leave the idle states before returning so callers never observe a
        // stale `Failed`/`Disconnected` after asking for a connection.
        self.inner.transition(ConnectionState::Connecting);
        *driver = Some(tokio::spawn(drive(Arc::clone(&self.inner))));
    }

    /// Disconnect for good and give the device's status entry back to the
    /// registry.  Clones still held elsewhere see `Disconnected` and ignore
    /// later `connect` calls.
    pub async fn retire(&self) {
        self.disconnect().await;
        self.inner.status.release();
    }

    /// Tear down the socket and any pending reconnect, then move to
    /// `Disconnected` regardless of the prior state.
    pub async fn disconnect(&self) {
        let handle = self
            .inner
            .driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        self.inner.failed_attempts.store(0, Ordering::SeqCst);
        self.inner.transition(ConnectionState::Disconnected);
    }

    /// Send one frame.  Rejected with [`LiftError::NotConnected`] unless the
    /// supervisor is `Connected`; nothing is queued.
    pub async fn send(&self, frame: Message) -> Result<(), LiftError> {
        if self.state() != ConnectionState::Connected {
            return Err(self.not_connected());
        }
        let mut guard = self.inner.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(self.not_connected());
        };
        sink.send(frame).await.map_err(|e| {
            warn!(device_id = self.id(), error = %e, "device send failed");
            self.not_connected()
        })
    }

    /// Serialise `value` and send it as a text frame.
    pub async fn send_json<T: serde::Serialize>(&self, value: &T) -> Result<(), LiftError> {
        let text =
            serde_json::to_string(value).map_err(|e| LiftError::Serialization(e.to_string()))?;
        self.send(Message::text(text)).await
    }

    /// Verbatim inbound text and binary frames.
    pub fn subscribe_raw(&self) -> broadcast::Receiver<Message> {
        self.inner.raw.subscribe()
    }

    /// Inbound frames that parsed as JSON.
    pub fn subscribe_frames(&self) -> broadcast::Receiver<Value> {
        self.inner.frames.subscribe()
    }

    /// Wait until the supervisor reaches `target`.
    pub async fn wait_for_state(
        &self,
        target: ConnectionState,
        timeout: Duration,
    ) -> Result<(), LiftError> {
        let mut rx = self.watch_state();
        let reached = tokio::time::timeout(timeout, rx.wait_for(|s| *s == target)).await;
        match reached {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(LiftError::Channel("supervisor state channel closed".into())),
            Err(_) => Err(LiftError::Transport(format!(
                "device '{}' did not reach {target} within {timeout:?}",
                self.id()
            ))),
        }
    }

    /// Wait until the link is up; a timeout reports [`LiftError::NotConnected`].
    pub async fn wait_for_connected(&self, timeout: Duration) -> Result<(), LiftError> {
        self.wait_for_state(ConnectionState::Connected, timeout)
            .await
            .map_err(|_| self.not_connected())
    }

    /// Record the last relay board reported by this device.
    pub fn record_relays(&self, board: RelayBoard) {
        self.inner.status.set_relays(board);
    }

    /// Record the last error reported by this device.  Cleared on the
    /// next successful connect.
    pub fn record_device_error(&self, message: impl Into<String>) {
        self.inner.status.set_error(Some(message.into()));
    }

    fn not_connected(&self) -> LiftError {
        LiftError::NotConnected {
            device_id: self.id().to_string(),
        }
    }
}

impl Inner {
    fn source(&self) -> String {
        format!("liftlink-middleware::supervisor/{}", self.record.id())
    }

    fn transition(&self, state: ConnectionState) {
        let attempt = self.failed_attempts.load(Ordering::SeqCst);
        self.state.send_replace(state);
        self.status.set_connection(state, attempt);
        info!(device_id = self.record.id(), %state, attempt, "connection state changed");
        self.bus.emit(
            Topic::Connection,
            Event::new(
                self.source(),
                EventPayload::ConnectionChanged {
                    device_id: self.record.id().to_string(),
                    state,
                    attempt,
                },
            ),
        );
    }

    fn dispatch(&self, message: Message) {
        let parsed = match &message {
            Message::Text(text) => serde_json::from_str::<Value>(text.as_str()),
            Message::Binary(bytes) => serde_json::from_slice::<Value>(bytes),
            _ => return,
        };
        let _ = self.raw.send(message);
        match parsed {
            Ok(value) => {
                let _ = self.frames.send(value);
            }
            Err(e) => {
                let err = LiftError::MalformedFrame(e.to_string());
                warn!(device_id = self.record.id(), error = %err, "dropping frame");
            }
        }
    }
}

/// Driver loop: one socket at a time, torn down before the next attempt.
async fn drive(inner: Arc<Inner>) {
    let id = inner.record.id().to_string();

    loop {
        match inner.connector.connect(&inner.record).await {
            Ok(socket) => {
                inner.failed_attempts.store(0, Ordering::SeqCst);
                let (sink, mut stream) = socket.split();
                *inner.sink.lock().await = Some(sink);
                // Errors reported over a previous socket are stale now.
                inner.status.set_error(None);
                inner.transition(ConnectionState::Connected);

                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(Message::Close(reason)) => {
                            debug!(device_id = %id, ?reason, "device closed the socket");
                            break;
                        }
                        Ok(message) => inner.dispatch(message),
                        Err(e) => {
                            warn!(device_id = %id, error = %e, "device socket error");
                            break;
                        }
                    }
                }

                inner.sink.lock().await.take();
                drop(stream);
                warn!(device_id = %id, "device connection lost");
                inner.transition(ConnectionState::Reconnecting);
            }
            Err(e) => {
                let failures = inner.failed_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(device_id = %id, attempt = failures, error = %e, "connect attempt failed");

                if failures >= inner.config.max_reconnect_attempts {
                    inner.transition(ConnectionState::Failed);
                    let error = LiftError::MaxReconnectExceeded {
                        device_id: id.clone(),
                        attempts: failures,
                    };
                    error!(device_id = %id, %error, "giving up on device");
                    inner.bus.emit(
                        Topic::Connection,
                        Event::new(
                            inner.source(),
                            EventPayload::ReconnectExhausted {
                                device_id: id.clone(),
                                error,
                            },
                        ),
                    );
                    return;
                }
                inner.transition(ConnectionState::Reconnecting);
            }
        }

        tokio::time::sleep(inner.config.reconnect_delay).await;
    }
}
