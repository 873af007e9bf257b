//! Loopback stand-ins for real devices, used by tests and local demos.
//!
//! [`FakeDevice`] is a websocket server on `127.0.0.1` that records every
//! frame it receives and can push frames to whoever is connected.
//! [`RefusingDevice`] accepts TCP connections and drops them before the
//! websocket handshake, so every connect attempt fails.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use liftlink_types::{DEFAULT_ELEVATOR_PORT, DeviceRecord, LiftError};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

async fn bind_loopback() -> Result<(TcpListener, SocketAddr), LiftError> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| LiftError::Transport(format!("loopback bind: {e}")))?;
    let addr = listener
        .local_addr()
        .map_err(|e| LiftError::Transport(e.to_string()))?;
    Ok((listener, addr))
}

/// Websocket device on a loopback port.
pub struct FakeDevice {
    addr: SocketAddr,
    inbound: mpsc::UnboundedReceiver<Message>,
    outbound: broadcast::Sender<Message>,
    accepted: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    peak_open: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeDevice {
    pub async fn start() -> Result<Self, LiftError> {
        let (listener, addr) = bind_loopback().await?;
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, _) = broadcast::channel(64);
        let accepted = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicUsize::new(0));
        let peak_open = Arc::new(AtomicUsize::new(0));

        let push = outbound.clone();
        let counter = Arc::clone(&accepted);
        let live = Arc::clone(&open);
        let peak = Arc::clone(&peak_open);
        let task = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                // Subscribe before the handshake so nothing pushed after the
                // client sees the upgrade is missed.
                let mut pushed = push.subscribe();
                let inbound_tx = inbound_tx.clone();
                let live = Arc::clone(&live);
                let peak = Arc::clone(&peak);
                connections.spawn(async move {
                    let Ok(ws) = accept_async(stream).await else {
                        return;
                    };
                    let now_open = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now_open, Ordering::SeqCst);
                    let (mut tx, mut rx) = ws.split();
                    loop {
                        tokio::select! {
                            frame = rx.next() => match frame {
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(m @ (Message::Text(_) | Message::Binary(_)))) => {
                                    let _ = inbound_tx.send(m);
                                }
                                Some(Ok(_)) => {}
                            },
                            out = pushed.recv() => match out {
                                Ok(m) => {
                                    if tx.send(m).await.is_err() {
                                        break;
                                    }
                                }
                                Err(broadcast::error::RecvError::Lagged(_)) => {}
                                Err(broadcast::error::RecvError::Closed) => break,
                            },
                        }
                    }
                    live.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Ok(Self {
            addr,
            inbound,
            outbound,
            accepted,
            open,
            peak_open,
            task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// An elevator record pointing at this device.
    pub fn elevator_record(&self, id: &str) -> DeviceRecord {
        DeviceRecord::elevator(id, "127.0.0.1", DEFAULT_ELEVATOR_PORT).with_port(self.addr.port())
    }

    /// A robot record pointing at this device.
    pub fn robot_record(&self, id: &str) -> DeviceRecord {
        DeviceRecord::robot(id, "127.0.0.1", "127.0.0.1", "test-secret").with_port(self.addr.port())
    }

    /// Push a frame to every connected client.
    pub fn push(&self, message: Message) {
        let _ = self.outbound.send(message);
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.push(Message::text(text.into()));
    }

    /// Next frame received from any client, waiting at most two seconds.
    pub async fn next_inbound(&mut self) -> Option<Message> {
        tokio::time::timeout(Duration::from_secs(2), self.inbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Drain frames already received without waiting.
    pub fn drain_inbound(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(m) = self.inbound.try_recv() {
            out.push(m);
        }
        out
    }

    /// TCP connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Websocket connections currently open.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Most websocket connections ever open at the same time.
    pub fn peak_open_connections(&self) -> usize {
        self.peak_open.load(Ordering::SeqCst)
    }

    /// Stop listening and drop every open connection.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Accepts TCP and hangs up immediately, so handshakes always fail.
pub struct RefusingDevice {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl RefusingDevice {
    pub async fn start() -> Result<Self, LiftError> {
        let (listener, addr) = bind_loopback().await?;
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }
        });
        Ok(Self {
            addr,
            accepted,
            task,
        })
    }

    pub fn elevator_record(&self, id: &str) -> DeviceRecord {
        DeviceRecord::elevator(id, "127.0.0.1", DEFAULT_ELEVATOR_PORT).with_port(self.addr.port())
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for RefusingDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}
