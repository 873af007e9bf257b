//! [`GatewayServer`] – HTTP + WebSocket front door for operators.
//!
//! Listens on `0.0.0.0:3000` (configurable via [`GatewayServer::with_port`]).
//! The request line is peeked, not consumed, so tungstenite's handshaker
//! still sees the whole request.
//!
//! | Request | Result |
//! |---|---|
//! | WS `/?robotId=<id>` or `/relay?robotId=<id>` | relay session to the device; 404 if unknown |
//! | WS `/events[?topic=<topic>]` | live bus events; upstream transit requests |
//! | `GET /status` | JSON status snapshot |
//! | anything else | 404 |

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use liftlink_middleware::{DeviceDirectory, EventBus, RelayProxy, StatusRegistry, Topic, TopicReceiver};
use liftlink_runtime::TransitOrchestrator;
use liftlink_types::{DeviceKind, Event, LiftError, TransitRequest};
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Default TCP port of the gateway.
pub const DEFAULT_PORT: u16 = 3000;

struct GatewayState {
    bus: Arc<EventBus>,
    status: StatusRegistry,
    directory: Arc<dyn DeviceDirectory>,
    proxy: RelayProxy,
    transit: Option<TransitOrchestrator>,
}

/// Operator-facing gateway.
pub struct GatewayServer {
    state: GatewayState,
    port: u16,
}

impl GatewayServer {
    pub fn new(
        bus: Arc<EventBus>,
        status: StatusRegistry,
        directory: Arc<dyn DeviceDirectory>,
        proxy: RelayProxy,
    ) -> Self {
        Self {
            state: GatewayState {
                bus,
                status,
                directory,
                proxy,
                transit: None,
            },
            port: DEFAULT_PORT,
        }
    }

    /// Accept upstream transit requests on `/events` (builder-style).
    pub fn with_transit(mut self, orchestrator: TransitOrchestrator) -> Self {
        self.state.transit = Some(orchestrator);
        self
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind `0.0.0.0:<port>` and serve forever.
    pub async fn run(self) -> Result<(), LiftError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| LiftError::Transport(format!("gateway bind error on {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), LiftError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "gateway listening");
        }
        let state = Arc::new(self.state);
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, state).await {
                            warn!(%peer, error = %e, "gateway client error");
                        }
                    });
                }
                Err(e) => error!(error = %e, "gateway accept error"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Route {
    Relay(Option<String>),
    Events(Option<Topic>),
    Status,
    NotFound,
}

/// Route a request line such as `GET /relay?robotId=R1 HTTP/1.1`.
pub(crate) fn route(request_line: &str) -> Route {
    let target = request_line.split_whitespace().nth(1).unwrap_or("/");
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let params: HashMap<&str, &str> = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .collect();

    match path {
        "/" | "/relay" => Route::Relay(
            params
                .get("robotId")
                .filter(|id| !id.is_empty())
                .map(|id| id.to_string()),
        ),
        "/events" => Route::Events(params.get("topic").and_then(|t| t.parse().ok())),
        "/status" => Route::Status,
        _ => Route::NotFound,
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<GatewayState>,
) -> Result<(), LiftError> {
    let mut buf = [0u8; 2048];
    let n = stream
        .peek(&mut buf)
        .await
        .map_err(|e| LiftError::Transport(format!("peek error from {peer}: {e}")))?;
    let head = String::from_utf8_lossy(&buf[..n]);
    let request_line = head.lines().next().unwrap_or("");
    let is_ws_upgrade = head.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    });

    debug!(%peer, request = request_line, is_ws_upgrade, "gateway request");
    match (route(request_line), is_ws_upgrade) {
        (Route::Relay(Some(device_id)), true) => handle_relay(stream, peer, &device_id, &state).await,
        (Route::Relay(None), true) => respond(stream, "404 Not Found", "text/plain", "missing robotId").await,
        (Route::Events(topic), true) => handle_events(stream, peer, topic, &state).await,
        (Route::Relay(_) | Route::Events(_), false) => {
            respond(stream, "426 Upgrade Required", "text/plain", "websocket required").await
        }
        (Route::Status, _) => {
            let body = status_body(&state).to_string();
            respond(stream, "200 OK", "application/json", &body).await
        }
        (Route::NotFound, _) => respond(stream, "404 Not Found", "text/plain", "not found").await,
    }
}

async fn respond(
    mut stream: TcpStream,
    status: &str,
    content_type: &str,
    body: &str,
) -> Result<(), LiftError> {
    let response = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| LiftError::Transport(format!("HTTP write error: {e}")))
}

fn status_body(state: &GatewayState) -> Value {
    json!({
        "devices": state.status.snapshot(),
        "activeTransits": state.transit.as_ref().map(|t| t.active()).unwrap_or_default(),
    })
}

// ---------------------------------------------------------------------------
// Relay sessions
// ---------------------------------------------------------------------------

async fn handle_relay(
    stream: TcpStream,
    peer: SocketAddr,
    device_id: &str,
    state: &GatewayState,
) -> Result<(), LiftError> {
    let session = match state.proxy.open_session(device_id) {
        Ok(session) => session,
        Err(e @ LiftError::RelayTargetUnknown(_)) => {
            warn!(%peer, %device_id, "relay rejected: unknown device");
            return respond(stream, "404 Not Found", "text/plain", &e.to_string()).await;
        }
        Err(e) => {
            error!(%peer, %device_id, error = %e, "relay session failed to open");
            return respond(stream, "503 Service Unavailable", "text/plain", &e.to_string()).await;
        }
    };

    let ws = accept_async(stream)
        .await
        .map_err(|e| LiftError::Transport(format!("WS handshake from {peer}: {e}")))?;
    session.run(ws).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Event stream
// ---------------------------------------------------------------------------

enum Feed {
    All(broadcast::Receiver<Event>),
    Topic(TopicReceiver),
}

impl Feed {
    async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        match self {
            Feed::All(rx) => rx.recv().await,
            Feed::Topic(rx) => rx.recv().await,
        }
    }
}

async fn handle_events(
    stream: TcpStream,
    peer: SocketAddr,
    topic: Option<Topic>,
    state: &GatewayState,
) -> Result<(), LiftError> {
    // Subscribe before the handshake completes so the client misses nothing.
    let mut feed = match topic {
        Some(topic) => Feed::Topic(state.bus.subscribe_to(topic)),
        None => Feed::All(state.bus.subscribe()),
    };
    let ws = accept_async(stream)
        .await
        .map_err(|e| LiftError::Transport(format!("WS handshake from {peer}: {e}")))?;
    let (mut ws_tx, mut ws_rx) = ws.split();
    info!(%peer, ?topic, "event stream client connected");

    loop {
        tokio::select! {
            result = feed.recv() => match result {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => {
                        if ws_tx.send(Message::text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => error!(error = %e, "event serialization error"),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(%peer, lagged_by = n, "event stream client lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_upstream_message(text.as_str(), state) {
                        if ws_tx.send(Message::text(reply.to_string())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    info!(%peer, "event stream client disconnected");
    Ok(())
}

/// Handle one upstream text frame from an `/events` client.
///
/// Only `{"op":"transit","robotId":..,"from":..,"to":..}` is recognised; it
/// answers with a `transit_accepted` or `transit_rejected` frame.  Anything
/// else, including invalid JSON, is ignored.
pub(crate) fn handle_upstream_message(text: &str, state: &GatewayState) -> Option<Value> {
    let json: Value = serde_json::from_str(text).ok()?;
    if json.get("op").and_then(Value::as_str) != Some("transit") {
        return None;
    }

    let robot_id = json.get("robotId").and_then(Value::as_str).unwrap_or("");
    let floor = |key: &str| {
        json.get(key)
            .and_then(Value::as_u64)
            .and_then(|f| u8::try_from(f).ok())
    };
    let rejected = |error: String| {
        Some(json!({"type": "transit_rejected", "robotId": robot_id, "error": error}))
    };

    let (Some(from), Some(to)) = (floor("from"), floor("to")) else {
        return rejected("'from' and 'to' must be floor numbers".into());
    };
    let Some(orchestrator) = state.transit.as_ref() else {
        return rejected("transit is not available on this gateway".into());
    };
    if !state
        .directory
        .lookup(robot_id)
        .is_some_and(|r| r.kind() == DeviceKind::Robot)
    {
        return rejected(LiftError::UnknownDevice(robot_id.to_string()).to_string());
    }

    match orchestrator.spawn(TransitRequest::new(robot_id, from, to)) {
        Ok(handle) => {
            info!(%robot_id, from, to, transit_id = %handle.transit_id(), "transit accepted");
            Some(json!({
                "type": "transit_accepted",
                "robotId": robot_id,
                "transitId": handle.transit_id().to_string(),
            }))
        }
        Err(e) => {
            warn!(%robot_id, error = %e, "transit rejected");
            rejected(e.to_string())
        }
    }
}
