//! Outbound device transport.
//!
//! [`Connector`] is the seam between a supervisor and the network: it turns
//! a [`DeviceRecord`] into one live websocket.  [`WsConnector`] is the only
//! production implementation.

use std::time::Duration;

use async_trait::async_trait;
use liftlink_types::{DeviceRecord, LiftError};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

/// A connected device socket.
pub type DeviceSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Establishes one socket to a device.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, record: &DeviceRecord) -> Result<DeviceSocket, LiftError>;
}

/// Plain websocket connector with a bounded handshake time.
#[derive(Debug, Clone)]
pub struct WsConnector {
    handshake_timeout: Duration,
}

impl WsConnector {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, record: &DeviceRecord) -> Result<DeviceSocket, LiftError> {
        let url = record.ws_url();
        debug!(device_id = record.id(), %url, "opening device socket");
        let (socket, _response) = tokio::time::timeout(self.handshake_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| LiftError::Transport(format!("handshake with {url} timed out")))?
            .map_err(|e| LiftError::Transport(format!("connect to {url}: {e}")))?;
        Ok(socket)
    }
}
