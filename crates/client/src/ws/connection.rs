//! Socket-level transport: opens a framed link to the broker.
//!
//! A [`Connector`] only produces a bidirectional stream of STOMP frames.
//! The STOMP handshake, subscriptions and routing live in the session.

use async_trait::async_trait;
use chatsync_shared::Frame;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::SyncError;

/// Connection state published by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }
}

/// An open, framed link to the broker.
///
/// Dropping or closing `outbound` closes the socket; `inbound` ends when the
/// remote side goes away.
pub struct Link {
    pub outbound: UnboundedSender<Frame>,
    pub inbound: UnboundedReceiver<Frame>,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new link. `token` is available for transports that
    /// authenticate at the socket level; STOMP auth happens afterwards.
    async fn open(&self, token: &str) -> Result<Link, SyncError>;
}

/// WebSocket transport using tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, _token: &str) -> Result<Link, SyncError> {
        let (ws_stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SyncError::ConnectFailed(format!("{}: {e}", self.url)))?;
        tracing::info!(url = %self.url, "WebSocket connected");

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = unbounded::<Frame>();
        let (inbound_tx, inbound_rx) = unbounded::<Frame>();

        // Read task: socket -> frames
        let url = self.url.clone();
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match Frame::decode(text.as_str()) {
                        Ok(Some(frame)) => {
                            tracing::trace!(command = %frame.command, "Frame received");
                            if inbound_tx.unbounded_send(frame).is_err() {
                                break;
                            }
                        }
                        Ok(None) => tracing::trace!("Heart-beat received"),
                        Err(e) => tracing::warn!(error = %e, "Dropping undecodable frame"),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!(url = %url, "WebSocket received close frame");
                        break;
                    }
                    Ok(_) => {
                        // Ping/pong is handled by tungstenite, binary is unused.
                    }
                    Err(e) => {
                        tracing::error!(url = %url, error = %e, "WebSocket read error");
                        break;
                    }
                }
            }
            inbound_tx.close_channel();
        });

        // Write task: frames -> socket
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.next().await {
                tracing::trace!(command = %frame.command, "Frame sent");
                if let Err(e) = write.send(Message::Text(frame.encode().into())).await {
                    tracing::error!(error = %e, "WebSocket send failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
