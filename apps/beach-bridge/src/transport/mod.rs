use async_trait::async_trait;

use crate::protocol::WireError;

pub mod mock;
pub mod supervisor;
pub mod websocket;

pub use supervisor::{ChannelConfig, ChannelHandle, ChannelNotice, ChannelStatus, ChannelSupervisor};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,
    #[error("duplex channel closed")]
    ChannelClosed,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] WireError),
    #[error("remote process exited; a new session is required")]
    SessionExited,
}

/// One live link to the remote side. Frames are JSON text envelopes.
///
/// A link never reconnects by itself; [`ChannelSupervisor`] replaces dead
/// links with fresh ones from a [`Connector`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue a frame for the peer. Frames leave in call order.
    async fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Next frame from the peer, or `None` once the link is gone.
    async fn recv(&mut self) -> Option<String>;

    fn is_connected(&self) -> bool;

    async fn close(&mut self);
}

/// Opens new links for the supervisor (initial connect and every reattach).
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// Human readable endpoint for banners and logs.
    fn describe(&self) -> String;
}
