use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, trace};

use super::{Connector, Transport, TransportError};

pub mod config;
pub use config::WebSocketConfig;

/// WebSocket implementation of the Transport trait
pub struct WebSocketTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
    connected: Arc<AtomicBool>,
    ws_task: Option<tokio::task::JoinHandle<()>>,
}

impl WebSocketTransport {
    pub async fn connect(config: &WebSocketConfig) -> Result<Self, TransportError> {
        let url = config.validate()?;
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        debug!(target: "bridge::transport", url = %url, "websocket connected");

        let (tx_out, rx_out) = mpsc::unbounded_channel::<String>();
        let (tx_in, rx_in) = mpsc::unbounded_channel::<String>();

        let connected = Arc::new(AtomicBool::new(true));
        let connected_clone = connected.clone();

        let ws_task = tokio::spawn(async move {
            handle_websocket(ws_stream, rx_out, tx_in, connected_clone).await;
        });

        Ok(Self {
            tx: tx_out,
            rx: rx_in,
            connected,
            ws_task: Some(ws_task),
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.tx
            .send(frame.to_string())
            .map_err(|_| TransportError::NotConnected)
    }

    async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn close(&mut self) {
        self.connected.store(false, Ordering::Release);
        if let Some(task) = self.ws_task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(task) = self.ws_task.take() {
            task.abort();
        }
    }
}

/// Pumps frames between the socket and the transport's queues. A single
/// writer task keeps outgoing frames in queue order.
async fn handle_websocket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_out: mpsc::UnboundedReceiver<String>,
    tx_in: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx_out.recv().await {
            if ws_sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if tx_in.send(text).is_err() {
                    break;
                }
            }
            Ok(Message::Binary(data)) => {
                // Some hosts push output as binary frames carrying the same JSON envelope.
                if tx_in
                    .send(String::from_utf8_lossy(&data).into_owned())
                    .is_err()
                {
                    break;
                }
            }
            Ok(Message::Close(frame)) => {
                trace!(target: "bridge::transport", ?frame, "websocket closed by peer");
                break;
            }
            Err(err) => {
                debug!(target: "bridge::transport", error = %err, "websocket read failed");
                break;
            }
            _ => {}
        }
    }

    connected.store(false, Ordering::Release);
    send_task.abort();
    let _ = send_task.await;
}

/// Opens a fresh [`WebSocketTransport`] for every (re)connect.
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let transport = WebSocketTransport::connect(&self.config).await?;
        Ok(Box::new(transport))
    }

    fn describe(&self) -> String {
        self.config.build_url()
    }
}
