//! The persistent duplex channel: one ordered outbound queue that outlives
//! individual links, plus bounded reconnection that reattaches the same
//! session id every time.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use super::{Connector, Transport, TransportError};
use crate::protocol::{
    ClientEvent, CreateTerminal, ServerEvent, decode_server_event, encode_client_event,
};
use crate::session::SessionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub max_reconnect_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            backoff_base: Duration::from_millis(250),
            backoff_max: Duration::from_secs(5),
        }
    }
}

impl ChannelConfig {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// A link is up and `terminal:create` has been presented on it.
    Connected { attempt: u32, reattach: bool },
    Disconnected { reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnection budget exhausted; the channel is dead.
    GaveUp { attempts: u32 },
    /// The channel was shut down or the process exited.
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelNotice {
    Event(ServerEvent),
    Status(ChannelStatus),
}

struct Shared {
    session_id: SessionId,
    dimensions: Mutex<(u16, u16)>,
    connected: AtomicBool,
    exited: AtomicBool,
}

/// Cheap, cloneable sending side of the channel.
#[derive(Clone)]
pub struct ChannelHandle {
    outbound: mpsc::UnboundedSender<ClientEvent>,
    shutdown: Arc<watch::Sender<bool>>,
    shared: Arc<Shared>,
}

impl ChannelHandle {
    /// Fire-and-forget. Events are delivered in call order, across
    /// reconnects, or not at all.
    pub fn send(&self, event: ClientEvent) -> Result<(), TransportError> {
        if self.shared.exited.load(Ordering::Acquire) {
            return Err(TransportError::SessionExited);
        }
        self.outbound
            .send(event)
            .map_err(|_| TransportError::ChannelClosed)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.shared.session_id
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Dimensions presented in `terminal:create` on the next reattach.
    pub fn set_dimensions(&self, cols: u16, rows: u16) {
        *self.shared.dimensions.lock() = (cols, rows);
    }

    pub fn dimensions(&self) -> (u16, u16) {
        *self.shared.dimensions.lock()
    }

    /// The remote process is gone; stop reattaching.
    pub fn mark_exited(&self) {
        self.shared.exited.store(true, Ordering::Release);
    }

    pub fn has_exited(&self) -> bool {
        self.shared.exited.load(Ordering::Acquire)
    }

    /// Disconnect for good. Only called on real teardown, never on remount.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

enum PumpOutcome {
    Shutdown,
    LinkLost(String),
}

pub struct ChannelSupervisor {
    connector: Arc<dyn Connector>,
    config: ChannelConfig,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedReceiver<ClientEvent>,
    shutdown: watch::Receiver<bool>,
    notices: mpsc::UnboundedSender<ChannelNotice>,
    /// Events pulled off the queue whose send failed; resent first after reattach.
    pending: VecDeque<ClientEvent>,
}

impl ChannelSupervisor {
    pub fn spawn(
        connector: Arc<dyn Connector>,
        session_id: SessionId,
        dimensions: (u16, u16),
        config: ChannelConfig,
    ) -> (
        ChannelHandle,
        mpsc::UnboundedReceiver<ChannelNotice>,
        JoinHandle<()>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            session_id,
            dimensions: Mutex::new(dimensions),
            connected: AtomicBool::new(false),
            exited: AtomicBool::new(false),
        });
        let supervisor = ChannelSupervisor {
            connector,
            config,
            shared: shared.clone(),
            outbound: outbound_rx,
            shutdown: shutdown_rx,
            notices: notice_tx,
            pending: VecDeque::new(),
        };
        let task = tokio::spawn(supervisor.run());
        let handle = ChannelHandle {
            outbound: outbound_tx,
            shutdown: Arc::new(shutdown_tx),
            shared,
        };
        (handle, notice_rx, task)
    }

    async fn run(mut self) {
        let endpoint = self.connector.describe();
        let mut failures: u32 = 0;
        let mut ever_connected = false;

        loop {
            if self.shutdown_requested() || self.shared.exited.load(Ordering::Acquire) {
                break;
            }

            match self.connector.connect().await {
                Ok(mut link) => match self.present_session(link.as_ref()).await {
                    Ok(()) => {
                        self.shared.connected.store(true, Ordering::Release);
                        info!(
                            target: "bridge::transport",
                            session_id = %self.shared.session_id,
                            endpoint = %endpoint,
                            reattach = ever_connected,
                            "duplex channel connected"
                        );
                        self.notify(ChannelStatus::Connected {
                            attempt: failures + 1,
                            reattach: ever_connected,
                        });
                        ever_connected = true;
                        failures = 0;

                        let outcome = self.pump(link.as_mut()).await;
                        self.shared.connected.store(false, Ordering::Release);
                        match outcome {
                            PumpOutcome::Shutdown => {
                                link.close().await;
                                break;
                            }
                            PumpOutcome::LinkLost(reason) => {
                                warn!(
                                    target: "bridge::transport",
                                    session_id = %self.shared.session_id,
                                    reason = %reason,
                                    "duplex channel lost"
                                );
                                link.close().await;
                                self.notify(ChannelStatus::Disconnected { reason });
                                if self.shared.exited.load(Ordering::Acquire) {
                                    break;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        warn!(
                            target: "bridge::transport",
                            error = %err,
                            "failed to present session on new link"
                        );
                        link.close().await;
                    }
                },
                Err(err) => {
                    warn!(
                        target: "bridge::transport",
                        endpoint = %endpoint,
                        error = %err,
                        "connect attempt failed"
                    );
                }
            }

            failures += 1;
            if failures > self.config.max_reconnect_attempts {
                error!(
                    target: "bridge::transport",
                    session_id = %self.shared.session_id,
                    attempts = self.config.max_reconnect_attempts,
                    "exhausted reconnect attempts"
                );
                self.notify(ChannelStatus::GaveUp {
                    attempts: self.config.max_reconnect_attempts,
                });
                return;
            }
            let delay = self.config.backoff(failures);
            self.notify(ChannelStatus::Reconnecting {
                attempt: failures,
                delay,
            });
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        self.notify(ChannelStatus::Closed);
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn notify(&self, status: ChannelStatus) {
        let _ = self.notices.send(ChannelNotice::Status(status));
    }

    /// `terminal:create` with the stable id is always the first frame on a link.
    async fn present_session(&self, link: &dyn Transport) -> Result<(), TransportError> {
        let (cols, rows) = *self.shared.dimensions.lock();
        let create = ClientEvent::Create(CreateTerminal {
            id: self.shared.session_id.to_string(),
            cols,
            rows,
        });
        link.send(&encode_client_event(&create)).await
    }

    async fn pump(&mut self, link: &mut dyn Transport) -> PumpOutcome {
        while let Some(event) = self.pending.pop_front() {
            if let Err(err) = link.send(&encode_client_event(&event)).await {
                self.pending.push_front(event);
                return PumpOutcome::LinkLost(err.to_string());
            }
        }

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => return PumpOutcome::Shutdown,
                frame = link.recv() => {
                    let Some(frame) = frame else {
                        return PumpOutcome::LinkLost("remote closed the channel".into());
                    };
                    self.dispatch_frame(&frame);
                }
                event = self.outbound.recv() => {
                    let Some(event) = event else {
                        return PumpOutcome::Shutdown;
                    };
                    trace!(target: "bridge::transport", event = event.name(), "sending");
                    if let Err(err) = link.send(&encode_client_event(&event)).await {
                        self.pending.push_back(event);
                        return PumpOutcome::LinkLost(err.to_string());
                    }
                }
            }
        }
    }

    fn dispatch_frame(&self, frame: &str) {
        match decode_server_event(frame) {
            Ok(event) => {
                if let ServerEvent::Exit(exit) = &event {
                    if exit.id == self.shared.session_id.as_str() {
                        self.shared.exited.store(true, Ordering::Release);
                    } else {
                        trace!(target: "bridge::transport", id = %exit.id, "exit for another terminal");
                    }
                }
                let _ = self.notices.send(ChannelNotice::Event(event));
            }
            Err(err) => {
                debug!(target: "bridge::transport", error = %err, "dropping undecodable frame");
            }
        }
    }
}
