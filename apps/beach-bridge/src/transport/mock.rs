//! In-memory remote endpoint for tests and offline demos.
//!
//! [`MockRemote`] plays the PTY host: it records every client event in the
//! order the bridge sent it, can push server events, and can drop or refuse
//! connections to exercise the reconnect path.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

use super::{Connector, Transport, TransportError};
use crate::protocol::{
    ClientEvent, ServerEvent, TerminalCreated, decode_client_event, encode_server_event,
};

#[derive(Default)]
struct RemoteState {
    events: Vec<ClientEvent>,
    connects: usize,
    refuse_connects: usize,
    auto_pid: Option<u32>,
    to_client: Option<mpsc::UnboundedSender<String>>,
    link_alive: Option<Arc<AtomicBool>>,
}

#[derive(Clone, Default)]
pub struct MockRemote {
    state: Arc<Mutex<RemoteState>>,
    changed: Arc<Notify>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every `terminal:create` with `terminal:created` carrying `pid`.
    pub fn with_auto_created(self, pid: u32) -> Self {
        self.state.lock().auto_pid = Some(pid);
        self
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            remote: self.clone(),
        }
    }

    /// Every client event received so far, across all connections.
    pub fn events(&self) -> Vec<ClientEvent> {
        self.state.lock().events.clone()
    }

    /// Concatenated `terminal:data` payloads, i.e. the keystrokes the PTY saw.
    pub fn keystrokes(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ClientEvent::Data(data) => Some(data.data),
                _ => None,
            })
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().to_client.is_some()
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_connects(&self, count: usize) {
        self.state.lock().refuse_connects = count;
    }

    pub fn push(&self, event: &ServerEvent) -> bool {
        let Ok(frame) = encode_server_event(event) else {
            return false;
        };
        let state = self.state.lock();
        match state.to_client.as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    pub fn push_raw(&self, frame: &str) -> bool {
        let state = self.state.lock();
        match state.to_client.as_ref() {
            Some(tx) => tx.send(frame.to_string()).is_ok(),
            None => false,
        }
    }

    /// Drop the current link as if the network went away.
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        state.to_client = None;
        if let Some(alive) = state.link_alive.take() {
            alive.store(false, Ordering::Release);
        }
        drop(state);
        self.changed.notify_waiters();
    }

    /// Wait until `predicate` holds over the recorded events.
    pub async fn wait_until<F>(&self, timeout: Duration, mut predicate: F) -> bool
    where
        F: FnMut(&[ClientEvent]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            if predicate(&self.state.lock().events) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return predicate(&self.state.lock().events);
            }
        }
    }

    fn record(&self, frame: &str) -> Result<(), TransportError> {
        let event = decode_client_event(frame)?;
        let mut state = self.state.lock();
        if let (ClientEvent::Create(create), Some(pid)) = (&event, state.auto_pid) {
            let reply = ServerEvent::Created(TerminalCreated {
                id: create.id.clone(),
                pid,
            });
            if let (Some(tx), Ok(frame)) = (state.to_client.as_ref(), encode_server_event(&reply)) {
                let _ = tx.send(frame);
            }
        }
        state.events.push(event);
        drop(state);
        self.changed.notify_waiters();
        Ok(())
    }
}

pub struct MockConnector {
    remote: MockRemote,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let mut state = self.remote.state.lock();
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(TransportError::Connect("mock remote refused connection".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        state.connects += 1;
        state.to_client = Some(tx);
        state.link_alive = Some(alive.clone());
        drop(state);
        self.remote.changed.notify_waiters();
        Ok(Box::new(MockTransport {
            remote: self.remote.clone(),
            inbound: rx,
            alive,
        }))
    }

    fn describe(&self) -> String {
        "mock://remote".to_string()
    }
}

pub struct MockTransport {
    remote: MockRemote,
    inbound: mpsc::UnboundedReceiver<String>,
    alive: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.remote.record(frame)
    }

    async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    fn is_connected(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn close(&mut self) {
        self.alive.store(false, Ordering::Release);
        self.inbound.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{TerminalData, encode_client_event};

    #[test_timeout::tokio_timeout_test]
    async fn records_frames_in_order_and_drops_on_disconnect() {
        let remote = MockRemote::new();
        let mut link = remote.connector().connect().await.unwrap();
        for ch in ["a", "b"] {
            let frame = encode_client_event(&ClientEvent::Data(TerminalData {
                id: "s".into(),
                data: ch.into(),
            }));
            link.send(&frame).await.unwrap();
        }
        assert_eq!(remote.keystrokes(), vec!["a", "b"]);

        remote.disconnect();
        assert!(!link.is_connected());
        assert!(link.recv().await.is_none());
    }

    #[test_timeout::tokio_timeout_test]
    async fn refused_connects_are_counted_down() {
        let remote = MockRemote::new();
        remote.refuse_connects(1);
        assert!(remote.connector().connect().await.is_err());
        assert!(remote.connector().connect().await.is_ok());
        assert_eq!(remote.connects(), 1);
    }
}
