//! Session identity and the registry that keeps a channel alive across
//! view remounts.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::buffer_guard::BufferSnapshot;
use crate::client::modes::ModeController;
use crate::transport::{ChannelConfig, ChannelHandle, ChannelNotice, ChannelSupervisor, Connector};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid session id {0:?}")]
    InvalidId(String),
}

/// Stable handle presented to the PTY host on every (re)attach.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(SessionError::InvalidId(s.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// What a `terminal:created` meant for this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatedOutcome {
    Fresh,
    /// Same process as before the disconnect.
    Reattached,
    /// The host recreated the process; earlier shell state is gone.
    Respawned { previous_pid: u32 },
}

#[derive(Debug, Clone)]
pub struct TerminalSession {
    pub id: SessionId,
    pub cols: u16,
    pub rows: u16,
    pub connected: bool,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub exited: bool,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub reattachments: u32,
}

impl TerminalSession {
    pub fn new(id: SessionId, cols: u16, rows: u16, now: Instant) -> Self {
        Self {
            id,
            cols,
            rows,
            connected: false,
            pid: None,
            exit_code: None,
            exited: false,
            created_at: now,
            last_activity: now,
            bytes_in: 0,
            bytes_out: 0,
            reattachments: 0,
        }
    }

    pub fn on_created(&mut self, pid: u32, now: Instant) -> CreatedOutcome {
        self.connected = true;
        self.last_activity = now;
        let outcome = match self.pid {
            None => CreatedOutcome::Fresh,
            Some(previous) if previous == pid => {
                self.reattachments += 1;
                CreatedOutcome::Reattached
            }
            Some(previous_pid) => {
                self.reattachments += 1;
                CreatedOutcome::Respawned { previous_pid }
            }
        };
        self.pid = Some(pid);
        outcome
    }

    pub fn on_disconnected(&mut self) {
        self.connected = false;
    }

    pub fn on_exit(&mut self, exit_code: Option<i32>) {
        self.exited = true;
        self.exit_code = exit_code;
        self.connected = false;
    }

    pub fn record_input(&mut self, bytes: usize, now: Instant) {
        self.bytes_out += bytes as u64;
        self.last_activity = now;
    }

    pub fn record_output(&mut self, bytes: usize, now: Instant) {
        self.bytes_in += bytes as u64;
        self.last_activity = now;
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.cols = cols;
        self.rows = rows;
    }

    pub fn uptime(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }
}

/// The parts of an attachment a view owns while mounted.
#[derive(Debug)]
pub struct SessionStream {
    pub notices: mpsc::UnboundedReceiver<ChannelNotice>,
    pub session: TerminalSession,
    /// Scrollback captured when the previous view unmounted.
    pub snapshot: Option<BufferSnapshot>,
    /// Mode state carried across a remount.
    pub modes: Option<ModeController>,
}

struct Entry {
    handle: ChannelHandle,
    parked: Option<SessionStream>,
    task: JoinHandle<()>,
}

/// Owns every live channel, keyed by session id.
///
/// `acquire` never opens a second channel for an id; a view that unmounts
/// for a remount parks its stream here and the channel stays up. Only
/// `release` disconnects.
pub struct SessionRegistry {
    connector: Arc<dyn Connector>,
    config: ChannelConfig,
    entries: Mutex<HashMap<SessionId, Entry>>,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn Connector>, config: ChannelConfig) -> Self {
        Self {
            connector,
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Must be called from within a Tokio runtime; the first acquisition
    /// for an id spawns its channel supervisor.
    pub fn acquire(&self, id: &SessionId, cols: u16, rows: u16) -> ChannelHandle {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(id) {
            debug!(target: "bridge::session", session_id = %id, "reusing live channel");
            return entry.handle.clone();
        }

        let (handle, notices, task) = ChannelSupervisor::spawn(
            self.connector.clone(),
            id.clone(),
            (cols, rows),
            self.config.clone(),
        );
        info!(target: "bridge::session", session_id = %id, cols, rows, "opened session channel");
        let session = TerminalSession::new(id.clone(), cols, rows, Instant::now());
        entries.insert(
            id.clone(),
            Entry {
                handle: handle.clone(),
                parked: Some(SessionStream {
                    notices,
                    session,
                    snapshot: None,
                    modes: None,
                }),
                task,
            },
        );
        handle
    }

    /// Hand the event stream to the mounting view. `None` when another
    /// view holds it or the id is unknown.
    pub fn take_stream(&self, id: &SessionId) -> Option<SessionStream> {
        self.entries.lock().get_mut(id)?.parked.take()
    }

    /// Give the stream back on remount; the channel keeps running.
    pub fn park(&self, id: &SessionId, stream: SessionStream) {
        if let Some(entry) = self.entries.lock().get_mut(id) {
            debug!(target: "bridge::session", session_id = %id, "parked session stream");
            entry.parked = Some(stream);
        }
    }

    /// Disconnect for real. Returns the supervisor task so callers can wait
    /// for it to wind down.
    pub fn release(&self, id: &SessionId) -> Option<JoinHandle<()>> {
        let entry = self.entries.lock().remove(id)?;
        info!(target: "bridge::session", session_id = %id, "releasing session channel");
        entry.handle.close();
        Some(entry.task)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
