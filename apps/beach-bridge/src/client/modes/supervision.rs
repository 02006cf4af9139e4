use std::collections::VecDeque;
use std::time::Instant;

use super::{ModeError, ModeKind, ModeMachine, StopStep};
use crate::protocol::{ClientEvent, SupervisionStart, SupervisionStop, SupervisionSuggestion};

const MAX_SUGGESTIONS: usize = 20;

/// Supervised execution: the backend watches the session and may push
/// suggestions, which are shown but never executed.
#[derive(Debug)]
pub struct SupervisionMode {
    pub(super) machine: ModeMachine,
    mode: String,
    suggestions: VecDeque<SupervisionSuggestion>,
}

impl SupervisionMode {
    pub fn new(mode: impl Into<String>, now: Instant) -> Self {
        Self {
            machine: ModeMachine::new(ModeKind::Supervision, now),
            mode: mode.into(),
            suggestions: VecDeque::new(),
        }
    }

    pub fn machine(&self) -> &ModeMachine {
        &self.machine
    }

    pub fn suggestions(&self) -> impl Iterator<Item = &SupervisionSuggestion> {
        self.suggestions.iter()
    }

    pub fn start(
        &mut self,
        session_id: &str,
        terminal_id: &str,
        now: Instant,
    ) -> Result<ClientEvent, ModeError> {
        self.machine.begin_start(now)?;
        self.suggestions.clear();
        Ok(ClientEvent::SupervisionStart(SupervisionStart {
            session_id: session_id.to_string(),
            terminal_id: terminal_id.to_string(),
            mode: self.mode.clone(),
        }))
    }

    pub fn stop(
        &mut self,
        session_id: &str,
        terminal_id: &str,
        now: Instant,
    ) -> Result<Option<ClientEvent>, ModeError> {
        Ok(match self.machine.request_stop(now)? {
            StopStep::Send => Some(ClientEvent::SupervisionStop(SupervisionStop {
                session_id: session_id.to_string(),
                terminal_id: terminal_id.to_string(),
            })),
            StopStep::Deferred | StopStep::AlreadyOff | StopStep::Reset => None,
        })
    }

    /// Keep an advisory suggestion if the mode is active.
    pub fn accept_suggestion(&mut self, suggestion: &SupervisionSuggestion) -> bool {
        if !self.machine.phase().is_active() {
            return false;
        }
        if self.suggestions.len() == MAX_SUGGESTIONS {
            self.suggestions.pop_front();
        }
        self.suggestions.push_back(suggestion.clone());
        true
    }
}
