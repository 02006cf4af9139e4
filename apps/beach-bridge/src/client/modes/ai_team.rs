use std::time::Instant;

use super::{ModeError, ModeKind, ModeMachine, StopStep};
use crate::client::status::{PollOutcome, StatusCounts};
use crate::protocol::{ClientEvent, TeamSpawnRequest, TeamStop, ThinkingAnnotation};

/// Multi-agent broadcast. While active it owns input routing and a status
/// poller runs against its team id.
#[derive(Debug)]
pub struct AiTeamMode {
    pub(super) machine: ModeMachine,
    requirement: Option<String>,
    team_id: Option<String>,
    agent_count: u32,
    last_poll: Option<Instant>,
    last_counts: Option<StatusCounts>,
    poll_outcome: Option<PollOutcome>,
}

impl AiTeamMode {
    pub fn new(now: Instant) -> Self {
        Self {
            machine: ModeMachine::new(ModeKind::AiTeam, now),
            requirement: None,
            team_id: None,
            agent_count: 0,
            last_poll: None,
            last_counts: None,
            poll_outcome: None,
        }
    }

    pub fn machine(&self) -> &ModeMachine {
        &self.machine
    }

    pub fn team_id(&self) -> Option<&str> {
        self.team_id.as_deref()
    }

    pub fn agent_count(&self) -> u32 {
        self.agent_count
    }

    pub fn requirement(&self) -> Option<&str> {
        self.requirement.as_deref()
    }

    pub fn last_poll(&self) -> Option<Instant> {
        self.last_poll
    }

    pub fn last_counts(&self) -> Option<&StatusCounts> {
        self.last_counts.as_ref()
    }

    pub fn poll_outcome(&self) -> Option<PollOutcome> {
        self.poll_outcome
    }

    pub fn start(
        &mut self,
        requirement: &str,
        session_id: &str,
        thinking: Option<ThinkingAnnotation>,
        now: Instant,
    ) -> Result<ClientEvent, ModeError> {
        let requirement = requirement.trim();
        if requirement.is_empty() {
            return Err(ModeError::MissingRequirement);
        }
        self.machine.begin_start(now)?;
        self.requirement = Some(requirement.to_string());
        self.team_id = None;
        self.agent_count = 0;
        self.last_poll = None;
        self.last_counts = None;
        self.poll_outcome = None;
        Ok(ClientEvent::TeamSpawn(TeamSpawnRequest {
            requirement: requirement.to_string(),
            session_id: session_id.to_string(),
            thinking,
        }))
    }

    /// Record the spawn confirmation. Returns whether a stop was requested
    /// while the spawn was in flight.
    pub fn spawned(
        &mut self,
        team_id: &str,
        agent_count: u32,
        now: Instant,
    ) -> Result<bool, ModeError> {
        let stop_pending = self.machine.confirm_started(now)?;
        self.team_id = Some(team_id.to_string());
        self.agent_count = agent_count;
        Ok(stop_pending)
    }

    pub fn stop(&mut self, session_id: &str, now: Instant) -> Result<Option<ClientEvent>, ModeError> {
        Ok(match self.machine.request_stop(now)? {
            StopStep::Send => self.team_id.as_ref().map(|team_id| {
                ClientEvent::TeamStop(TeamStop {
                    team_id: team_id.clone(),
                    session_id: session_id.to_string(),
                })
            }),
            StopStep::Deferred | StopStep::AlreadyOff | StopStep::Reset => None,
        })
    }

    pub fn record_poll(&mut self, counts: StatusCounts, now: Instant) -> bool {
        let changed = self.last_counts.as_ref() != Some(&counts);
        self.last_poll = Some(now);
        self.last_counts = Some(counts);
        changed
    }

    pub fn record_outcome(&mut self, outcome: PollOutcome) {
        self.poll_outcome = Some(outcome);
    }
}
