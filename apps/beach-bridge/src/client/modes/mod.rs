//! Mode state machines layered over the channel and the router.

pub mod ai_team;
pub mod supervision;
pub mod thinking;

use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::directives::blocks::{self, ModeLine};
use super::status::{PollEvent, PollOutcome};
use crate::protocol::{ClientEvent, ServerEvent};

pub use ai_team::AiTeamMode;
pub use supervision::SupervisionMode;
pub use thinking::{ThinkingMode, ThinkingState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeKind {
    Supervision,
    AiTeam,
}

impl ModeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModeKind::Supervision => "supervision",
            ModeKind::AiTeam => "ai-team",
        }
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModePhase {
    Off,
    Starting,
    Active,
    Stopping,
    Error,
}

impl ModePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ModePhase::Off => "off",
            ModePhase::Starting => "starting",
            ModePhase::Active => "active",
            ModePhase::Stopping => "stopping",
            ModePhase::Error => "error",
        }
    }

    pub fn is_active(self) -> bool {
        self == ModePhase::Active
    }

    pub fn in_flight(self) -> bool {
        matches!(self, ModePhase::Starting | ModePhase::Stopping)
    }
}

impl fmt::Display for ModePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_valid_transition(from: ModePhase, to: ModePhase) -> bool {
    matches!(
        (from, to),
        (ModePhase::Off, ModePhase::Starting)
            | (ModePhase::Starting, ModePhase::Active)
            | (ModePhase::Starting, ModePhase::Error)
            // Server tore the mode down before confirming it.
            | (ModePhase::Starting, ModePhase::Off)
            | (ModePhase::Active, ModePhase::Stopping)
            | (ModePhase::Active, ModePhase::Error)
            | (ModePhase::Stopping, ModePhase::Off)
            | (ModePhase::Stopping, ModePhase::Error)
            | (ModePhase::Error, ModePhase::Starting)
            | (ModePhase::Error, ModePhase::Off)
    )
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModeError {
    #[error("{mode} is {phase}; wait for it to finish")]
    TransitionInFlight { mode: ModeKind, phase: ModePhase },
    #[error("{0} is already active")]
    AlreadyActive(ModeKind),
    #[error("{mode} cannot go from {from} to {to}")]
    InvalidTransition {
        mode: ModeKind,
        from: ModePhase,
        to: ModePhase,
    },
    #[error("an AI team needs a task description")]
    MissingRequirement,
    #[error("{mode} request could not be sent: {reason}")]
    Send { mode: ModeKind, reason: String },
}

/// What a stop request turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStep {
    /// Send the stop event now.
    Send,
    /// Start still in flight; the stop runs once it resolves.
    Deferred,
    AlreadyOff,
    /// Error state cleared locally; nothing to send.
    Reset,
}

/// One mode's lifecycle. Transitions are validated and strictly
/// sequential: a new one cannot begin while `Starting` or `Stopping`.
#[derive(Debug)]
pub struct ModeMachine {
    kind: ModeKind,
    phase: ModePhase,
    changed_at: Instant,
    stop_pending: bool,
    stop_timeout: Duration,
    stop_deadline: Option<Instant>,
    last_error: Option<String>,
}

impl ModeMachine {
    pub fn new(kind: ModeKind, now: Instant) -> Self {
        Self {
            kind,
            phase: ModePhase::Off,
            changed_at: now,
            stop_pending: false,
            stop_timeout: Duration::from_secs(5),
            stop_deadline: None,
            last_error: None,
        }
    }

    pub fn kind(&self) -> ModeKind {
        self.kind
    }

    pub fn phase(&self) -> ModePhase {
        self.phase
    }

    pub fn changed_at(&self) -> Instant {
        self.changed_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn stop_pending(&self) -> bool {
        self.stop_pending
    }

    pub fn set_stop_timeout(&mut self, timeout: Duration) {
        self.stop_timeout = timeout;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.stop_deadline
    }

    fn transition(&mut self, to: ModePhase, now: Instant) -> Result<(), ModeError> {
        if !is_valid_transition(self.phase, to) {
            return Err(ModeError::InvalidTransition {
                mode: self.kind,
                from: self.phase,
                to,
            });
        }
        debug!(
            target: "bridge::modes",
            mode = %self.kind,
            from = %self.phase,
            to = %to,
            "mode transition"
        );
        self.phase = to;
        self.changed_at = now;
        if to != ModePhase::Stopping {
            self.stop_deadline = None;
        }
        Ok(())
    }

    pub fn begin_start(&mut self, now: Instant) -> Result<(), ModeError> {
        match self.phase {
            ModePhase::Starting | ModePhase::Stopping => Err(ModeError::TransitionInFlight {
                mode: self.kind,
                phase: self.phase,
            }),
            ModePhase::Active => Err(ModeError::AlreadyActive(self.kind)),
            ModePhase::Off | ModePhase::Error => {
                self.last_error = None;
                self.stop_pending = false;
                self.transition(ModePhase::Starting, now)
            }
        }
    }

    /// Returns whether a stop was queued while starting.
    pub fn confirm_started(&mut self, now: Instant) -> Result<bool, ModeError> {
        self.transition(ModePhase::Active, now)?;
        Ok(std::mem::take(&mut self.stop_pending))
    }

    pub fn request_stop(&mut self, now: Instant) -> Result<StopStep, ModeError> {
        match self.phase {
            ModePhase::Off => Ok(StopStep::AlreadyOff),
            ModePhase::Starting => {
                self.stop_pending = true;
                Ok(StopStep::Deferred)
            }
            ModePhase::Stopping => Err(ModeError::TransitionInFlight {
                mode: self.kind,
                phase: self.phase,
            }),
            ModePhase::Active => {
                self.transition(ModePhase::Stopping, now)?;
                self.stop_deadline = Some(now + self.stop_timeout);
                Ok(StopStep::Send)
            }
            ModePhase::Error => {
                self.transition(ModePhase::Off, now)?;
                Ok(StopStep::Reset)
            }
        }
    }

    /// The backend confirmed (or initiated) the stop.
    pub fn confirm_stopped(&mut self, now: Instant) {
        match self.phase {
            ModePhase::Off => {}
            ModePhase::Active => {
                let _ = self.transition(ModePhase::Stopping, now);
                let _ = self.transition(ModePhase::Off, now);
            }
            _ => {
                let _ = self.transition(ModePhase::Off, now);
            }
        }
        self.stop_pending = false;
    }

    /// A start/stop was rejected or could not be sent. Other modes are
    /// unaffected.
    pub fn fail(&mut self, message: impl Into<String>, now: Instant) {
        let message = message.into();
        warn!(target: "bridge::modes", mode = %self.kind, error = %message, "mode transition failed");
        self.last_error = Some(message);
        self.stop_pending = false;
        if self.phase != ModePhase::Off && self.phase != ModePhase::Error {
            let _ = self.transition(ModePhase::Error, now);
        }
    }

    /// Force `Stopping` to `Off` once the confirmation deadline passed.
    pub fn expire_stop(&mut self, now: Instant) -> bool {
        match self.stop_deadline {
            Some(deadline) if now >= deadline && self.phase == ModePhase::Stopping => {
                let _ = self.transition(ModePhase::Off, now);
                true
            }
            _ => false,
        }
    }
}

/// Side effects the runtime carries out for the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ModeEffect {
    Send { mode: ModeKind, event: ClientEvent },
    /// Text block for the terminal surface.
    Render(String),
    StartPolling { team_id: String },
    StopPolling,
}

#[derive(Debug, Clone)]
pub struct ModeSettings {
    pub stop_timeout: Duration,
    pub supervision_mode: String,
    /// Modes that may claim exclusive routing, highest priority first.
    pub claim_priority: Vec<ModeKind>,
    pub thinking: ThinkingMode,
}

impl Default for ModeSettings {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(5),
            supervision_mode: "advisory".to_string(),
            claim_priority: vec![ModeKind::AiTeam],
            thinking: ThinkingMode::Normal,
        }
    }
}

/// Owns every mode of one session. Reads routing state, never writes it.
#[derive(Debug)]
pub struct ModeController {
    session_id: String,
    terminal_id: String,
    supervision: SupervisionMode,
    team: AiTeamMode,
    thinking: ThinkingState,
    claim_priority: Vec<ModeKind>,
}

impl ModeController {
    pub fn new(settings: ModeSettings, session_id: String, terminal_id: String, now: Instant) -> Self {
        let mut supervision = SupervisionMode::new(settings.supervision_mode, now);
        supervision.machine.set_stop_timeout(settings.stop_timeout);
        let mut team = AiTeamMode::new(now);
        team.machine.set_stop_timeout(settings.stop_timeout);
        Self {
            session_id,
            terminal_id,
            supervision,
            team,
            thinking: ThinkingState::new(settings.thinking),
            claim_priority: settings.claim_priority,
        }
    }

    pub fn supervision(&self) -> &SupervisionMode {
        &self.supervision
    }

    pub fn team(&self) -> &AiTeamMode {
        &self.team
    }

    pub fn thinking(&self) -> &ThinkingState {
        &self.thinking
    }

    pub fn set_thinking(&mut self, mode: ThinkingMode) {
        self.thinking.mode = mode;
    }

    pub fn phase(&self, kind: ModeKind) -> ModePhase {
        self.machine(kind).phase()
    }

    fn machine(&self, kind: ModeKind) -> &ModeMachine {
        match kind {
            ModeKind::Supervision => &self.supervision.machine,
            ModeKind::AiTeam => &self.team.machine,
        }
    }

    fn machine_mut(&mut self, kind: ModeKind) -> &mut ModeMachine {
        match kind {
            ModeKind::Supervision => &mut self.supervision.machine,
            ModeKind::AiTeam => &mut self.team.machine,
        }
    }

    /// First mode in priority order that currently owns input routing.
    pub fn exclusive_claim(&self) -> Option<ModeKind> {
        self.claim_priority
            .iter()
            .copied()
            .find(|kind| self.claims_routing(*kind))
    }

    fn claims_routing(&self, kind: ModeKind) -> bool {
        match kind {
            ModeKind::AiTeam => self.team.machine.phase().is_active(),
            ModeKind::Supervision => false,
        }
    }

    pub fn start_supervision(&mut self, now: Instant) -> Result<Vec<ModeEffect>, ModeError> {
        let event = self
            .supervision
            .start(&self.session_id, &self.terminal_id, now)?;
        Ok(vec![
            ModeEffect::Send {
                mode: ModeKind::Supervision,
                event,
            },
            ModeEffect::Render(blocks::banner("starting supervision...")),
        ])
    }

    pub fn stop_supervision(&mut self, now: Instant) -> Result<Vec<ModeEffect>, ModeError> {
        let event = self
            .supervision
            .stop(&self.session_id, &self.terminal_id, now)?;
        Ok(event
            .map(|event| ModeEffect::Send {
                mode: ModeKind::Supervision,
                event,
            })
            .into_iter()
            .collect())
    }

    pub fn start_team(&mut self, requirement: &str, now: Instant) -> Result<Vec<ModeEffect>, ModeError> {
        let annotation = self.thinking.mode.annotation();
        let event = self.team.start(requirement, &self.session_id, annotation, now)?;
        Ok(vec![
            ModeEffect::Send {
                mode: ModeKind::AiTeam,
                event,
            },
            ModeEffect::Render(blocks::banner("spawning AI team...")),
        ])
    }

    pub fn stop_team(&mut self, now: Instant) -> Result<Vec<ModeEffect>, ModeError> {
        let was_active = self.team.machine.phase().is_active();
        let event = self.team.stop(&self.session_id, now)?;
        let mut effects = Vec::new();
        if was_active {
            effects.push(ModeEffect::StopPolling);
        }
        if let Some(event) = event {
            effects.push(ModeEffect::Send {
                mode: ModeKind::AiTeam,
                event,
            });
        }
        Ok(effects)
    }

    /// Drive every mode that is not off towards off. One mode failing does
    /// not hold back the others.
    pub fn emergency_stop(&mut self, now: Instant) -> Vec<ModeEffect> {
        info!(target: "bridge::modes", "emergency stop");
        let mut effects = Vec::new();
        for kind in [ModeKind::AiTeam, ModeKind::Supervision] {
            if self.phase(kind) == ModePhase::Off {
                continue;
            }
            let result = match kind {
                ModeKind::AiTeam => self.stop_team(now),
                ModeKind::Supervision => self.stop_supervision(now),
            };
            match result {
                Ok(mut stop) => effects.append(&mut stop),
                Err(ModeError::TransitionInFlight { .. }) => {}
                Err(err) => {
                    self.machine_mut(kind).fail(err.to_string(), now);
                    effects.push(ModeEffect::Render(blocks::banner(&format!(
                        "emergency stop of {kind} failed: {err}"
                    ))));
                }
            }
        }
        effects.push(ModeEffect::Render(blocks::banner("emergency stop requested")));
        effects
    }

    /// The runtime could not deliver a mode request.
    pub fn send_failed(&mut self, kind: ModeKind, reason: &str, now: Instant) -> Vec<ModeEffect> {
        let err = ModeError::Send {
            mode: kind,
            reason: reason.to_string(),
        };
        self.machine_mut(kind).fail(err.to_string(), now);
        let mut effects = vec![ModeEffect::Render(blocks::banner(&err.to_string()))];
        if kind == ModeKind::AiTeam {
            effects.push(ModeEffect::StopPolling);
        }
        effects
    }

    pub fn handle_event(&mut self, event: &ServerEvent, now: Instant) -> Vec<ModeEffect> {
        let mut effects = Vec::new();
        match event {
            ServerEvent::SupervisionStarted(_) => {
                match self.supervision.machine.confirm_started(now) {
                    Ok(stop_pending) => {
                        effects.push(ModeEffect::Render(blocks::banner("supervision active")));
                        if stop_pending {
                            effects.extend(self.stop_supervision(now).unwrap_or_default());
                        }
                    }
                    Err(err) => debug!(target: "bridge::modes", error = %err, "ignoring supervision:started"),
                }
            }
            ServerEvent::SupervisionStopped(_) => {
                self.supervision.machine.confirm_stopped(now);
                effects.push(ModeEffect::Render(blocks::banner("supervision stopped")));
            }
            ServerEvent::SupervisionError(failure) => {
                self.supervision.machine.fail(failure.message.clone(), now);
                effects.push(ModeEffect::Render(blocks::banner(&format!(
                    "supervision failed: {}",
                    failure.message
                ))));
            }
            ServerEvent::SupervisionSuggestion(suggestion) => {
                if self.supervision.accept_suggestion(suggestion) {
                    effects.push(ModeEffect::Render(blocks::advisory_block(
                        &suggestion.suggestion,
                        suggestion.command.as_deref(),
                        suggestion.confidence,
                    )));
                }
            }
            ServerEvent::TeamSpawned(spawned) => {
                match self.team.spawned(&spawned.team_id, spawned.agent_count, now) {
                    Ok(stop_pending) => {
                        effects.push(ModeEffect::Render(blocks::banner(&format!(
                            "AI team {} active with {} agents; input now goes to the team",
                            spawned.team_id, spawned.agent_count
                        ))));
                        if stop_pending {
                            effects.extend(self.stop_team(now).unwrap_or_default());
                        } else {
                            effects.push(ModeEffect::StartPolling {
                                team_id: spawned.team_id.clone(),
                            });
                        }
                    }
                    Err(err) => debug!(target: "bridge::modes", error = %err, "ignoring ai-team:spawned"),
                }
            }
            ServerEvent::TeamStopped(_) => {
                if self.team.machine.phase() != ModePhase::Off {
                    self.team.machine.confirm_stopped(now);
                    effects.push(ModeEffect::StopPolling);
                    effects.push(ModeEffect::Render(blocks::banner("AI team stopped")));
                }
            }
            ServerEvent::TeamError(failure) => {
                self.team.machine.fail(failure.message.clone(), now);
                effects.push(ModeEffect::StopPolling);
                effects.push(ModeEffect::Render(blocks::banner(&format!(
                    "AI team failed: {}",
                    failure.message
                ))));
            }
            ServerEvent::ThinkingStart(start) => {
                let text = self.thinking.started(&start.mode);
                effects.push(ModeEffect::Render(blocks::banner(&text)));
            }
            ServerEvent::ThinkingComplete(complete) => {
                let text = self
                    .thinking
                    .completed(&complete.mode, complete.error.as_deref());
                effects.push(ModeEffect::Render(blocks::banner(&text)));
            }
            _ => {}
        }
        effects
    }

    pub fn handle_poll(&mut self, event: PollEvent, now: Instant) -> Vec<ModeEffect> {
        let active_team = self.team.team_id().map(str::to_string);
        match event {
            PollEvent::Report(report) => {
                if active_team.as_deref() != Some(report.team_id.as_str()) {
                    return Vec::new();
                }
                let summary = report.counts.summary();
                if self.team.record_poll(report.counts, now) {
                    return vec![ModeEffect::Render(blocks::banner(&format!(
                        "team {}: {summary}",
                        report.team_id
                    )))];
                }
                Vec::new()
            }
            PollEvent::Failed { .. } => Vec::new(),
            PollEvent::Finished { team_id, outcome } => {
                if active_team.as_deref() != Some(team_id.as_str()) {
                    return Vec::new();
                }
                self.team.record_outcome(outcome);
                let text = match outcome {
                    PollOutcome::Settled => format!("team {team_id}: all agents are on task"),
                    PollOutcome::TimedOut => {
                        format!("team {team_id}: stopped polling, no settled status")
                    }
                };
                vec![ModeEffect::Render(blocks::banner(&text))]
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.supervision.machine.next_deadline(),
            self.team.machine.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Force stops that were never confirmed.
    pub fn tick(&mut self, now: Instant) -> Vec<ModeEffect> {
        let mut effects = Vec::new();
        for kind in [ModeKind::Supervision, ModeKind::AiTeam] {
            if self.machine_mut(kind).expire_stop(now) {
                warn!(target: "bridge::modes", mode = %kind, "stop not confirmed; forcing off");
                effects.push(ModeEffect::Render(blocks::banner(&format!(
                    "{kind} did not confirm stop; turned off locally"
                ))));
            }
        }
        effects
    }

    pub fn mode_lines(&self) -> Vec<ModeLine> {
        let supervision = self.supervision.machine();
        let team = self.team.machine();
        let mut team_state = team.phase().to_string();
        if let Some(team_id) = self.team.team_id() {
            team_state.push_str(&format!(" (team {team_id}, {} agents", self.team.agent_count()));
            if let Some(counts) = self.team.last_counts() {
                team_state.push_str(&format!("; {}", counts.summary()));
            }
            team_state.push(')');
        }
        let with_error = |phase: ModePhase, error: Option<&str>| match error {
            Some(error) if phase == ModePhase::Error => format!("{phase}: {error}"),
            _ => phase.to_string(),
        };
        vec![
            ModeLine {
                mode: ModeKind::Supervision.to_string(),
                state: with_error(supervision.phase(), supervision.last_error()),
            },
            ModeLine {
                mode: ModeKind::AiTeam.to_string(),
                state: if team.phase() == ModePhase::Error {
                    with_error(team.phase(), team.last_error())
                } else {
                    team_state
                },
            },
            ModeLine {
                mode: "thinking".to_string(),
                state: self.thinking.mode.to_string(),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::status::{PollReport, StatusCounts, TeamStatus};
    use crate::protocol::{
        ModeFailure, SupervisionStarted, SupervisionStopped, SupervisionSuggestion, TeamSpawned,
        TeamStopped,
    };

    fn controller() -> ModeController {
        ModeController::new(
            ModeSettings::default(),
            "session-1".into(),
            "session-1".into(),
            Instant::now(),
        )
    }

    fn sent(effects: &[ModeEffect]) -> Vec<&ClientEvent> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                ModeEffect::Send { event, .. } => Some(event),
                _ => None,
            })
            .collect()
    }

    fn spawned(team_id: &str) -> ServerEvent {
        ServerEvent::TeamSpawned(TeamSpawned {
            team_id: team_id.into(),
            agent_count: 3,
        })
    }

    #[test]
    fn transition_table_rejects_shortcuts() {
        assert!(is_valid_transition(ModePhase::Off, ModePhase::Starting));
        assert!(!is_valid_transition(ModePhase::Off, ModePhase::Active));
        assert!(!is_valid_transition(ModePhase::Active, ModePhase::Off));
        assert!(!is_valid_transition(ModePhase::Stopping, ModePhase::Active));
    }

    #[test]
    fn supervision_lifecycle() {
        let mut modes = controller();
        let now = Instant::now();
        let effects = modes.start_supervision(now).unwrap();
        assert!(matches!(sent(&effects)[0], ClientEvent::SupervisionStart(start) if start.terminal_id == "session-1"));
        assert_eq!(
            modes.start_supervision(now),
            Err(ModeError::TransitionInFlight {
                mode: ModeKind::Supervision,
                phase: ModePhase::Starting
            })
        );

        modes.handle_event(&ServerEvent::SupervisionStarted(SupervisionStarted::default()), now);
        assert_eq!(modes.phase(ModeKind::Supervision), ModePhase::Active);
        assert_eq!(modes.exclusive_claim(), None);

        let effects = modes.stop_supervision(now).unwrap();
        assert!(matches!(sent(&effects)[0], ClientEvent::SupervisionStop(_)));
        modes.handle_event(&ServerEvent::SupervisionStopped(SupervisionStopped::default()), now);
        assert_eq!(modes.phase(ModeKind::Supervision), ModePhase::Off);
    }

    #[test]
    fn suggestions_render_only_while_active() {
        let mut modes = controller();
        let now = Instant::now();
        let suggestion = ServerEvent::SupervisionSuggestion(SupervisionSuggestion {
            suggestion: "tests are failing".into(),
            command: Some("cargo test".into()),
            confidence: Some(0.9),
        });
        assert!(modes.handle_event(&suggestion, now).is_empty());

        modes.start_supervision(now).unwrap();
        modes.handle_event(&ServerEvent::SupervisionStarted(SupervisionStarted::default()), now);
        let effects = modes.handle_event(&suggestion, now);
        assert!(matches!(&effects[..], [ModeEffect::Render(text)] if text.contains("not executed")));
        assert!(sent(&effects).is_empty());
    }

    #[test]
    fn team_claims_routing_and_polls_while_active() {
        let mut modes = controller();
        let now = Instant::now();
        modes.set_thinking(ThinkingMode::Think);
        let effects = modes.start_team("build a login page", now).unwrap();
        match sent(&effects)[0] {
            ClientEvent::TeamSpawn(request) => {
                assert_eq!(request.session_id, "session-1");
                assert_eq!(request.thinking, ThinkingMode::Think.annotation());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(modes.exclusive_claim(), None);

        let effects = modes.handle_event(&spawned("t-1"), now);
        assert!(effects.contains(&ModeEffect::StartPolling {
            team_id: "t-1".into()
        }));
        assert_eq!(modes.exclusive_claim(), Some(ModeKind::AiTeam));

        let effects = modes.stop_team(now).unwrap();
        assert_eq!(effects[0], ModeEffect::StopPolling);
        assert!(matches!(sent(&effects)[0], ClientEvent::TeamStop(stop) if stop.team_id == "t-1"));
        assert_eq!(modes.exclusive_claim(), None);
    }

    #[test]
    fn stop_during_start_runs_after_confirmation() {
        let mut modes = controller();
        let now = Instant::now();
        modes.start_team("refactor", now).unwrap();
        assert!(modes.stop_team(now).unwrap().is_empty());

        let effects = modes.handle_event(&spawned("t-2"), now);
        assert!(!effects.iter().any(|effect| matches!(effect, ModeEffect::StartPolling { .. })));
        assert!(matches!(sent(&effects)[0], ClientEvent::TeamStop(_)));
        assert_eq!(modes.phase(ModeKind::AiTeam), ModePhase::Stopping);
    }

    #[test]
    fn rejected_start_reverts_without_touching_other_modes() {
        let mut modes = controller();
        let now = Instant::now();
        modes.start_supervision(now).unwrap();
        modes.handle_event(&ServerEvent::SupervisionStarted(SupervisionStarted::default()), now);
        modes.start_team("x", now).unwrap();
        modes.handle_event(
            &ServerEvent::TeamError(ModeFailure {
                message: "quota exceeded".into(),
            }),
            now,
        );
        assert_eq!(modes.phase(ModeKind::AiTeam), ModePhase::Error);
        assert_eq!(modes.team().machine().last_error(), Some("quota exceeded"));
        assert_eq!(modes.phase(ModeKind::Supervision), ModePhase::Active);
        assert!(modes.start_team("again", now).is_ok());
    }

    #[test]
    fn emergency_stop_tolerates_partial_failure() {
        let mut modes = controller();
        let now = Instant::now();
        modes.start_supervision(now).unwrap();
        modes.handle_event(&ServerEvent::SupervisionStarted(SupervisionStarted::default()), now);
        modes.start_team("x", now).unwrap();
        modes.handle_event(&spawned("t-3"), now);

        let effects = modes.emergency_stop(now);
        assert_eq!(sent(&effects).len(), 2);
        assert_eq!(modes.phase(ModeKind::AiTeam), ModePhase::Stopping);
        assert_eq!(modes.phase(ModeKind::Supervision), ModePhase::Stopping);

        modes.send_failed(ModeKind::AiTeam, "channel closed", now);
        assert_eq!(modes.phase(ModeKind::AiTeam), ModePhase::Error);
        modes.handle_event(&ServerEvent::SupervisionStopped(SupervisionStopped::default()), now);
        assert_eq!(modes.phase(ModeKind::Supervision), ModePhase::Off);
        modes.handle_event(&ServerEvent::TeamStopped(TeamStopped::default()), now);
        assert_eq!(modes.phase(ModeKind::AiTeam), ModePhase::Off);
    }

    #[test]
    fn unconfirmed_stop_is_forced_off() {
        let mut modes = controller();
        let now = Instant::now();
        modes.start_supervision(now).unwrap();
        modes.handle_event(&ServerEvent::SupervisionStarted(SupervisionStarted::default()), now);
        modes.stop_supervision(now).unwrap();
        assert_eq!(modes.next_deadline(), Some(now + Duration::from_secs(5)));
        assert!(modes.tick(now + Duration::from_secs(4)).is_empty());
        assert_eq!(modes.tick(now + Duration::from_secs(5)).len(), 1);
        assert_eq!(modes.phase(ModeKind::Supervision), ModePhase::Off);
        assert_eq!(modes.next_deadline(), None);
    }

    #[test]
    fn poll_reports_update_team_state() {
        let mut modes = controller();
        let now = Instant::now();
        modes.start_team("x", now).unwrap();
        modes.handle_event(&spawned("t-4"), now);
        let counts = StatusCounts::from_status(&TeamStatus::default());
        let report = PollEvent::Report(PollReport {
            team_id: "t-4".into(),
            poll: 1,
            counts: counts.clone(),
        });
        assert_eq!(modes.handle_poll(report.clone(), now).len(), 1);
        assert!(modes.handle_poll(report, now).is_empty());
        assert_eq!(modes.team().last_poll(), Some(now));
        let stale = PollEvent::Finished {
            team_id: "other".into(),
            outcome: PollOutcome::TimedOut,
        };
        assert!(modes.handle_poll(stale, now).is_empty());
    }
}
