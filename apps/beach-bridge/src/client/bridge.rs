//! The bridge runtime: one task that owns the surface, the router, the
//! resize coordinator and the modes of a mounted session, and drives them
//! from a single select loop.

use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::buffer_guard::{BufferSnapshot, RepairOutcome};
use super::directives::blocks::{self, DoctorCheck, StatusReport};
use super::directives::{Directive, DirectiveError, DirectiveOutput, DirectiveRequest, DirectiveResolver, UnavailableResolver};
use super::modes::{ModeController, ModeEffect, ModeError, ModeKind, ModePhase, ThinkingMode};
use super::renderer::Renderer;
use super::resize::{FitOutcome, LayoutEvent, ResizeCoordinator};
use super::router::{CommandRouter, RouteAction};
use super::status::{PollEvent, PollerConfig, StatusPoller, TeamBackend};
use crate::client::api::ApiError;
use crate::config::BridgeConfig;
use crate::protocol::{ClientEvent, ResizeTerminal, ServerEvent, TerminalData};
use crate::session::{CreatedOutcome, SessionId, SessionRegistry, SessionStream};
use crate::telemetry::Hexdump;
use crate::transport::{ChannelHandle, ChannelNotice, ChannelStatus, TransportError};

/// How long teardown waits for the channel to say goodbye.
const RELEASE_GRACE: Duration = Duration::from_secs(1);
const STATUS_RECENT: usize = 5;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("session {0} is already mounted by another view")]
    StreamInUse(SessionId),
}

/// Everything the hosting surface can ask of a mounted bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeInput {
    /// Raw keyboard data from the renderer's `onData` stream.
    Keys(String),
    Layout(LayoutEvent),
    StartSupervision,
    StopSupervision,
    StartTeam(String),
    StopTeam,
    EmergencyStop,
    SetThinking(ThinkingMode),
    /// The view is remounting: park the session, keep the channel.
    Detach,
    /// The view is going away for good: disconnect.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    Detached,
    Closed,
    SessionEnded { exit_code: Option<i32> },
    ChannelLost,
}

/// Collaborators behind directives and AI-team status.
#[derive(Clone)]
pub struct BridgeServices {
    pub resolver: Arc<dyn DirectiveResolver>,
    pub team: Option<Arc<dyn TeamBackend>>,
}

impl Default for BridgeServices {
    fn default() -> Self {
        Self {
            resolver: Arc::new(UnavailableResolver),
            team: None,
        }
    }
}

enum TaskResult {
    Directive {
        name: &'static str,
        result: Result<DirectiveOutput, DirectiveError>,
    },
    Broadcast {
        team_id: String,
        result: Result<(), ApiError>,
    },
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

pub struct BridgeRuntime<R: Renderer> {
    registry: Arc<SessionRegistry>,
    handle: ChannelHandle,
    stream: SessionStream,
    modes: ModeController,
    renderer: R,
    router: CommandRouter,
    resize: ResizeCoordinator,
    services: BridgeServices,
    poller: Option<StatusPoller>,
    poller_config: PollerConfig,
    poll_tx: mpsc::UnboundedSender<PollEvent>,
    poll_rx: mpsc::UnboundedReceiver<PollEvent>,
    task_tx: mpsc::UnboundedSender<TaskResult>,
    task_rx: mpsc::UnboundedReceiver<TaskResult>,
    endpoint: String,
    config_text: String,
    hook_min_repeats: usize,
    exit_reported: bool,
}

impl<R: Renderer> BridgeRuntime<R> {
    /// Mount a view on `id`. The first mount opens the channel; later
    /// mounts reuse it and pick up the parked scrollback and mode state.
    /// Must be called within a Tokio runtime.
    pub fn attach(
        registry: Arc<SessionRegistry>,
        id: SessionId,
        config: &BridgeConfig,
        services: BridgeServices,
        mut renderer: R,
        endpoint: impl Into<String>,
    ) -> Result<Self, BridgeError> {
        let now = now();
        let (cols, rows) = renderer.size();
        let handle = registry.acquire(&id, cols, rows);
        let mut stream = registry
            .take_stream(&id)
            .ok_or_else(|| BridgeError::StreamInUse(id.clone()))?;

        let mut resize = ResizeCoordinator::new(
            config.cell_metrics(),
            config.settle(),
            config.buffer_guard(),
            handle.dimensions(),
        );
        if let Some(snapshot) = stream.snapshot.take() {
            resize.guard_mut().adopt_snapshot(snapshot);
            let outcome = resize.guard_mut().check_and_repair(&mut renderer);
            debug!(target: "bridge::buffer", ?outcome, "restored scrollback after remount");
        }

        let modes = stream.modes.take().unwrap_or_else(|| {
            ModeController::new(config.mode_settings(), id.to_string(), id.to_string(), now)
        });
        let config_text = config
            .render()
            .unwrap_or_else(|err| format!("unable to render configuration: {err}"));
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        let (task_tx, task_rx) = mpsc::unbounded_channel();

        let mut runtime = Self {
            registry,
            handle,
            stream,
            modes,
            renderer,
            router: CommandRouter::new(config.routing.history_limit),
            resize,
            services,
            poller: None,
            poller_config: config.poller(),
            poll_tx,
            poll_rx,
            task_tx,
            task_rx,
            endpoint: endpoint.into(),
            config_text,
            hook_min_repeats: config.routing.hook_min_repeats,
            exit_reported: false,
        };

        if runtime.handle.dimensions() != (cols, rows) {
            runtime.apply_dimensions(cols, rows, true, now);
        }
        let polling_done = runtime.modes.team().poll_outcome().is_some();
        if let Some(team_id) = runtime.active_team().filter(|_| !polling_done) {
            runtime.apply_effects(vec![ModeEffect::StartPolling { team_id }], now);
        }
        info!(target: "bridge::runtime", session_id = %id, cols, rows, "bridge attached");
        Ok(runtime)
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn session(&self) -> &crate::session::TerminalSession {
        &self.stream.session
    }

    pub fn modes(&self) -> &ModeController {
        &self.modes
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    pub fn resize(&self) -> &ResizeCoordinator {
        &self.resize
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|poller| !poller.is_finished())
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        [self.resize.next_deadline(), self.modes.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    pub async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<BridgeInput>) -> BridgeExit {
        let exit = loop {
            let deadline = self.next_deadline();
            let timer = async move {
                match deadline {
                    Some(deadline) => {
                        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                input = inputs.recv() => match input {
                    Some(input) => {
                        if let Some(exit) = self.handle_input(input, now()) {
                            break exit;
                        }
                    }
                    None => break BridgeExit::Closed,
                },
                notice = self.stream.notices.recv() => match notice {
                    Some(notice) => {
                        if let Some(exit) = self.handle_notice(notice, now()) {
                            break exit;
                        }
                    }
                    None => break BridgeExit::ChannelLost,
                },
                Some(event) = self.poll_rx.recv() => self.handle_poll(event, now()),
                Some(result) = self.task_rx.recv() => self.handle_task(result, now()),
                _ = timer => self.tick(now()),
            }
        };
        self.finish(exit).await
    }

    async fn finish(mut self, exit: BridgeExit) -> BridgeExit {
        self.resize.cancel();
        self.poller = None;
        let id = self.handle.session_id().clone();
        match exit {
            BridgeExit::Detached => {
                self.stream.snapshot = Some(BufferSnapshot::capture(&self.renderer, now()));
                self.stream.modes = Some(self.modes);
                self.registry.park(&id, self.stream);
                info!(target: "bridge::runtime", session_id = %id, "view detached; channel kept");
            }
            _ => {
                if let Some(task) = self.registry.release(&id) {
                    let _ = tokio::time::timeout(RELEASE_GRACE, task).await;
                }
                info!(target: "bridge::runtime", session_id = %id, ?exit, "bridge closed");
            }
        }
        exit
    }

    pub fn handle_input(&mut self, input: BridgeInput, now: Instant) -> Option<BridgeExit> {
        match input {
            BridgeInput::Keys(data) => self.handle_keys(&data, now),
            BridgeInput::Layout(event) => self.resize.handle(event, &self.renderer, now),
            BridgeInput::StartSupervision => {
                let result = self.modes.start_supervision(now);
                self.apply_mode_result(result, now);
            }
            BridgeInput::StopSupervision => {
                let result = self.modes.stop_supervision(now);
                self.apply_mode_result(result, now);
            }
            BridgeInput::StartTeam(requirement) => {
                let result = self.modes.start_team(&requirement, now);
                self.apply_mode_result(result, now);
            }
            BridgeInput::StopTeam => {
                let result = self.modes.stop_team(now);
                self.apply_mode_result(result, now);
            }
            BridgeInput::EmergencyStop => {
                let effects = self.modes.emergency_stop(now);
                self.apply_effects(effects, now);
            }
            BridgeInput::SetThinking(mode) => {
                self.modes.set_thinking(mode);
                self.paint(&blocks::banner(&format!("thinking mode: {mode}")), now);
            }
            BridgeInput::Detach => return Some(BridgeExit::Detached),
            BridgeInput::Shutdown => return Some(BridgeExit::Closed),
        }
        None
    }

    pub fn handle_keys(&mut self, data: &str, now: Instant) {
        let claim = self.modes.exclusive_claim();
        for action in self.router.route(data, claim) {
            match action {
                RouteAction::Forward(data) => self.forward(data, now),
                RouteAction::Echo(text) => self.paint(&text, now),
                RouteAction::Resolve(directive) => self.resolve(directive, now),
                RouteAction::Usage(spec) => self.paint(&blocks::usage_block(spec), now),
                RouteAction::Broadcast { claimant, line } => self.broadcast(claimant, line),
            }
        }
    }

    pub fn handle_notice(&mut self, notice: ChannelNotice, now: Instant) -> Option<BridgeExit> {
        match notice {
            ChannelNotice::Event(event) => self.handle_server_event(event, now),
            ChannelNotice::Status(status) => self.handle_status(status, now),
        }
    }

    fn handle_server_event(&mut self, event: ServerEvent, now: Instant) -> Option<BridgeExit> {
        match event {
            ServerEvent::Created(created) => {
                match self.stream.session.on_created(created.pid, now) {
                    CreatedOutcome::Fresh => {
                        info!(target: "bridge::session", pid = created.pid, "remote terminal created")
                    }
                    CreatedOutcome::Reattached => {
                        info!(target: "bridge::session", pid = created.pid, "reattached to remote terminal")
                    }
                    CreatedOutcome::Respawned { previous_pid } => {
                        warn!(
                            target: "bridge::session",
                            previous_pid,
                            pid = created.pid,
                            "remote terminal was recreated"
                        );
                        self.paint(
                            &blocks::banner(&format!(
                                "remote shell restarted (pid {previous_pid} -> {}); earlier shell state is gone",
                                created.pid
                            )),
                            now,
                        );
                    }
                }
            }
            ServerEvent::Data(data) => {
                if data.id != self.handle.session_id().as_str() {
                    trace!(target: "bridge::session", id = %data.id, "output for another terminal");
                    return None;
                }
                self.stream.session.record_output(data.data.len(), now);
                self.paint(&data.data, now);
            }
            ServerEvent::Exit(exit) => {
                if exit.id != self.handle.session_id().as_str() {
                    trace!(target: "bridge::session", id = %exit.id, "exit for another terminal");
                    return None;
                }
                self.stream.session.on_exit(exit.exit_code);
                self.handle.mark_exited();
                let code = exit
                    .exit_code
                    .map(|code| format!(" (exit code {code})"))
                    .unwrap_or_default();
                self.paint(
                    &blocks::banner(&format!(
                        "session ended{code}; start a new session to continue"
                    )),
                    now,
                );
                self.exit_reported = true;
                return Some(BridgeExit::SessionEnded {
                    exit_code: exit.exit_code,
                });
            }
            ServerEvent::Error(error) => {
                warn!(target: "bridge::session", message = %error.message, "terminal error");
                let mut text = format!("terminal error: {}", error.message);
                if let Some(suggestion) = error.suggestion {
                    text.push_str(&format!(" ({suggestion})"));
                }
                self.paint(&blocks::banner(&text), now);
            }
            ServerEvent::Unknown { event } => {
                debug!(target: "bridge::session", event = %event, "ignoring unknown event");
            }
            other => {
                let effects = self.modes.handle_event(&other, now);
                self.apply_effects(effects, now);
            }
        }
        None
    }

    fn handle_status(&mut self, status: ChannelStatus, now: Instant) -> Option<BridgeExit> {
        match status {
            ChannelStatus::Connected { reattach, .. } => {
                if reattach {
                    self.paint(&blocks::banner("reconnected; session reattached"), now);
                }
            }
            ChannelStatus::Disconnected { reason } => {
                self.stream.session.on_disconnected();
                if !self.stream.session.exited {
                    self.paint(
                        &blocks::banner(&format!("connection lost ({reason}); reconnecting...")),
                        now,
                    );
                }
            }
            ChannelStatus::Reconnecting { attempt, delay } => {
                debug!(target: "bridge::transport", attempt, ?delay, "waiting to reconnect");
            }
            ChannelStatus::GaveUp { attempts } => {
                self.stream.session.on_disconnected();
                self.paint(
                    &blocks::banner(&format!(
                        "could not reconnect after {attempts} attempts; the session is unreachable"
                    )),
                    now,
                );
                return Some(BridgeExit::ChannelLost);
            }
            ChannelStatus::Closed => return Some(BridgeExit::Closed),
        }
        None
    }

    pub fn handle_poll(&mut self, event: PollEvent, now: Instant) {
        let finished = matches!(event, PollEvent::Finished { .. });
        if let PollEvent::Failed { poll, error, .. } = &event {
            debug!(target: "bridge::status", poll, error = %error, "poll failed; continuing");
        }
        let effects = self.modes.handle_poll(event, now);
        self.apply_effects(effects, now);
        if finished {
            self.poller = None;
        }
    }

    fn handle_task(&mut self, result: TaskResult, now: Instant) {
        match result {
            TaskResult::Directive { name, result } => {
                let block = match result {
                    Ok(output) => blocks::output_block(name, &output),
                    Err(err) => {
                        warn!(target: "bridge::directives", directive = name, error = %err, "directive failed");
                        blocks::error_block(name, &err)
                    }
                };
                self.paint(&block, now);
            }
            TaskResult::Broadcast { team_id, result } => {
                if let Err(err) = result {
                    warn!(target: "bridge::status", team_id = %team_id, error = %err, "broadcast failed");
                    self.paint(&blocks::banner(&format!("broadcast to team {team_id} failed: {err}")), now);
                }
            }
        }
    }

    pub fn tick(&mut self, now: Instant) {
        if let Some(fit) = self.resize.tick(&mut self.renderer, now) {
            self.apply_fit(fit, now);
        }
        let effects = self.modes.tick(now);
        self.apply_effects(effects, now);
    }

    fn apply_fit(&mut self, fit: FitOutcome, now: Instant) {
        match fit.repair {
            RepairOutcome::Repaired { before, after } => {
                debug!(target: "bridge::buffer", before, after, "scrollback repaired after resize")
            }
            RepairOutcome::Failed { expected, actual } => {
                warn!(target: "bridge::buffer", expected, actual, "scrollback repair fell short")
            }
            RepairOutcome::NoSnapshot | RepairOutcome::Intact => {}
        }
        self.apply_dimensions(fit.cols, fit.rows, fit.send_remote, now);
    }

    fn apply_dimensions(&mut self, cols: u16, rows: u16, send_remote: bool, now: Instant) {
        self.stream.session.resize(cols, rows);
        self.handle.set_dimensions(cols, rows);
        if send_remote {
            self.resize.note_sent(cols, rows);
            let event = ClientEvent::Resize(ResizeTerminal {
                id: self.handle.session_id().to_string(),
                cols,
                rows,
            });
            if let Err(err) = self.handle.send(event) {
                self.report_send_error(err, now);
            }
        }
    }

    fn forward(&mut self, data: String, now: Instant) {
        trace!(
            target: "bridge::router",
            bytes = data.len(),
            dump = %Hexdump(data.as_bytes()),
            "forwarding keystrokes"
        );
        self.stream.session.record_input(data.len(), now);
        let event = ClientEvent::Data(TerminalData {
            id: self.handle.session_id().to_string(),
            data,
        });
        if let Err(err) = self.handle.send(event) {
            self.report_send_error(err, now);
        }
    }

    fn report_send_error(&mut self, err: TransportError, now: Instant) {
        match err {
            TransportError::SessionExited if self.exit_reported => {}
            TransportError::SessionExited => {
                self.exit_reported = true;
                self.paint(&blocks::banner("the remote session has exited; input is not delivered"), now);
            }
            err => {
                warn!(target: "bridge::transport", error = %err, "send failed");
                self.paint(&blocks::banner(&format!("input not delivered: {err}")), now);
            }
        }
    }

    /// Every write to the surface goes through the buffer guard so a
    /// pending repair can replay it.
    fn paint(&mut self, text: &str, now: Instant) {
        self.resize.record_output(text, now);
        self.renderer.write(text);
    }

    fn resolve(&mut self, directive: Directive, now: Instant) {
        let name = directive.name();
        if directive.is_local() {
            let block = match name {
                "help" => blocks::help_block(),
                "clear" => {
                    self.resize.guard_mut().surface_cleared(now);
                    self.renderer.clear();
                    return;
                }
                "status" => self.status_block(now),
                "config" => blocks::config_block(&self.config_text),
                "doctor" => blocks::doctor_block(&self.doctor_checks()),
                other => {
                    debug!(target: "bridge::directives", directive = other, "no local handler");
                    blocks::error_block(other, &DirectiveError::Unavailable(other.to_string()))
                }
            };
            self.paint(&block, now);
            return;
        }

        let request = DirectiveRequest {
            name: name.to_string(),
            args: directive.args,
            session_id: self.handle.session_id().to_string(),
            thinking: self.modes.thinking().mode.annotation(),
        };
        debug!(target: "bridge::directives", directive = name, "resolving via service");
        let resolver = self.services.resolver.clone();
        let results = self.task_tx.clone();
        tokio::spawn(async move {
            let result = resolver.resolve(request).await;
            let _ = results.send(TaskResult::Directive { name, result });
        });
    }

    fn status_block(&self, now: Instant) -> String {
        let history = self.router.history();
        blocks::status_block(&StatusReport {
            session: &self.stream.session,
            endpoint: self.endpoint.clone(),
            modes: self.modes.mode_lines(),
            recent: history
                .recent(STATUS_RECENT)
                .into_iter()
                .map(str::to_string)
                .collect(),
            hooks: history.repeated(self.hook_min_repeats),
            now,
        })
    }

    fn doctor_checks(&self) -> Vec<DoctorCheck> {
        let (cols, rows) = self.renderer.size();
        let mut checks = vec![
            DoctorCheck {
                name: "channel",
                ok: self.handle.is_connected(),
                detail: if self.handle.is_connected() {
                    format!("connected to {}", self.endpoint)
                } else {
                    format!("not connected to {}", self.endpoint)
                },
            },
            DoctorCheck {
                name: "session",
                ok: self.stream.session.pid.is_some() && !self.stream.session.exited,
                detail: match (self.stream.session.pid, self.stream.session.exited) {
                    (_, true) => "remote process exited".to_string(),
                    (Some(pid), false) => format!("remote pid {pid}"),
                    (None, false) => "waiting for terminal:created".to_string(),
                },
            },
            DoctorCheck {
                name: "surface",
                ok: cols > 1 && rows > 1,
                detail: format!("{cols}x{rows}"),
            },
            DoctorCheck {
                name: "directives",
                ok: self.services.resolver.describe() != "unavailable",
                detail: self.services.resolver.describe(),
            },
            DoctorCheck {
                name: "team api",
                ok: self.services.team.is_some(),
                detail: if self.services.team.is_some() {
                    "configured".to_string()
                } else {
                    "not configured".to_string()
                },
            },
        ];
        for kind in [ModeKind::Supervision, ModeKind::AiTeam] {
            if self.modes.phase(kind) == ModePhase::Error {
                checks.push(DoctorCheck {
                    name: kind.as_str(),
                    ok: false,
                    detail: "last transition failed; see /status".to_string(),
                });
            }
        }
        checks
    }

    fn broadcast(&mut self, claimant: ModeKind, line: String) {
        if claimant != ModeKind::AiTeam {
            return;
        }
        let (Some(team_id), Some(backend)) = (self.active_team(), self.services.team.clone()) else {
            debug!(target: "bridge::router", "no team backend; line only went to the shell");
            return;
        };
        let results = self.task_tx.clone();
        tokio::spawn(async move {
            let result = backend.broadcast(&team_id, &line).await;
            let _ = results.send(TaskResult::Broadcast { team_id, result });
        });
    }

    fn active_team(&self) -> Option<String> {
        let team = self.modes.team();
        if team.machine().phase().is_active() {
            team.team_id().map(str::to_string)
        } else {
            None
        }
    }

    fn apply_mode_result(&mut self, result: Result<Vec<ModeEffect>, ModeError>, now: Instant) {
        match result {
            Ok(effects) => self.apply_effects(effects, now),
            Err(err) => {
                debug!(target: "bridge::modes", error = %err, "mode request refused");
                self.paint(&blocks::banner(&err.to_string()), now);
            }
        }
    }

    fn apply_effects(&mut self, effects: Vec<ModeEffect>, now: Instant) {
        for effect in effects {
            match effect {
                ModeEffect::Send { mode, event } => {
                    if let Err(err) = self.handle.send(event) {
                        let effects = self.modes.send_failed(mode, &err.to_string(), now);
                        self.apply_effects(effects, now);
                    }
                }
                ModeEffect::Render(text) => self.paint(&text, now),
                ModeEffect::StartPolling { team_id } => match self.services.team.clone() {
                    Some(backend) => {
                        self.poller = Some(StatusPoller::spawn(
                            backend,
                            team_id,
                            self.poller_config,
                            self.poll_tx.clone(),
                        ));
                    }
                    None => self.paint(
                        &blocks::banner("no team service configured; status polling disabled"),
                        now,
                    ),
                },
                ModeEffect::StopPolling => {
                    if let Some(poller) = self.poller.take() {
                        debug!(target: "bridge::status", team_id = poller.team_id(), "status polling stopped");
                        poller.abort();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::renderer::{MemoryRenderer, SharedRenderer};
    use crate::client::status::tests::{ScriptedBackend, team};
    use crate::protocol::{SupervisionStarted, TeamSpawned, TerminalExit};
    use crate::transport::ChannelConfig;
    use crate::transport::mock::MockRemote;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DirectiveResolver for EchoResolver {
        async fn resolve(&self, request: DirectiveRequest) -> Result<DirectiveOutput, DirectiveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DirectiveOutput::Text(format!("{} {}", request.name, request.args.join("|"))))
        }

        fn describe(&self) -> String {
            "echo".into()
        }
    }

    fn runtime(remote: &MockRemote, services: BridgeServices) -> BridgeRuntime<MemoryRenderer> {
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(remote.connector()),
            ChannelConfig::default(),
        ));
        BridgeRuntime::attach(
            registry,
            SessionId::new(),
            &BridgeConfig::default(),
            services,
            MemoryRenderer::new(80, 24),
            "mock",
        )
        .unwrap()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn directive_lines_never_reach_the_remote() {
        let remote = MockRemote::new().with_auto_created(7);
        let mut bridge = runtime(&remote, BridgeServices::default());
        bridge.handle_keys("/help\r", now());
        bridge.handle_keys("ls\r", now());
        assert!(
            remote
                .wait_until(Duration::from_secs(5), |events| events.len() == 4)
                .await
        );
        assert_eq!(remote.keystrokes(), vec!["l", "s", "\r"]);
        assert!(bridge.renderer().text().contains("Bridge directives"));
    }

    #[test_timeout::tokio_timeout_test]
    async fn service_directives_render_inline() {
        let remote = MockRemote::new();
        let resolver = Arc::new(EchoResolver {
            calls: AtomicUsize::new(0),
        });
        let services = BridgeServices {
            resolver: resolver.clone(),
            team: None,
        };
        let mut bridge = runtime(&remote, services);
        bridge.handle_keys("/agent reviewer check the diff\r", now());
        let result = bridge.task_rx.recv().await.unwrap();
        bridge.handle_task(result, now());
        assert!(bridge.renderer().text().contains("agent reviewer|check the diff"));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert!(remote.keystrokes().is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn unavailable_service_reports_failure_inline() {
        let remote = MockRemote::new();
        let mut bridge = runtime(&remote, BridgeServices::default());
        bridge.handle_keys("/cost\r", now());
        let result = bridge.task_rx.recv().await.unwrap();
        bridge.handle_task(result, now());
        let text = bridge.renderer().text();
        assert!(text.contains("/cost failed"));
        assert!(remote.keystrokes().is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn status_lists_session_and_modes() {
        let remote = MockRemote::new();
        let mut bridge = runtime(&remote, BridgeServices::default());
        bridge.handle_notice(
            ChannelNotice::Event(ServerEvent::Created(crate::protocol::TerminalCreated {
                id: bridge.session().id.to_string(),
                pid: 99,
            })),
            now(),
        );
        bridge.handle_keys("/status\r", now());
        let text = bridge.renderer().text();
        assert!(text.contains("pid         99"));
        assert!(text.contains("supervision"));
        assert!(text.contains("ai-team"));
    }

    #[test_timeout::tokio_timeout_test]
    async fn exit_ends_the_session_and_blocks_input() {
        let remote = MockRemote::new();
        let mut bridge = runtime(&remote, BridgeServices::default());
        let id = bridge.session().id.to_string();
        let exit = bridge.handle_notice(
            ChannelNotice::Event(ServerEvent::Exit(TerminalExit {
                id,
                exit_code: Some(0),
            })),
            now(),
        );
        assert_eq!(exit, Some(BridgeExit::SessionEnded { exit_code: Some(0) }));
        assert!(bridge.renderer().text().contains("session ended (exit code 0)"));
        bridge.handle_keys("x", now());
        settle().await;
        assert!(remote.keystrokes().is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn team_mode_polls_and_broadcasts() {
        let remote = MockRemote::new();
        let backend = Arc::new(ScriptedBackend::with(vec![Ok(team(&["working"]))]));
        let services = BridgeServices {
            resolver: Arc::new(UnavailableResolver),
            team: Some(backend.clone()),
        };
        let mut bridge = runtime(&remote, services);
        bridge.handle_input(BridgeInput::StartTeam("ship it".into()), now());
        bridge.handle_notice(
            ChannelNotice::Event(ServerEvent::TeamSpawned(TeamSpawned {
                team_id: "t-9".into(),
                agent_count: 2,
            })),
            now(),
        );
        assert!(bridge.is_polling());

        bridge.handle_keys("/help\r", now());
        let result = bridge.task_rx.recv().await.unwrap();
        bridge.handle_task(result, now());
        assert_eq!(
            backend.broadcasts.lock().clone(),
            vec![("t-9".to_string(), "/help".to_string())]
        );
        assert!(!bridge.renderer().text().contains("Bridge directives"));

        bridge.handle_input(BridgeInput::StopTeam, now());
        assert!(!bridge.is_polling());
        assert_eq!(bridge.modes().phase(ModeKind::AiTeam), ModePhase::Stopping);
    }

    #[test_timeout::tokio_timeout_test]
    async fn supervision_suggestion_is_shown_not_sent() {
        let remote = MockRemote::new();
        let mut bridge = runtime(&remote, BridgeServices::default());
        bridge.handle_input(BridgeInput::StartSupervision, now());
        bridge.handle_notice(
            ChannelNotice::Event(ServerEvent::SupervisionStarted(SupervisionStarted::default())),
            now(),
        );
        bridge.handle_notice(
            ChannelNotice::Event(ServerEvent::SupervisionSuggestion(
                crate::protocol::SupervisionSuggestion {
                    suggestion: "disk is almost full".into(),
                    command: Some("df -h".into()),
                    confidence: Some(0.75),
                },
            )),
            now(),
        );
        settle().await;
        assert!(bridge.renderer().text().contains("df -h (75% confidence)"));
        assert!(remote.keystrokes().is_empty());
    }
}
