//! Status polling and broadcast for an active AI team.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use super::api::{ApiConfig, ApiError, check_status};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentStatus {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TeamStatus {
    #[serde(default)]
    pub agents: Vec<AgentStatus>,
}

/// Agents per status, e.g. `{"done": 1, "working": 2}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts {
    counts: BTreeMap<String, usize>,
    total: usize,
}

/// Statuses after which an agent needs no more watching.
const SETTLED_STATUSES: &[&str] = &["working", "done"];

impl StatusCounts {
    pub fn from_status(status: &TeamStatus) -> Self {
        let mut counts = BTreeMap::new();
        for agent in &status.agents {
            *counts
                .entry(agent.status.trim().to_ascii_lowercase())
                .or_insert(0) += 1;
        }
        Self {
            counts,
            total: status.agents.len(),
        }
    }

    pub fn get(&self, status: &str) -> usize {
        self.counts.get(status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn all_settled(&self) -> bool {
        self.total > 0
            && self
                .counts
                .keys()
                .all(|status| SETTLED_STATUSES.contains(&status.as_str()))
    }

    pub fn summary(&self) -> String {
        if self.total == 0 {
            return "no agents reported".to_string();
        }
        self.counts
            .iter()
            .map(|(status, count)| format!("{count} {status}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub team_id: String,
    pub poll: u32,
    pub counts: StatusCounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Settled,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    Report(PollReport),
    Failed {
        team_id: String,
        poll: u32,
        error: String,
    },
    Finished {
        team_id: String,
        outcome: PollOutcome,
    },
}

#[async_trait]
pub trait TeamBackend: Send + Sync {
    async fn fetch_status(&self, team_id: &str) -> Result<TeamStatus, ApiError>;

    async fn broadcast(&self, team_id: &str, command: &str) -> Result<(), ApiError>;
}

#[derive(Debug, Serialize)]
struct BroadcastRequest<'a> {
    command: &'a str,
}

/// `GET {api}/status/{teamId}` and `POST {api}/broadcast/{teamId}`.
pub struct HttpTeamBackend {
    config: ApiConfig,
    client: reqwest::Client,
}

impl HttpTeamBackend {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let client = config.client()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl TeamBackend for HttpTeamBackend {
    async fn fetch_status(&self, team_id: &str) -> Result<TeamStatus, ApiError> {
        let endpoint = self.config.endpoint(&format!("status/{team_id}"))?;
        let response = self
            .config
            .authorize(self.client.get(endpoint))
            .send()
            .await?;
        let response = check_status(response).await?;
        response
            .json::<TeamStatus>()
            .await
            .map_err(|err| ApiError::InvalidResponse(err.to_string()))
    }

    async fn broadcast(&self, team_id: &str, command: &str) -> Result<(), ApiError> {
        let endpoint = self.config.endpoint(&format!("broadcast/{team_id}"))?;
        let response = self
            .config
            .authorize(self.client.post(endpoint))
            .json(&BroadcastRequest { command })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_polls: 60,
        }
    }
}

/// A running poll loop. Dropping it stops polling.
#[derive(Debug)]
pub struct StatusPoller {
    team_id: String,
    task: JoinHandle<()>,
}

impl StatusPoller {
    pub fn spawn(
        backend: Arc<dyn TeamBackend>,
        team_id: String,
        config: PollerConfig,
        events: mpsc::UnboundedSender<PollEvent>,
    ) -> Self {
        let task = tokio::spawn(poll_loop(backend, team_id.clone(), config, events));
        Self { team_id, task }
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn poll_loop(
    backend: Arc<dyn TeamBackend>,
    team_id: String,
    config: PollerConfig,
    events: mpsc::UnboundedSender<PollEvent>,
) {
    let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(target: "bridge::status", team_id = %team_id, "status polling started");

    for poll in 1..=config.max_polls {
        ticker.tick().await;
        let event = match backend.fetch_status(&team_id).await {
            Ok(status) => {
                let counts = StatusCounts::from_status(&status);
                debug!(
                    target: "bridge::status",
                    team_id = %team_id,
                    poll,
                    summary = %counts.summary(),
                    "team status"
                );
                let settled = counts.all_settled();
                if events
                    .send(PollEvent::Report(PollReport {
                        team_id: team_id.clone(),
                        poll,
                        counts,
                    }))
                    .is_err()
                {
                    return;
                }
                if settled {
                    let _ = events.send(PollEvent::Finished {
                        team_id,
                        outcome: PollOutcome::Settled,
                    });
                    return;
                }
                continue;
            }
            Err(err) => {
                warn!(target: "bridge::status", team_id = %team_id, poll, error = %err, "status poll failed");
                PollEvent::Failed {
                    team_id: team_id.clone(),
                    poll,
                    error: err.to_string(),
                }
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }

    warn!(target: "bridge::status", team_id = %team_id, polls = config.max_polls, "status polling timed out");
    let _ = events.send(PollEvent::Finished {
        team_id,
        outcome: PollOutcome::TimedOut,
    });
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Scripted backend: each poll pops the next response; broadcasts are
    /// recorded.
    #[derive(Default)]
    pub(crate) struct ScriptedBackend {
        pub responses: Mutex<VecDeque<Result<TeamStatus, String>>>,
        pub broadcasts: Mutex<Vec<(String, String)>>,
        pub polls: Mutex<u32>,
    }

    impl ScriptedBackend {
        pub fn with(responses: Vec<Result<TeamStatus, String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Self::default()
            }
        }
    }

    pub(crate) fn team(statuses: &[&str]) -> TeamStatus {
        TeamStatus {
            agents: statuses
                .iter()
                .enumerate()
                .map(|(i, status)| AgentStatus {
                    id: format!("agent-{i}"),
                    name: None,
                    status: status.to_string(),
                })
                .collect(),
        }
    }

    #[async_trait]
    impl TeamBackend for ScriptedBackend {
        async fn fetch_status(&self, _team_id: &str) -> Result<TeamStatus, ApiError> {
            *self.polls.lock() += 1;
            match self.responses.lock().pop_front() {
                Some(Ok(status)) => Ok(status),
                Some(Err(message)) => Err(ApiError::InvalidResponse(message)),
                None => Ok(team(&["spawning"])),
            }
        }

        async fn broadcast(&self, team_id: &str, command: &str) -> Result<(), ApiError> {
            self.broadcasts
                .lock()
                .push((team_id.to_string(), command.to_string()));
            Ok(())
        }
    }

    #[test]
    fn counts_and_settlement() {
        let counts = StatusCounts::from_status(&team(&["working", "Done", "working"]));
        assert_eq!(counts.get("working"), 2);
        assert_eq!(counts.get("done"), 1);
        assert!(counts.all_settled());
        assert_eq!(counts.summary(), "1 done, 2 working");

        assert!(!StatusCounts::from_status(&team(&["working", "spawning"])).all_settled());
        assert!(!StatusCounts::from_status(&TeamStatus::default()).all_settled());
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn polling_survives_a_failure_and_stops_when_settled() {
        let backend = Arc::new(ScriptedBackend::with(vec![
            Ok(team(&["spawning", "working"])),
            Err("gateway timeout".into()),
            Ok(team(&["working", "done"])),
        ]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _poller = StatusPoller::spawn(backend.clone(), "team-1".into(), PollerConfig::default(), tx);

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            let finished = matches!(event, PollEvent::Finished { .. });
            seen.push(event);
            if finished {
                break;
            }
        }
        assert!(matches!(seen[0], PollEvent::Report(ref report) if report.poll == 1));
        assert!(matches!(seen[1], PollEvent::Failed { poll: 2, .. }));
        assert!(matches!(seen[2], PollEvent::Report(ref report) if report.counts.all_settled()));
        assert_eq!(
            seen[3],
            PollEvent::Finished {
                team_id: "team-1".into(),
                outcome: PollOutcome::Settled
            }
        );
        assert_eq!(*backend.polls.lock(), 3);
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn polling_times_out_after_max_polls() {
        let backend = Arc::new(ScriptedBackend::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = PollerConfig {
            interval: Duration::from_secs(2),
            max_polls: 4,
        };
        let _poller = StatusPoller::spawn(backend.clone(), "team-2".into(), config, tx);
        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(PollEvent::Finished {
                team_id: "team-2".into(),
                outcome: PollOutcome::TimedOut
            })
        );
        assert_eq!(*backend.polls.lock(), 4);
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn aborting_stops_polling() {
        let backend = Arc::new(ScriptedBackend::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let poller = StatusPoller::spawn(backend.clone(), "team-3".into(), PollerConfig::default(), tx);
        assert!(matches!(rx.recv().await, Some(PollEvent::Report(_))));
        poller.abort();
        assert!(rx.recv().await.is_none());
        assert_eq!(*backend.polls.lock(), 1);
    }
}
