//! Effective bridge configuration: defaults, then `~/.beach/bridge.toml`,
//! then `BEACH_BRIDGE_*` environment variables, then CLI flags.

use clap::ValueEnum;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::client::buffer_guard::BufferGuardConfig;
use crate::client::modes::{ModeSettings, ThinkingMode};
use crate::client::resize::CellMetrics;
use crate::client::status::PollerConfig;
use crate::transport::ChannelConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine home directory")]
    NoHome,
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerSection,
    pub transport: TransportSection,
    pub layout: LayoutSection,
    pub routing: RoutingSection,
    pub modes: ModesSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// PTY host; `connect <url>` overrides it.
    pub url: Option<String>,
    pub path: String,
    /// Base of the directive and AI-team HTTP services.
    pub api_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            url: None,
            path: "/terminal".to_string(),
            api_url: None,
            api_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    pub max_reconnect_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for TransportSection {
    fn default() -> Self {
        let channel = ChannelConfig::default();
        Self {
            max_reconnect_attempts: channel.max_reconnect_attempts,
            backoff_base_ms: channel.backoff_base.as_millis() as u64,
            backoff_max_ms: channel.backoff_max.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutSection {
    pub cell_width_px: f32,
    pub cell_height_px: f32,
    pub settle_ms: u64,
    pub collapse_threshold_px: u32,
    pub stable_quiet_ms: u64,
    pub streaming_quiet_ms: u64,
    pub repair_ratio: f32,
}

impl Default for LayoutSection {
    fn default() -> Self {
        let cell = CellMetrics::default();
        let guard = BufferGuardConfig::default();
        Self {
            cell_width_px: cell.width_px,
            cell_height_px: cell.height_px,
            settle_ms: 150,
            collapse_threshold_px: guard.collapse_threshold_px,
            stable_quiet_ms: guard.stable_quiet.as_millis() as u64,
            streaming_quiet_ms: guard.streaming_quiet.as_millis() as u64,
            repair_ratio: guard.repair_ratio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    pub history_limit: usize,
    /// A command repeated this often shows up as a hook suggestion.
    pub hook_min_repeats: usize,
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            history_limit: 100,
            hook_min_repeats: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModesSection {
    pub stop_timeout_ms: u64,
    pub supervision_mode: String,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
    pub thinking: ThinkingMode,
}

impl Default for ModesSection {
    fn default() -> Self {
        let poller = PollerConfig::default();
        let settings = ModeSettings::default();
        Self {
            stop_timeout_ms: settings.stop_timeout.as_millis() as u64,
            supervision_mode: settings.supervision_mode,
            poll_interval_ms: poller.interval.as_millis() as u64,
            max_polls: poller.max_polls,
            thinking: settings.thinking,
        }
    }
}

impl BridgeConfig {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let base = BaseDirs::new().ok_or(ConfigError::NoHome)?;
        Ok(base.home_dir().join(".beach").join("bridge.toml"))
    }

    /// A missing file is not an error; defaults apply.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(target: "bridge::config", path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// File at `path` (or the default location) plus the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };
        let mut config = Self::load_file(&path)?;
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix("BEACH_BRIDGE_") else {
                continue;
            };
            match name {
                "SERVER_URL" => self.server.url = non_empty(&value),
                "SERVER_PATH" => self.server.path = value,
                "API_URL" => self.server.api_url = non_empty(&value),
                "API_TOKEN" => self.server.api_token = non_empty(&value),
                "RECONNECT_ATTEMPTS" => {
                    self.transport.max_reconnect_attempts = parse(&key, &value)?
                }
                "BACKOFF_BASE_MS" => self.transport.backoff_base_ms = parse(&key, &value)?,
                "BACKOFF_MAX_MS" => self.transport.backoff_max_ms = parse(&key, &value)?,
                "SETTLE_MS" => self.layout.settle_ms = parse(&key, &value)?,
                "HISTORY_LIMIT" => self.routing.history_limit = parse(&key, &value)?,
                "STOP_TIMEOUT_MS" => self.modes.stop_timeout_ms = parse(&key, &value)?,
                "POLL_INTERVAL_MS" => self.modes.poll_interval_ms = parse(&key, &value)?,
                "MAX_POLLS" => self.modes.max_polls = parse(&key, &value)?,
                "THINKING" => {
                    self.modes.thinking = ThinkingMode::from_str(&value.replace('_', "-"), true)
                        .map_err(|_| ConfigError::InvalidEnv {
                            key: key.clone(),
                            value: value.clone(),
                        })?
                }
                // Logging variables are read by the CLI layer.
                _ => {}
            }
        }
        Ok(())
    }

    pub fn render(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn channel(&self) -> ChannelConfig {
        ChannelConfig {
            max_reconnect_attempts: self.transport.max_reconnect_attempts,
            backoff_base: Duration::from_millis(self.transport.backoff_base_ms),
            backoff_max: Duration::from_millis(self.transport.backoff_max_ms),
        }
    }

    pub fn cell_metrics(&self) -> CellMetrics {
        CellMetrics {
            width_px: self.layout.cell_width_px,
            height_px: self.layout.cell_height_px,
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.layout.settle_ms)
    }

    pub fn buffer_guard(&self) -> BufferGuardConfig {
        BufferGuardConfig {
            collapse_threshold_px: self.layout.collapse_threshold_px,
            stable_quiet: Duration::from_millis(self.layout.stable_quiet_ms),
            streaming_quiet: Duration::from_millis(self.layout.streaming_quiet_ms),
            repair_ratio: self.layout.repair_ratio,
        }
    }

    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(self.modes.poll_interval_ms),
            max_polls: self.modes.max_polls,
        }
    }

    pub fn mode_settings(&self) -> ModeSettings {
        ModeSettings {
            stop_timeout: Duration::from_millis(self.modes.stop_timeout_ms),
            supervision_mode: self.modes.supervision_mode.clone(),
            thinking: self.modes.thinking,
            ..ModeSettings::default()
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_component_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.channel(), ChannelConfig::default());
        assert_eq!(config.buffer_guard(), BufferGuardConfig::default());
        assert_eq!(config.cell_metrics(), CellMetrics::default());
        assert_eq!(config.poller(), PollerConfig::default());
        assert_eq!(config.settle(), Duration::from_millis(150));
        assert_eq!(config.routing.history_limit, 100);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
            [server]
            url = "localhost:8080"

            [modes]
            thinking = "think_hard"
            max_polls = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.server.url.as_deref(), Some("localhost:8080"));
        assert_eq!(config.server.path, "/terminal");
        assert_eq!(config.modes.thinking, ThinkingMode::ThinkHard);
        assert_eq!(config.poller().max_polls, 10);
        assert_eq!(config.layout, LayoutSection::default());
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = BridgeConfig::default();
        config
            .apply_env(vars(&[
                ("BEACH_BRIDGE_SERVER_URL", "wss://pty.example.com"),
                ("BEACH_BRIDGE_THINKING", "ultrathink"),
                ("BEACH_BRIDGE_SETTLE_MS", "300"),
                ("BEACH_BRIDGE_API_TOKEN", " "),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();
        assert_eq!(config.server.url.as_deref(), Some("wss://pty.example.com"));
        assert_eq!(config.modes.thinking, ThinkingMode::Ultrathink);
        assert_eq!(config.settle(), Duration::from_millis(300));
        assert_eq!(config.server.api_token, None);

        let err = config
            .apply_env(vars(&[("BEACH_BRIDGE_MAX_POLLS", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "BEACH_BRIDGE_MAX_POLLS"));
    }

    #[test]
    fn rendered_config_reads_back() {
        let mut config = BridgeConfig::default();
        config.server.api_url = Some("http://127.0.0.1:4000".into());
        let rendered = config.render().unwrap();
        let parsed: BridgeConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let path = std::env::temp_dir().join(format!("beach-bridge-missing-{}.toml", uuid::Uuid::new_v4()));
        assert_eq!(BridgeConfig::load_file(&path).unwrap(), BridgeConfig::default());
    }
}
