//! Process-wide tracing setup for the bridge binary.

use clap::ValueEnum;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const FILTER_ENV: &str = "BEACH_BRIDGE_LOG_FILTER";
pub const TRACE_DEPS_ENV: &str = "BEACH_BRIDGE_TRACE_DEPS";

/// Crates whose own trace output buries the bridge's at `trace`.
const NOISY_DEPENDENCIES: &[&str] = &[
    "hyper",
    "hyper_util",
    "tungstenite",
    "tokio_tungstenite",
    "reqwest",
    "rustls",
    "mio",
    "h2",
];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Logs go to stderr when unset.
    pub file: Option<PathBuf>,
    /// Raw `EnvFilter` directives that replace the level-derived ones.
    pub filter: Option<String>,
    pub trace_dependencies: bool,
}

impl LogConfig {
    pub fn new(level: LogLevel, file: Option<PathBuf>) -> Self {
        Self {
            level,
            file,
            ..Self::default()
        }
    }

    /// Pick up `BEACH_BRIDGE_LOG_FILTER` and `BEACH_BRIDGE_TRACE_DEPS`.
    pub fn with_env(mut self) -> Self {
        self.filter = std::env::var(FILTER_ENV)
            .ok()
            .filter(|filter| !filter.trim().is_empty());
        self.trace_dependencies = super::env_truthy(TRACE_DEPS_ENV).unwrap_or(false);
        self
    }

    /// Filter directives to install, and whether dependency traces were
    /// capped at `info`.
    pub fn directives(&self) -> (String, bool) {
        if let Some(filter) = &self.filter {
            return (filter.clone(), false);
        }
        let own = match self.level {
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
            quiet => return (LevelFilter::from(quiet).to_string().to_lowercase(), false),
        };
        let mut directives = format!("info,bridge={own},beach_bridge={own}");
        let throttle = self.level == LogLevel::Trace && !self.trace_dependencies;
        if throttle {
            for target in NOISY_DEPENDENCIES {
                directives.push_str(&format!(",{target}=info"));
            }
        }
        (directives, throttle)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to install log subscriber: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Keeps the non-blocking writer flushing for the life of the process.
static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber. Later calls keep the first one.
///
/// In raw mode stderr shares the screen with the remote shell, so anything
/// chattier than `warn` belongs in a log file.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }
    let (directives, throttled) = config.directives();

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&directives))
        .with_target(config.level >= LogLevel::Debug)
        .with_thread_ids(config.level == LogLevel::Trace)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let _ = GUARD.set(guard);
    if throttled {
        tracing::debug!(
            target: "bridge::telemetry",
            "dependency traces capped at info; set {TRACE_DEPS_ENV}=1 or {FILTER_ENV} to override"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_levels_are_plain() {
        assert_eq!(LogConfig::new(LogLevel::Warn, None).directives(), ("warn".to_string(), false));
        assert_eq!(LogConfig::new(LogLevel::Info, None).directives().0, "info");
    }

    #[test]
    fn trace_caps_dependencies_unless_asked() {
        let mut config = LogConfig::new(LogLevel::Trace, None);
        let (directives, throttled) = config.directives();
        assert!(throttled);
        assert!(directives.starts_with("info,bridge=trace,beach_bridge=trace"));
        assert!(directives.contains(",tungstenite=info"));

        config.trace_dependencies = true;
        let (directives, throttled) = config.directives();
        assert!(!throttled);
        assert!(!directives.contains("tungstenite"));
    }

    #[test]
    fn explicit_filter_wins() {
        let config = LogConfig {
            filter: Some("bridge::resize=trace".into()),
            ..LogConfig::new(LogLevel::Error, None)
        };
        assert_eq!(config.directives(), ("bridge::resize=trace".to_string(), false));
    }
}
