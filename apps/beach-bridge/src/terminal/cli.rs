use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::client::modes::ThinkingMode;
use crate::config::BridgeConfig;
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "beach-bridge",
    about = "Attach this terminal to a remote PTY session",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "BEACH_BRIDGE_CONFIG",
        value_name = "PATH",
        help = "Config file (defaults to ~/.beach/bridge.toml)"
    )]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        global = true,
        value_enum,
        env = "BEACH_BRIDGE_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        global = true,
        value_name = "PATH",
        env = "BEACH_BRIDGE_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig::new(self.level, self.file.clone()).with_env()
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Attach to a remote PTY host and bridge this terminal to it
    Connect(ConnectArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug, Default)]
pub struct ConnectArgs {
    #[arg(
        value_name = "URL",
        help = "PTY host (ws://, wss://, http(s):// or host[:port]); defaults to server.url"
    )]
    pub url: Option<String>,

    #[arg(long, value_name = "PATH", help = "WebSocket path on the host")]
    pub path: Option<String>,

    #[arg(
        long,
        value_name = "SESSION_ID",
        help = "Reattach to an existing session instead of starting a new one"
    )]
    pub session: Option<String>,

    #[arg(long, help = "Start supervision once attached")]
    pub supervise: bool,

    #[arg(
        long,
        value_name = "TASK",
        help = "Spawn an AI team for TASK once attached; input is broadcast to it"
    )]
    pub team: Option<String>,

    #[arg(long, value_enum, help = "Reasoning depth attached to model-bound requests")]
    pub thinking: Option<ThinkingMode>,

    #[arg(
        long = "api-url",
        value_name = "URL",
        help = "Base URL of the directive and AI-team services"
    )]
    pub api_url: Option<String>,

    #[arg(
        long = "api-token",
        value_name = "TOKEN",
        env = "BEACH_BRIDGE_API_TOKEN",
        hide_env_values = true,
        help = "Bearer token for the directive and AI-team services"
    )]
    pub api_token: Option<String>,
}

impl ConnectArgs {
    /// Flags win over file and environment.
    pub fn apply(&self, config: &mut BridgeConfig) {
        if let Some(url) = &self.url {
            config.server.url = Some(url.clone());
        }
        if let Some(path) = &self.path {
            config.server.path = path.clone();
        }
        if let Some(api_url) = &self.api_url {
            config.server.api_url = Some(api_url.clone());
        }
        if let Some(token) = &self.api_token {
            config.server.api_token = Some(token.clone());
        }
        if let Some(thinking) = self.thinking {
            config.modes.thinking = thinking;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_flags_override_config() {
        let cli = Cli::try_parse_from([
            "beach-bridge",
            "connect",
            "localhost:8080",
            "--session",
            "abc-123",
            "--team",
            "add a login page",
            "--thinking",
            "think-hard",
            "--api-url",
            "http://127.0.0.1:4000",
        ])
        .unwrap();
        let Command::Connect(args) = cli.command else {
            panic!("expected connect");
        };
        assert_eq!(args.session.as_deref(), Some("abc-123"));
        assert!(!args.supervise);

        let mut config = BridgeConfig::default();
        args.apply(&mut config);
        assert_eq!(config.server.url.as_deref(), Some("localhost:8080"));
        assert_eq!(config.server.api_url.as_deref(), Some("http://127.0.0.1:4000"));
        assert_eq!(config.modes.thinking, ThinkingMode::ThinkHard);
        assert_eq!(config.server.path, "/terminal");
    }

    #[test]
    fn config_subcommand_parses() {
        let cli = Cli::try_parse_from(["beach-bridge", "--log-level", "debug", "config"]).unwrap();
        assert!(matches!(cli.command, Command::Config));
        assert_eq!(cli.logging.level, LogLevel::Debug);
    }
}
