use std::io::IsTerminal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::client::api::ApiConfig;
use crate::client::directives::{DirectiveResolver, HttpDirectiveResolver, UnavailableResolver};
use crate::client::status::{HttpTeamBackend, TeamBackend};
use crate::client::{BridgeExit, BridgeInput, BridgeRuntime, BridgeServices};
use crate::config::BridgeConfig;
use crate::session::{SessionId, SessionRegistry};
use crate::terminal::cli::{self, Command, ConnectArgs};
use crate::terminal::error::CliError;
use crate::terminal::surface::{RawModeGuard, StdoutRenderer, spawn_input_pump};
use crate::transport::websocket::{WebSocketConfig, WebSocketConnector};

pub async fn run(cli: cli::Cli) -> Result<(), CliError> {
    let config = BridgeConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Config => {
            print!("{}", config.render()?);
            Ok(())
        }
        Command::Connect(args) => connect(config, args).await,
    }
}

/// Directive and team services, when an API base is configured.
pub fn services(config: &BridgeConfig) -> Result<BridgeServices, CliError> {
    let Some(api_url) = config.server.api_url.as_deref() else {
        return Ok(BridgeServices::default());
    };
    let api = ApiConfig::new(api_url)?.with_bearer_token(config.server.api_token.clone());
    let resolver: Arc<dyn DirectiveResolver> = Arc::new(HttpDirectiveResolver::new(api.clone())?);
    let team: Arc<dyn TeamBackend> = Arc::new(HttpTeamBackend::new(api)?);
    debug!(target: "bridge::app", api = %api_url, "service endpoints configured");
    Ok(BridgeServices {
        resolver,
        team: Some(team),
    })
}

async fn connect(mut config: BridgeConfig, args: ConnectArgs) -> Result<(), CliError> {
    args.apply(&mut config);
    let url = config.server.url.clone().ok_or(CliError::MissingServer)?;
    let websocket = WebSocketConfig::new(url).with_path(config.server.path.clone());
    websocket.validate()?;
    let endpoint = websocket.build_url();

    let id = match args.session.as_deref() {
        Some(id) => id.parse::<SessionId>()?,
        None => SessionId::new(),
    };
    let services = match services(&config) {
        Ok(services) => services,
        Err(err) => {
            eprintln!("⚠️  {err}; directives that need a service are disabled");
            BridgeServices {
                resolver: Arc::new(UnavailableResolver),
                team: None,
            }
        }
    };

    let registry = Arc::new(SessionRegistry::new(
        Arc::new(WebSocketConnector::new(websocket)),
        config.channel(),
    ));
    let (cols, rows) = crossterm::terminal::size()?;
    let bridge = BridgeRuntime::attach(
        registry,
        id.clone(),
        &config,
        services,
        StdoutRenderer::new(cols, rows),
        endpoint.clone(),
    )?;
    info!(target: "bridge::app", session_id = %id, endpoint = %endpoint, "connecting");
    eprintln!("🏖️  session {id} via {endpoint} (Ctrl+] to quit, F9 stops all modes)\r");

    let (inputs, receiver) = mpsc::unbounded_channel();
    if args.supervise {
        let _ = inputs.send(BridgeInput::StartSupervision);
    }
    if let Some(task) = args.team {
        let _ = inputs.send(BridgeInput::StartTeam(task));
    }

    let exit = {
        let _raw = RawModeGuard::new(std::io::stdin().is_terminal());
        let pump = spawn_input_pump(inputs, config.cell_metrics());
        let exit = bridge.run(receiver).await;
        let _ = pump.await;
        exit
    };

    match exit {
        BridgeExit::SessionEnded { exit_code } => {
            eprintln!(
                "session {id} ended{}",
                exit_code
                    .map(|code| format!(" with exit code {code}"))
                    .unwrap_or_default()
            );
            Ok(())
        }
        BridgeExit::ChannelLost => Err(CliError::ChannelLost),
        BridgeExit::Closed | BridgeExit::Detached => {
            eprintln!("detached; reattach with --session {id}");
            Ok(())
        }
    }
}
