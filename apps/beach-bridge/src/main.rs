use beach_bridge::telemetry::logging;
use beach_bridge::terminal::app;
use beach_bridge::terminal::cli::Cli;
use beach_bridge::terminal::error::CliError;
use clap::Parser;
use tracing::debug;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logging::init(&log_config)?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");
    app::run(cli).await
}
