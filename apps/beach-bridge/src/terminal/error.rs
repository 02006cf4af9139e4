use crate::client::BridgeError;
use crate::client::api::ApiError;
use crate::config::ConfigError;
use crate::session::SessionError;
use crate::telemetry::logging::InitError;
use crate::transport::TransportError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("{0}")]
    Bridge(#[from] BridgeError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("service configuration error: {0}")]
    Api(#[from] ApiError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("no PTY host given; pass a URL or set server.url")]
    MissingServer,
    #[error(transparent)]
    Logging(#[from] InitError),
    #[error("could not reconnect to the PTY host")]
    ChannelLost,
}
