//! Crate-boundary error enums (C12): one `thiserror` type per concern,
//! `#[from]`-chained inward so a binary's `main` can collect everything into
//! an `anyhow::Result` at the outermost boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("config field `{field}` has an invalid value: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum UplinkError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Http(#[from] http_core::HttpError),

    #[error(transparent)]
    Transport(#[from] transport::TransportError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("the controller's auth response carried no token")]
    EmptyToken,

    #[error("live-update handoff failed: {0}")]
    LiveUpdateFailed(String),
}
