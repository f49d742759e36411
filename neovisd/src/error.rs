use std::io;
use std::path::PathBuf;

use neovis::session::ServerError;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("could not determine a config directory")]
    NoConfigDir,

    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("invalid config {}: {source}", path.display())]
    Config {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid argument: {0}")]
    Usage(String),

    #[error(transparent)]
    Server(#[from] ServerError),
}
