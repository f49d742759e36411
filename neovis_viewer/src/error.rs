use std::io;
use std::path::PathBuf;

use neovis::protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("snapshot of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("server closed the connection")]
    Closed,

    #[error("{}: {source}", path.display())]
    Settings { path: PathBuf, source: io::Error },

    #[error("invalid argument: {0}")]
    Usage(String),
}
