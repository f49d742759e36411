//! Cross-platform application paths

use std::fs;
use std::path::PathBuf;

use crate::error::DaemonError;

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self, DaemonError> {
        let config_dir = dirs::config_dir()
            .ok_or(DaemonError::NoConfigDir)?
            .join("neovis");

        fs::create_dir_all(&config_dir).map_err(|source| DaemonError::Io {
            path: config_dir.clone(),
            source,
        })?;

        Ok(Self { config_dir })
    }

    pub fn config_dir(&self) -> &PathBuf {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("neovisd.json")
    }
}
