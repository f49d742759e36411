//! Daemon configuration, persisted as JSON next to the other app files.
//!
//! A missing file is created with defaults so it can be edited in place.

use std::fs;
use std::path::Path;

use neovis::demo::DemoConfig;
use neovis::session::ServerConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::DaemonError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub model: DemoConfig,
    /// Model steps (and telemetry ticks) per second.
    pub target_fps: u32,
    /// Log a status line every this many steps; 0 disables it.
    pub status_every: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            model: DemoConfig::default(),
            target_fps: 30,
            status_every: 300,
        }
    }
}

impl DaemonConfig {
    pub fn load_or_create(path: &Path) -> Result<Self, DaemonError> {
        match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| DaemonError::Config {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save(path)?;
                info!("Wrote default config to {:?}", path);
                Ok(cfg)
            }
            Err(source) => Err(DaemonError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), DaemonError> {
        let text = serde_json::to_string_pretty(self).map_err(|source| DaemonError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(|source| DaemonError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Clamp values that would stall or spin the tick loop.
    pub fn sanitized(mut self) -> Self {
        self.target_fps = self.target_fps.clamp(1, 1000);
        self
    }
}
