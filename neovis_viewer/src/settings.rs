//! Connection settings kept in a two-line text file: address, then port.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use neovis::session::DEFAULT_PORT;

use crate::error::ViewerError;

pub const DEFAULT_FILE: &str = "config.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub address: String,
    pub port: u16,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ConnectionSettings {
    /// Parse the file contents. Missing or unparsable lines keep their default.
    pub fn parse(text: &str) -> Self {
        let mut settings = Self::default();
        let mut lines = text.lines().map(str::trim);
        if let Some(addr) = lines.next().filter(|l| !l.is_empty()) {
            settings.address = addr.to_string();
        }
        if let Some(port) = lines.next().and_then(|l| l.parse().ok()) {
            settings.port = port;
        }
        settings
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ViewerError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ViewerError::Settings {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ViewerError> {
        fs::write(path, format!("{}\n{}\n", self.address, self.port)).map_err(|source| {
            ViewerError::Settings {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_address_then_port() {
        let s = ConnectionSettings::parse("10.0.0.7\n6000\n");
        assert_eq!(s.address, "10.0.0.7");
        assert_eq!(s.port, 6000);
        assert_eq!(s.endpoint(), "10.0.0.7:6000");
    }

    #[test]
    fn bad_or_missing_lines_fall_back() {
        assert_eq!(ConnectionSettings::parse(""), ConnectionSettings::default());
        let s = ConnectionSettings::parse("host.local\nnot-a-port");
        assert_eq!(s.address, "host.local");
        assert_eq!(s.port, 54000);
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("neovis-viewer-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(DEFAULT_FILE);
        let s = ConnectionSettings {
            address: "example.org".to_string(),
            port: 1234,
        };
        s.save(&path).unwrap();
        assert_eq!(ConnectionSettings::load(&path).unwrap(), s);
        assert_eq!(
            ConnectionSettings::load(&dir.join("missing.txt")).unwrap(),
            ConnectionSettings::default()
        );
    }
}
