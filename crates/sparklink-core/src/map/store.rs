//! Map persistence
//!
//! The map is kept on disk as a pretty-printed JSON array of 32 rows of 32
//! numbers, the same shape the dashboard reads.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::IgnitionMap;

/// File name used when no explicit path is configured
pub const DEFAULT_MAP_FILE: &str = "ignition_map.json";

/// JSON file holding the last completed map
#[derive(Debug, Clone)]
pub struct MapStore {
    path: PathBuf,
}

impl MapStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location in the platform data directory
    pub fn default_path() -> io::Result<PathBuf> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Could not find data directory"))?;
        Ok(base.join("SparkLink").join(DEFAULT_MAP_FILE))
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check whether a saved map exists
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write the map, creating parent directories as needed
    pub fn save(&self, map: &IgnitionMap) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(map)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, content)
    }

    /// Read the map back; a file of the wrong shape is `InvalidData`
    pub fn load(&self) -> io::Result<IgnitionMap> {
        let content = fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
