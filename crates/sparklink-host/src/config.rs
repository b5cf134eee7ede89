//! Host settings
//!
//! Loaded from a JSON file; every field has a default so a partial file
//! (or none at all) works.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sparklink_core::map::{IgnitionMap, MapStore};
use sparklink_core::protocol::{list_ports, DEFAULT_BAUD_RATE};
use sparklink_core::session::SessionConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Settings file looked up in the working directory
pub const CONFIG_FILE: &str = "sparklink.json";

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Serial port; the first detected port when unset
    pub port: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Where the received map is saved; platform data dir when unset
    pub map_path: Option<PathBuf>,
    /// Talk to the built-in simulator instead of a serial port
    pub demo: bool,
    /// Pause before reconnecting after a failed session
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    pub timing: TimingOverrides,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            map_path: None,
            demo: false,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            timing: TimingOverrides::default(),
        }
    }
}

/// Optional session timings, in milliseconds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingOverrides {
    pub sync_timeout_ms: Option<u64>,
    pub map_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub fragment_delay_ms: Option<u64>,
}

impl HostConfig {
    /// Load from `path`, or from the default locations when `None`
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => {
                    info!("No {} found, using defaults", CONFIG_FILE);
                    return Ok(Self::default());
                }
            },
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        info!("Loaded settings from {}", path.display());
        Ok(config)
    }

    /// Serial port to open
    pub fn resolve_port(&self) -> Option<String> {
        if let Some(port) = &self.port {
            return Some(port.clone());
        }
        let detected = list_ports().into_iter().next().map(|p| p.name);
        match &detected {
            Some(name) => info!("No port configured, using {}", name),
            None => warn!("No port configured and none detected"),
        }
        detected
    }

    /// Map file for the session
    pub fn resolve_map_path(&self) -> Option<PathBuf> {
        self.map_path
            .clone()
            .or_else(|| MapStore::default_path().ok())
    }

    /// Map the session holds until the device sends its own
    ///
    /// The last saved map when one exists, otherwise all zeros.
    pub fn initial_map(&self) -> IgnitionMap {
        let Some(store) = self.resolve_map_path().map(MapStore::new) else {
            return IgnitionMap::default();
        };
        if !store.exists() {
            return IgnitionMap::default();
        }
        match store.load() {
            Ok(map) => {
                info!("Loaded saved ignition map from {}", store.path().display());
                map
            }
            Err(e) => {
                warn!("Ignoring saved map {}: {}", store.path().display(), e);
                IgnitionMap::default()
            }
        }
    }

    /// Session settings with overrides applied
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        let ms = |v: Option<u64>, d: Duration| v.map_or(d, Duration::from_millis);

        SessionConfig {
            sync_timeout: ms(self.timing.sync_timeout_ms, defaults.sync_timeout),
            map_timeout: ms(self.timing.map_timeout_ms, defaults.map_timeout),
            poll_interval: ms(self.timing.poll_interval_ms, defaults.poll_interval),
            fragment_delay: ms(self.timing.fragment_delay_ms, defaults.fragment_delay),
            map_path: self.resolve_map_path(),
            ..defaults
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// `./sparklink.json`, then `<config dir>/SparkLink/sparklink.json`
fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|d| d.join("SparkLink").join(CONFIG_FILE))
        .filter(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert!(!config.demo);

        let session = config.session_config();
        assert_eq!(session.sync_timeout, Duration::from_secs(5));
        assert_eq!(session.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"{ "port": "/dev/ttyUSB3", "demo": true, "timing": { "poll_interval_ms": 250 } }"#,
        )
        .unwrap();

        let config = HostConfig::load(Some(&path)).unwrap();
        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB3"));
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(2));
        assert!(config.demo);

        let session = config.session_config();
        assert_eq!(session.poll_interval, Duration::from_millis(250));
        assert_eq!(session.map_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_explicit_map_path_wins() {
        let config = HostConfig {
            map_path: Some(PathBuf::from("/tmp/map.json")),
            ..HostConfig::default()
        };
        assert_eq!(
            config.session_config().map_path,
            Some(PathBuf::from("/tmp/map.json"))
        );
    }

    #[test]
    fn test_initial_map_from_saved_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ignition_map.json");
        let saved = IgnitionMap::from_fn(|row, col| (row + col) as f32 * 0.5);
        MapStore::new(&path).save(&saved).unwrap();

        let config = HostConfig {
            map_path: Some(path.clone()),
            ..HostConfig::default()
        };
        assert_eq!(config.initial_map(), saved);

        std::fs::write(&path, "[[1.0]]").unwrap();
        assert_eq!(config.initial_map(), IgnitionMap::default());

        let missing = HostConfig {
            map_path: Some(dir.path().join("absent.json")),
            ..HostConfig::default()
        };
        assert_eq!(missing.initial_map(), IgnitionMap::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ port: ").unwrap();
        assert!(HostConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(HostConfig::load(Some(&dir.path().join("absent.json"))).is_err());
    }
}
