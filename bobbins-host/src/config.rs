//! Host configuration, read from `~/.bobbins/host.toml`.
//!
//! ```toml
//! [bridge]
//! request_timeout_ms = 5000
//! rate_limit_messages = 120
//! rate_limit_window_ms = 1000
//! allowed_origins = ["sandbox://bobbins"]
//!
//! [registry]
//! strict_duplicates = false
//! ```

use crate::policy::config_dir;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Origin the in-process host endpoint stamps on its messages.
pub const HOST_ORIGIN: &str = "app://shell";

/// Origin assigned to sandboxed surfaces unless configured otherwise.
pub const DEFAULT_SANDBOX_ORIGIN: &str = "sandbox://bobbins";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Inbound message budget per window for each sandboxed endpoint.
    #[serde(default = "default_rate_limit_messages")]
    pub rate_limit_messages: u32,
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,
    /// Origins a sandboxed endpoint accepts frames from.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_rate_limit_messages() -> u32 {
    120
}

fn default_rate_limit_window_ms() -> u64 {
    1_000
}

fn default_allowed_origins() -> Vec<String> {
    vec![DEFAULT_SANDBOX_ORIGIN.to_string()]
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            rate_limit_messages: default_rate_limit_messages(),
            rate_limit_window_ms: default_rate_limit_window_ms(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl BridgeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Reject duplicate extension registrations instead of ignoring them.
    #[serde(default)]
    pub strict_duplicates: bool,
}

impl HostConfig {
    /// Loads `~/.bobbins/host.toml`, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(config_dir().join("host.toml"))
    }

    pub fn load_from(path: PathBuf) -> Self {
        if !path.exists() {
            info!("No host config at {:?}, using defaults", path);
            return Self::default();
        }
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<HostConfig>(&contents) {
                Ok(config) => {
                    info!("Loaded host config from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse host config {:?}: {}. Using defaults.", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read host config {:?}: {}", path, e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = HostConfig::default();
        assert_eq!(config.bridge.request_timeout(), Duration::from_millis(5_000));
        assert_eq!(config.bridge.rate_limit_messages, 120);
        assert_eq!(config.bridge.allowed_origins, vec![DEFAULT_SANDBOX_ORIGIN.to_string()]);
        assert!(!config.registry.strict_duplicates);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        std::fs::write(
            &path,
            r#"
[bridge]
request_timeout_ms = 250

[registry]
strict_duplicates = true
"#,
        )
        .unwrap();

        let config = HostConfig::load_from(path);
        assert_eq!(config.bridge.request_timeout_ms, 250);
        assert_eq!(config.bridge.rate_limit_window_ms, 1_000);
        assert!(config.registry.strict_duplicates);
    }

    #[test]
    fn malformed_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        std::fs::write(&path, "[bridge\nrequest_timeout_ms = ").unwrap();
        let config = HostConfig::load_from(path);
        assert_eq!(config.bridge.request_timeout_ms, 5_000);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig::load_from(dir.path().join("absent.toml"));
        assert_eq!(config.bridge.rate_limit_messages, 120);
    }
}
