//! Trust policy: reads `~/.bobbins/policy.toml` and decides, per plugin,
//! whether it may be installed, whether it runs native or sandboxed, and
//! which capabilities its views receive.
//!
//! Manifests never influence these decisions.

use crate::capabilities::{Capability, CapabilitySet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Where a plugin's view code executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// In-process with full host privilege.
    Native,
    /// Isolated context reachable only through the message bridge.
    #[default]
    Sandboxed,
}

/// Install gating mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Only explicitly listed plugins can be installed.
    Allowlist,
    /// All plugins except explicitly listed ones can be installed.
    Denylist,
    /// No restrictions on plugin installation.
    #[default]
    Unrestricted,
}

/// Policy configuration parsed from `policy.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub mode: PolicyMode,
    #[serde(default)]
    pub allowed_plugin_ids: Vec<String>,
    #[serde(default)]
    pub allowed_signing_keys: Vec<String>,
    /// Plugins the administrator trusts to run in-process.
    #[serde(default)]
    pub native_plugin_ids: HashSet<String>,
    #[serde(default)]
    pub denied_capabilities: HashSet<Capability>,
}

/// Makes the host-side trust decisions.
#[derive(Debug, Clone)]
pub struct TrustPolicy {
    config: PolicyConfig,
    policy_path: Option<PathBuf>,
}

impl TrustPolicy {
    /// Loads policy from `~/.bobbins/policy.toml` if it exists.
    /// Falls back to unrestricted install with everything sandboxed.
    pub fn load() -> Self {
        Self::load_from(config_dir().join("policy.toml"))
    }

    /// Loads policy from an explicit path.
    pub fn load_from(policy_path: PathBuf) -> Self {
        if !policy_path.exists() {
            info!("No policy file found at {:?}, all plugins sandboxed", policy_path);
            return Self {
                config: PolicyConfig::default(),
                policy_path: None,
            };
        }

        match std::fs::read_to_string(&policy_path) {
            Ok(contents) => match toml::from_str::<PolicyFile>(&contents) {
                Ok(file) => {
                    info!("Loaded trust policy from {:?}", policy_path);
                    Self {
                        config: file.into_config(),
                        policy_path: Some(policy_path),
                    }
                }
                Err(e) => {
                    warn!(
                        "Failed to parse policy file {:?}: {}. Falling back to defaults.",
                        policy_path, e
                    );
                    Self {
                        config: PolicyConfig::default(),
                        policy_path: Some(policy_path),
                    }
                }
            },
            Err(e) => {
                warn!("Failed to read policy file {:?}: {}", policy_path, e);
                Self {
                    config: PolicyConfig::default(),
                    policy_path: Some(policy_path),
                }
            }
        }
    }

    /// Creates a policy with explicit config (for testing).
    pub fn with_config(config: PolicyConfig) -> Self {
        Self {
            config,
            policy_path: None,
        }
    }

    /// Check if a plugin is allowed to be installed.
    pub fn is_plugin_allowed(&self, plugin_id: &str, signing_key: Option<&str>) -> bool {
        match self.config.mode {
            PolicyMode::Unrestricted => true,
            PolicyMode::Allowlist => {
                self.config.allowed_plugin_ids.iter().any(|id| id == plugin_id)
                    || signing_key
                        .map(|k| self.config.allowed_signing_keys.iter().any(|ak| ak == k))
                        .unwrap_or(false)
            }
            // The id list doubles as the block list in this mode.
            PolicyMode::Denylist => !self.config.allowed_plugin_ids.iter().any(|id| id == plugin_id),
        }
    }

    /// Execution mode for a plugin. Only an explicit admin grant yields native.
    pub fn execution_mode_for(&self, plugin_id: &str) -> ExecutionMode {
        if self.config.native_plugin_ids.contains(plugin_id) {
            ExecutionMode::Native
        } else {
            ExecutionMode::Sandboxed
        }
    }

    /// Capabilities a plugin's views receive under the given mode.
    pub fn capabilities_for(&self, plugin_id: &str, mode: ExecutionMode) -> CapabilitySet {
        let mut caps = match mode {
            ExecutionMode::Native => CapabilitySet::native_default(),
            ExecutionMode::Sandboxed => CapabilitySet::sandboxed_default(),
        };
        for denied in &self.config.denied_capabilities {
            if caps.is_granted(*denied) {
                info!(plugin_id = %plugin_id, capability = denied.name(), "Capability stripped by policy");
                caps.revoke(*denied);
            }
        }
        caps
    }

    pub fn is_capability_denied(&self, capability: Capability) -> bool {
        self.config.denied_capabilities.contains(&capability)
    }

    /// Returns whether a policy file was found.
    pub fn has_policy_file(&self) -> bool {
        self.policy_path.is_some()
    }

    /// Returns the active policy config.
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self::with_config(PolicyConfig::default())
    }
}

/// Raw TOML structure matching the policy.toml format.
#[derive(Deserialize)]
struct PolicyFile {
    #[serde(default)]
    policy: PolicySection,
}

#[derive(Deserialize, Default)]
struct PolicySection {
    #[serde(default)]
    mode: PolicyMode,
    #[serde(default, rename = "allowed-plugins")]
    allowed_plugins: IdList,
    #[serde(default)]
    native: IdList,
    #[serde(default, rename = "denied-capabilities")]
    denied_capabilities: DeniedCapabilities,
}

#[derive(Deserialize, Default)]
struct IdList {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    keys: Vec<String>,
}

#[derive(Deserialize, Default)]
struct DeniedCapabilities {
    #[serde(default)]
    read: bool,
    #[serde(default)]
    write: bool,
    #[serde(default)]
    navigate: bool,
}

impl PolicyFile {
    fn into_config(self) -> PolicyConfig {
        let denied = &self.policy.denied_capabilities;
        let denied_capabilities = [
            (denied.read, Capability::Read),
            (denied.write, Capability::Write),
            (denied.navigate, Capability::Navigate),
        ]
        .into_iter()
        .filter_map(|(on, cap)| on.then_some(cap))
        .collect();

        PolicyConfig {
            mode: self.policy.mode,
            allowed_plugin_ids: self.policy.allowed_plugins.ids,
            allowed_signing_keys: self.policy.allowed_plugins.keys,
            native_plugin_ids: self.policy.native.ids.into_iter().collect(),
            denied_capabilities,
        }
    }
}

/// Resolve the Bobbins config directory.
pub(crate) fn config_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        Path::new(&home).join(".bobbins")
    } else if let Ok(home) = std::env::var("USERPROFILE") {
        Path::new(&home).join(".bobbins")
    } else {
        PathBuf::from(".bobbins")
    }
}
