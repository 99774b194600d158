//! Error types for the extension host.

use thiserror::Error;

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("unknown slot: {0}")]
    UnknownSlot(String),

    #[error("slot '{slot_id}' does not accept contributions of type '{contribution_type}'")]
    UnsupportedContributionType {
        slot_id: String,
        contribution_type: String,
    },

    #[error("slot '{slot_id}' is full ({max} contributions)")]
    SlotCapacityExceeded { slot_id: String, max: usize },

    #[error("extension already registered: {0}")]
    DuplicateExtension(String),

    #[error("extension not found: {0}")]
    ExtensionNotFound(String),

    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("failed to load view '{view_path}' of plugin '{plugin_id}' (key '{lookup_key}'): {reason}")]
    ViewLoadFailure {
        plugin_id: String,
        view_path: String,
        lookup_key: String,
        reason: String,
    },

    #[error("request '{message_type}' ({request_id}) timed out after {timeout_ms}ms")]
    RequestTimeout {
        message_type: String,
        request_id: String,
        timeout_ms: u64,
    },

    #[error("bridge closed: {0}")]
    BridgeClosed(String),

    #[error("capability denied: plugin '{plugin_id}' lacks '{capability}'")]
    CapabilityDenied {
        plugin_id: String,
        capability: String,
    },

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<bobbins_types::Error> for HostError {
    fn from(err: bobbins_types::Error) -> Self {
        match err {
            bobbins_types::Error::Serialization(e) => Self::Serialization(e),
            other => Self::InvalidManifest(other.to_string()),
        }
    }
}
