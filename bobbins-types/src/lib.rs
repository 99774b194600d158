//! Shared type definitions for the Bobbins extension host.
//!
//! This crate defines the plugin-agnostic types that cross component and
//! trust boundaries:
//! - Message identifiers (UUID v7)
//! - The bridge wire envelope exchanged with sandboxed views
//! - Navigation state pushed onto history and broadcast to extensions
//!
//! Registry, loader and routing logic lives in `bobbins-host`.

mod ids;
mod message;
mod navigation;

pub use ids::MessageId;
pub use message::{
    BridgeMessage, RESPONSE_SUFFIX, WILDCARD_TARGET, message_types, response_type_for,
};
pub use navigation::{NAVIGATION_EVENT, NavigationState};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("malformed message: {0}")]
    MalformedMessage(String),
}
