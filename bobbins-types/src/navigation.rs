//! Navigation state shared between the router, history and extensions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Name of the well-known navigation event observable by extensions.
pub const NAVIGATION_EVENT: &str = "bobbins:navigate";

/// Which entity is active, and which bobbin owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationState {
    pub entity_type: String,
    pub entity_id: String,
    pub bobbin_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl NavigationState {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        bobbin_id: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            bobbin_id: bobbin_id.into(),
            metadata: None,
        }
    }

    /// Adds a metadata entry, creating the map on first use.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
        self
    }
}
