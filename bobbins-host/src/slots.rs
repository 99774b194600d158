//! Slot definitions: the named extension points of the shell UI.

use serde::{Deserialize, Serialize};

/// Identifiers of the slots every host seeds at construction.
pub mod slot_ids {
    pub const NAVIGATION: &str = "shell.navigation";
    pub const LEFT_PANEL: &str = "shell.leftPanel";
    pub const RIGHT_PANEL: &str = "shell.rightPanel";
    pub const TOOLBAR: &str = "shell.toolbar";
    pub const STATUS_BAR: &str = "shell.statusBar";
    pub const ENTITY_ACTIONS: &str = "shell.entityActions";
}

/// A named extension point accepting contributions of specific types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Contribution types this slot renders.
    pub accepts: Vec<String>,
    #[serde(default)]
    pub max_contributions: Option<usize>,
    /// Renderer used for contributions that bring no component of their own.
    #[serde(default)]
    pub default_renderer: Option<String>,
}

impl SlotDefinition {
    pub fn new<I, S>(id: impl Into<String>, name: impl Into<String>, accepts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            accepts: accepts.into_iter().map(Into::into).collect(),
            max_contributions: None,
            default_renderer: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_max_contributions(mut self, max: usize) -> Self {
        self.max_contributions = Some(max);
        self
    }

    pub fn with_default_renderer(mut self, renderer: impl Into<String>) -> Self {
        self.default_renderer = Some(renderer.into());
        self
    }

    pub fn accepts_type(&self, contribution_type: &str) -> bool {
        self.accepts.iter().any(|t| t == contribution_type)
    }
}

/// Slots seeded into every fresh registry.
pub fn builtin_slots() -> Vec<SlotDefinition> {
    vec![
        SlotDefinition::new(slot_ids::NAVIGATION, "Navigation", ["navigation", "panel"])
            .with_description("Primary navigation tree of the active bobbin")
            .with_default_renderer("tree"),
        SlotDefinition::new(slot_ids::LEFT_PANEL, "Left panel", ["panel", "navigation"]),
        SlotDefinition::new(slot_ids::RIGHT_PANEL, "Right panel", ["panel", "widget"])
            .with_description("Contextual panels next to the active view")
            .with_max_contributions(3),
        SlotDefinition::new(slot_ids::TOOLBAR, "Toolbar", ["action"])
            .with_default_renderer("button"),
        SlotDefinition::new(slot_ids::STATUS_BAR, "Status bar", ["status", "widget"]),
        SlotDefinition::new(slot_ids::ENTITY_ACTIONS, "Entity actions", ["action"])
            .with_default_renderer("menu-item"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn builtin_ids_are_unique() {
        let slots = builtin_slots();
        let ids: HashSet<_> = slots.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), slots.len());
    }

    #[test]
    fn right_panel_is_capped() {
        let slots = builtin_slots();
        let right = slots.iter().find(|s| s.id == slot_ids::RIGHT_PANEL).unwrap();
        assert_eq!(right.max_contributions, Some(3));
        assert!(right.accepts_type("panel"));
        assert!(!right.accepts_type("action"));
    }
}
