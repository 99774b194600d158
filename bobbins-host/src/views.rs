//! View registry: which installed views can render which entity types.

use crate::capabilities::CapabilitySet;
use crate::lock;
use crate::manifest::ViewDeclaration;
use crate::policy::ExecutionMode;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Descriptive metadata of a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewMetadata {
    pub display_name: String,
    /// Semantic view type, e.g. `"editor"`.
    pub semantic_type: String,
    pub priority: i32,
}

/// A view as installed by the host.
///
/// `execution_mode` and `capabilities` come from the trust policy, never from
/// the plugin's manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRegistration {
    /// `{plugin_id}.{view_id}`.
    pub id: String,
    pub plugin_id: String,
    pub execution_mode: ExecutionMode,
    /// Component table path for native loading.
    pub source: Option<String>,
    pub capabilities: CapabilitySet,
    pub metadata: ViewMetadata,
    /// Entity types this view renders, in declaration order.
    pub handlers: Vec<String>,
}

impl ViewRegistration {
    pub fn from_declaration(
        plugin_id: &str,
        declaration: &ViewDeclaration,
        execution_mode: ExecutionMode,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            id: format!("{plugin_id}.{}", declaration.id),
            plugin_id: plugin_id.to_string(),
            execution_mode,
            source: declaration.source.clone(),
            capabilities,
            metadata: ViewMetadata {
                display_name: declaration
                    .name
                    .clone()
                    .unwrap_or_else(|| declaration.id.clone()),
                semantic_type: declaration.view_type.clone(),
                priority: declaration.priority,
            },
            handlers: declaration.handlers.clone(),
        }
    }

    pub fn can_handle(&self, entity_type: &str) -> bool {
        self.handlers.iter().any(|h| h == entity_type)
    }

    pub fn priority(&self) -> i32 {
        self.metadata.priority
    }
}

#[derive(Default)]
struct ViewState {
    /// View id -> (registration sequence, registration).
    views: HashMap<String, (u64, ViewRegistration)>,
    next_seq: u64,
}

/// Registry of installed views.
#[derive(Default)]
pub struct ViewRegistry {
    state: Mutex<ViewState>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a view. Re-registering an id replaces it in place.
    pub fn register(&self, view: ViewRegistration) {
        let mut state = lock(&self.state);
        let seq = match state.views.get(&view.id) {
            Some((seq, _)) => *seq,
            None => {
                state.next_seq += 1;
                state.next_seq
            }
        };
        debug!(view_id = %view.id, mode = ?view.execution_mode, "Registered view");
        state.views.insert(view.id.clone(), (seq, view));
    }

    pub fn get(&self, view_id: &str) -> Option<ViewRegistration> {
        lock(&self.state).views.get(view_id).map(|(_, v)| v.clone())
    }

    pub fn unregister(&self, view_id: &str) -> Option<ViewRegistration> {
        lock(&self.state).views.remove(view_id).map(|(_, v)| v)
    }

    /// Removes every view of a plugin. Returns the number removed.
    pub fn unregister_plugin(&self, plugin_id: &str) -> usize {
        let mut state = lock(&self.state);
        let before = state.views.len();
        state.views.retain(|_, (_, v)| v.plugin_id != plugin_id);
        before - state.views.len()
    }

    /// Views able to render `entity_type`, highest priority first, ties in
    /// registration order. Empty when nothing handles it.
    pub fn get_views_by_handler(&self, entity_type: &str) -> Vec<ViewRegistration> {
        let state = lock(&self.state);
        let mut matching: Vec<&(u64, ViewRegistration)> = state
            .views
            .values()
            .filter(|(_, v)| v.can_handle(entity_type))
            .collect();
        matching.sort_by(|(seq_a, a), (seq_b, b)| {
            b.priority().cmp(&a.priority()).then(seq_a.cmp(seq_b))
        });
        matching.into_iter().map(|(_, v)| v.clone()).collect()
    }

    /// Views of a plugin in registration order.
    pub fn views_for_plugin(&self, plugin_id: &str) -> Vec<ViewRegistration> {
        let state = lock(&self.state);
        let mut owned: Vec<&(u64, ViewRegistration)> = state
            .views
            .values()
            .filter(|(_, v)| v.plugin_id == plugin_id)
            .collect();
        owned.sort_by_key(|(seq, _)| *seq);
        owned.into_iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        *lock(&self.state) = ViewState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn view(plugin: &str, id: &str, handlers: &[&str], priority: i32) -> ViewRegistration {
        let decl = ViewDeclaration {
            id: id.into(),
            name: None,
            view_type: "editor".into(),
            source: Some(format!("views/{id}")),
            handlers: handlers.iter().map(|h| h.to_string()).collect(),
            priority,
        };
        ViewRegistration::from_declaration(
            plugin,
            &decl,
            ExecutionMode::Sandboxed,
            CapabilitySet::sandboxed_default(),
        )
    }

    fn ids(views: Vec<ViewRegistration>) -> Vec<String> {
        views.into_iter().map(|v| v.id).collect()
    }

    #[test]
    fn priority_then_registration_order() {
        let registry = ViewRegistry::new();
        registry.register(view("a", "plain", &["scene"], 0));
        registry.register(view("b", "rich", &["scene"], 10));
        registry.register(view("c", "plain2", &["scene"], 0));
        registry.register(view("d", "other", &["note"], 99));

        assert_eq!(
            ids(registry.get_views_by_handler("scene")),
            vec!["b.rich", "a.plain", "c.plain2"]
        );
    }

    #[test]
    fn unhandled_type_is_empty() {
        let registry = ViewRegistry::new();
        registry.register(view("a", "plain", &["scene"], 0));
        assert!(registry.get_views_by_handler("chapter").is_empty());
    }

    #[test]
    fn reregistration_keeps_original_order() {
        let registry = ViewRegistry::new();
        registry.register(view("a", "first", &["scene"], 0));
        registry.register(view("b", "second", &["scene"], 0));
        registry.register(view("a", "first", &["scene", "chapter"], 0));

        assert_eq!(
            ids(registry.get_views_by_handler("scene")),
            vec!["a.first", "b.second"]
        );
        assert_eq!(registry.len(), 2);
        assert!(registry.get("a.first").unwrap().can_handle("chapter"));
    }

    #[test]
    fn unregister_plugin_is_scoped() {
        let registry = ViewRegistry::new();
        registry.register(view("a", "one", &["scene"], 0));
        registry.register(view("a", "two", &["chapter"], 0));
        registry.register(view("b", "three", &["scene"], 0));

        assert_eq!(registry.unregister_plugin("a"), 2);
        assert!(registry.views_for_plugin("a").is_empty());
        assert_eq!(ids(registry.views_for_plugin("b")), vec!["b.three"]);
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let v = view("a", "outline", &[], 0);
        assert_eq!(v.metadata.display_name, "outline");
        assert_eq!(v.source.as_deref(), Some("views/outline"));
    }

    #[test]
    fn reset_empties() {
        let registry = ViewRegistry::new();
        registry.register(view("a", "one", &["scene"], 0));
        registry.reset();
        assert!(registry.is_empty());
        assert!(registry.unregister("a.one").is_none());
    }
}
