//! Visibility conditions for extensions.
//!
//! A contribution's `when` map pairs a condition kind with an expected value.
//! Every kind must have an evaluator and every evaluator must return true;
//! a kind nobody registered hides the extension instead of failing.

use bobbins_types::NavigationState;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Built-in condition kinds.
pub mod condition_kinds {
    /// Current view id equals the value.
    pub const VIEW: &str = "view";
    /// Actor holds the permission (or all listed permissions).
    pub const PERMISSION: &str = "permission";
    /// Active entity type equals the value.
    pub const ENTITY_TYPE: &str = "entityType";
    /// Active bobbin equals the value.
    pub const BOBBIN: &str = "bobbin";
}

/// The ambient state conditions are evaluated against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionContext {
    pub current_view: Option<String>,
    pub active_entity_type: Option<String>,
    pub active_entity_id: Option<String>,
    pub active_bobbin: Option<String>,
    pub permissions: HashSet<String>,
}

impl ExtensionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_view(mut self, view_id: impl Into<String>) -> Self {
        self.current_view = Some(view_id.into());
        self
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.active_entity_type = Some(entity_type.into());
        self
    }

    pub fn with_bobbin(mut self, bobbin_id: impl Into<String>) -> Self {
        self.active_bobbin = Some(bobbin_id.into());
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    /// Replaces the navigation-derived fields, keeping actor permissions.
    pub fn apply_navigation(&mut self, navigation: Option<&NavigationState>, view_id: Option<&str>) {
        self.current_view = view_id.map(str::to_owned);
        self.active_entity_type = navigation.map(|n| n.entity_type.clone());
        self.active_entity_id = navigation.map(|n| n.entity_id.clone());
        self.active_bobbin = navigation.map(|n| n.bobbin_id.clone());
    }
}

/// Decides whether one condition holds.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, expected: &Value, context: &ExtensionContext) -> bool;
}

impl<F> ConditionEvaluator for F
where
    F: Fn(&Value, &ExtensionContext) -> bool + Send + Sync,
{
    fn evaluate(&self, expected: &Value, context: &ExtensionContext) -> bool {
        self(expected, context)
    }
}

/// String equality, or membership when `expected` is an array of strings.
fn matches_any(expected: &Value, actual: Option<&str>) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    match expected {
        Value::String(s) => s == actual,
        Value::Array(items) => items.iter().any(|v| v.as_str() == Some(actual)),
        _ => false,
    }
}

fn holds_permissions(expected: &Value, context: &ExtensionContext) -> bool {
    match expected {
        Value::String(p) => context.permissions.contains(p),
        Value::Array(items) => {
            !items.is_empty()
                && items
                    .iter()
                    .all(|v| v.as_str().is_some_and(|p| context.permissions.contains(p)))
        }
        _ => false,
    }
}

/// Evaluators keyed by condition kind.
#[derive(Clone)]
pub struct ConditionRegistry {
    evaluators: HashMap<String, Arc<dyn ConditionEvaluator>>,
}

impl ConditionRegistry {
    /// An empty registry. Every condition kind is unknown.
    pub fn empty() -> Self {
        Self {
            evaluators: HashMap::new(),
        }
    }

    /// A registry seeded with the built-in kinds.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(condition_kinds::VIEW, |expected: &Value, ctx: &ExtensionContext| {
            matches_any(expected, ctx.current_view.as_deref())
        });
        registry.register(
            condition_kinds::ENTITY_TYPE,
            |expected: &Value, ctx: &ExtensionContext| {
                matches_any(expected, ctx.active_entity_type.as_deref())
            },
        );
        registry.register(condition_kinds::BOBBIN, |expected: &Value, ctx: &ExtensionContext| {
            matches_any(expected, ctx.active_bobbin.as_deref())
        });
        registry.register(condition_kinds::PERMISSION, holds_permissions);
        registry
    }

    /// Adds or replaces the evaluator for a kind.
    pub fn register(&mut self, kind: impl Into<String>, evaluator: impl ConditionEvaluator + 'static) {
        self.evaluators.insert(kind.into(), Arc::new(evaluator));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.evaluators.contains_key(kind)
    }

    /// True when there are no conditions or all of them hold.
    pub fn evaluate_all(
        &self,
        when: Option<&BTreeMap<String, Value>>,
        context: &ExtensionContext,
    ) -> bool {
        let Some(when) = when else {
            return true;
        };
        when.iter().all(|(kind, expected)| match self.evaluators.get(kind) {
            Some(evaluator) => evaluator.evaluate(expected, context),
            None => {
                debug!(kind = %kind, "Unknown condition kind, hiding extension");
                false
            }
        })
    }
}

impl Default for ConditionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn when(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn no_conditions_always_visible() {
        let registry = ConditionRegistry::with_builtins();
        assert!(registry.evaluate_all(None, &ExtensionContext::new()));
        assert!(registry.evaluate_all(Some(&BTreeMap::new()), &ExtensionContext::new()));
    }

    #[test]
    fn entity_type_accepts_string_or_list() {
        let registry = ConditionRegistry::with_builtins();
        let ctx = ExtensionContext::new().with_entity_type("scene");
        assert!(registry.evaluate_all(Some(&when(&[("entityType", json!("scene"))])), &ctx));
        assert!(registry.evaluate_all(
            Some(&when(&[("entityType", json!(["chapter", "scene"]))])),
            &ctx
        ));
        assert!(!registry.evaluate_all(Some(&when(&[("entityType", json!("chapter"))])), &ctx));
    }

    #[test]
    fn all_conditions_must_hold() {
        let registry = ConditionRegistry::with_builtins();
        let ctx = ExtensionContext::new()
            .with_bobbin("manuscript")
            .with_view("manuscript.chapter-editor");
        let conditions = when(&[
            ("bobbin", json!("manuscript")),
            ("view", json!("manuscript.outline")),
        ]);
        assert!(!registry.evaluate_all(Some(&conditions), &ctx));
    }

    #[test]
    fn permission_list_requires_every_entry() {
        let registry = ConditionRegistry::with_builtins();
        let ctx = ExtensionContext::new().with_permission("read");
        assert!(registry.evaluate_all(Some(&when(&[("permission", json!("read"))])), &ctx));
        assert!(!registry.evaluate_all(
            Some(&when(&[("permission", json!(["read", "admin"]))])),
            &ctx
        ));
    }

    #[test]
    fn unknown_kind_hides() {
        let registry = ConditionRegistry::with_builtins();
        let ctx = ExtensionContext::new().with_entity_type("chapter");
        assert!(!registry.evaluate_all(Some(&when(&[("featureFlag", json!("beta"))])), &ctx));
    }

    #[test]
    fn custom_kind_can_be_registered() {
        let mut registry = ConditionRegistry::with_builtins();
        registry.register("always", |_: &Value, _: &ExtensionContext| true);
        assert!(registry.contains("always"));
        assert!(registry.evaluate_all(
            Some(&when(&[("always", json!(null))])),
            &ExtensionContext::new()
        ));
    }

    #[test]
    fn apply_navigation_keeps_permissions() {
        let mut ctx = ExtensionContext::new().with_permission("write");
        let nav = NavigationState::new("chapter", "c1", "manuscript");
        ctx.apply_navigation(Some(&nav), Some("manuscript.editor"));
        assert_eq!(ctx.active_entity_type.as_deref(), Some("chapter"));
        assert_eq!(ctx.active_bobbin.as_deref(), Some("manuscript"));
        assert!(ctx.permissions.contains("write"));

        ctx.apply_navigation(None, None);
        assert!(ctx.active_entity_type.is_none());
        assert!(ctx.current_view.is_none());
        assert!(ctx.permissions.contains("write"));
    }
}
