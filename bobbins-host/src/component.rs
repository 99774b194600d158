//! Renderable components produced by native plugin code.

use bobbins_types::NavigationState;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Export name used when a view path does not name one.
pub const DEFAULT_EXPORT: &str = "default";

/// Inputs handed to a component when the shell renders it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderContext {
    pub navigation: Option<NavigationState>,
    /// Contribution props, or `Value::Null`.
    pub props: Value,
}

impl RenderContext {
    pub fn new(navigation: Option<NavigationState>, props: Option<Value>) -> Self {
        Self {
            navigation,
            props: props.unwrap_or(Value::Null),
        }
    }
}

/// A natively executed UI component.
///
/// Rendering produces a declarative tree the shell draws; the host never
/// inspects it.
pub trait ViewComponent: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;
    fn render(&self, context: &RenderContext) -> Value;
}

/// Shared handle to a loaded component. Identity is stable across cache hits.
pub type Component = Arc<dyn ViewComponent>;

/// Named exports of one loaded code module.
#[derive(Debug, Clone, Default)]
pub struct ComponentModule {
    exports: HashMap<String, Component>,
}

impl ComponentModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(component: Component) -> Self {
        Self::new().with_export(DEFAULT_EXPORT, component)
    }

    pub fn with_export(mut self, name: impl Into<String>, component: Component) -> Self {
        self.exports.insert(name.into(), component);
        self
    }

    pub fn get(&self, export: &str) -> Option<Component> {
        self.exports.get(export).cloned()
    }

    pub fn export_names(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }
}
