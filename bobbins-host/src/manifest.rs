//! Bobbin manifest schema, as handed over by the manifest compiler.
//!
//! Only the contribution and view declarations are consumed here. Fields a
//! manifest uses to describe its own trust (`execution.mode`) are parsed for
//! diagnostics and otherwise ignored; `executionMode` and `capabilities` on a
//! view declaration are not part of the schema at all.

use crate::error::{HostError, HostResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// A plugin manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BobbinManifest {
    /// Unique plugin identifier, e.g. `"manuscript"`.
    pub id: String,
    pub name: String,
    /// Semantic version string.
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub signing_key: Option<String>,
    /// Self-declared execution preferences. Advisory only.
    #[serde(default)]
    pub execution: Option<ExecutionDeclaration>,
    #[serde(default)]
    pub extensions: Vec<ExtensionContribution>,
    #[serde(default)]
    pub views: Vec<ViewDeclaration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionDeclaration {
    #[serde(default)]
    pub mode: Option<String>,
}

/// A plugin's declared intent to render something into a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionContribution {
    pub id: String,
    pub slot: String,
    #[serde(rename = "type")]
    pub contribution_type: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Condition kind → expected value. Every entry must hold.
    #[serde(default)]
    pub when: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub props: Option<Value>,
    /// View path of a natively loadable component rendering this extension.
    #[serde(default)]
    pub component: Option<String>,
}

impl ExtensionContribution {
    pub fn new(
        id: impl Into<String>,
        slot: impl Into<String>,
        contribution_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            slot: slot.into(),
            contribution_type: contribution_type.into(),
            title: None,
            when: None,
            props: None,
            component: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn when(mut self, kind: impl Into<String>, value: Value) -> Self {
        self.when
            .get_or_insert_with(BTreeMap::new)
            .insert(kind.into(), value);
        self
    }

    pub fn with_props(mut self, props: Value) -> Self {
        self.props = Some(props);
        self
    }

    pub fn with_component(mut self, view_path: impl Into<String>) -> Self {
        self.component = Some(view_path.into());
        self
    }
}

/// A view the plugin can render for one or more entity types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDeclaration {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Semantic view type, e.g. `"editor"` or `"board"`.
    #[serde(rename = "type")]
    pub view_type: String,
    /// Path used to look the view's component up in the component table.
    #[serde(default)]
    pub source: Option<String>,
    /// Entity types this view can render.
    #[serde(default)]
    pub handlers: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

impl BobbinManifest {
    /// Parses and validates a JSON manifest.
    pub fn from_json(json: &str) -> HostResult<Self> {
        let manifest: Self = serde_json::from_str(json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Checks identifiers and the version string.
    pub fn validate(&self) -> HostResult<()> {
        if self.id.trim().is_empty() {
            return Err(HostError::InvalidManifest("plugin id is empty".into()));
        }
        self.semantic_version()?;

        let mut seen = HashSet::new();
        for contribution in &self.extensions {
            if contribution.id.trim().is_empty() {
                return Err(HostError::InvalidManifest(format!(
                    "plugin '{}' declares an extension without id",
                    self.id
                )));
            }
            if !seen.insert(contribution.id.as_str()) {
                return Err(HostError::InvalidManifest(format!(
                    "plugin '{}' declares extension '{}' twice",
                    self.id, contribution.id
                )));
            }
        }

        let mut seen = HashSet::new();
        for view in &self.views {
            if !seen.insert(view.id.as_str()) {
                return Err(HostError::InvalidManifest(format!(
                    "plugin '{}' declares view '{}' twice",
                    self.id, view.id
                )));
            }
        }
        Ok(())
    }

    pub fn semantic_version(&self) -> HostResult<semver::Version> {
        semver::Version::parse(&self.version).map_err(|e| {
            HostError::InvalidManifest(format!(
                "plugin '{}' has invalid version '{}': {e}",
                self.id, self.version
            ))
        })
    }

    /// The manifest's own claim about execution mode, if any.
    pub fn declared_execution_mode(&self) -> Option<&str> {
        self.execution.as_ref().and_then(|e| e.mode.as_deref())
    }
}
