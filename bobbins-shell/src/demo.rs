//! Built-in bobbins so the shell has something to show without a manifest
//! directory.

use async_trait::async_trait;
use bobbins_host::{
    BobbinManifest, ComponentModule, ComponentTable, DataProvider, DataRequest, RenderContext,
    ViewComponent,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct SceneEditor;

impl ViewComponent for SceneEditor {
    fn name(&self) -> &str {
        "SceneEditor"
    }

    fn render(&self, context: &RenderContext) -> Value {
        let entity = context.navigation.as_ref().map(|n| n.entity_id.as_str());
        json!({
            "kind": "editor",
            "title": format!("Scene {}", entity.unwrap_or("?")),
            "blocks": [],
        })
    }
}

#[derive(Debug)]
struct Outline;

impl ViewComponent for Outline {
    fn name(&self) -> &str {
        "Outline"
    }

    fn render(&self, context: &RenderContext) -> Value {
        json!({ "kind": "tree", "collapsed": context.props["collapsed"] })
    }
}

#[derive(Debug)]
struct WordCount;

impl ViewComponent for WordCount {
    fn name(&self) -> &str {
        "WordCount"
    }

    fn render(&self, _: &RenderContext) -> Value {
        json!({ "kind": "status", "text": "0 words" })
    }
}

/// Native code compiled into the shell.
pub fn component_table() -> ComponentTable {
    ComponentTable::builder()
        .entry("manuscript", "views/SceneEditor", || async {
            Ok(ComponentModule::with_default(Arc::new(SceneEditor)))
        })
        .entry("manuscript", "panels/Outline", || async {
            Ok(ComponentModule::with_default(Arc::new(Outline))
                .with_export("WordCount", Arc::new(WordCount)))
        })
        .build()
}

const MANUSCRIPT: &str = r#"{
    "id": "manuscript",
    "name": "Manuscript",
    "version": "1.4.0",
    "execution": { "mode": "native" },
    "extensions": [
        { "id": "outline", "slot": "shell.leftPanel", "type": "panel",
          "title": "Outline", "component": "panels/Outline",
          "props": { "collapsed": false } },
        { "id": "word-count", "slot": "shell.statusBar", "type": "status",
          "component": "panels/Outline#WordCount",
          "when": { "entityType": ["scene", "chapter"] } }
    ],
    "views": [
        { "id": "scene-editor", "name": "Scene Editor", "type": "editor",
          "source": "views/SceneEditor", "handlers": ["scene"], "priority": 10 }
    ]
}"#;

const KANBAN: &str = r#"{
    "id": "kanban",
    "name": "Kanban",
    "version": "0.3.1",
    "extensions": [
        { "id": "new-card", "slot": "shell.toolbar", "type": "action",
          "title": "New card", "when": { "bobbin": "kanban" } },
        { "id": "board-stats", "slot": "shell.rightPanel", "type": "widget" }
    ],
    "views": [
        { "id": "board", "name": "Board", "type": "board",
          "source": "views/Board", "handlers": ["card", "column"] }
    ]
}"#;

pub fn manifests() -> anyhow::Result<Vec<BobbinManifest>> {
    Ok(vec![
        BobbinManifest::from_json(MANUSCRIPT)?,
        BobbinManifest::from_json(KANBAN)?,
    ])
}

/// Entity store answering sandboxed data operations.
#[derive(Default)]
pub struct MemoryStore {
    entities: Mutex<BTreeMap<String, Value>>,
}

#[async_trait]
impl DataProvider for MemoryStore {
    async fn handle(&self, plugin_id: &str, request: DataRequest) -> anyhow::Result<Value> {
        let mut entities = self
            .entities
            .lock()
            .map_err(|_| anyhow::anyhow!("entity store poisoned"))?;
        let id = request.payload["id"].as_str().map(|id| format!("{plugin_id}:{id}"));
        match (request.operation.as_str(), id) {
            ("query", _) => {
                let prefix = format!("{plugin_id}:");
                Ok(Value::Array(
                    entities
                        .iter()
                        .filter(|(key, _)| key.starts_with(&prefix))
                        .map(|(_, v)| v.clone())
                        .collect(),
                ))
            }
            ("get", Some(id)) => Ok(entities.get(&id).cloned().unwrap_or(Value::Null)),
            ("create" | "update", Some(id)) => {
                entities.insert(id, request.payload.clone());
                Ok(request.payload)
            }
            ("delete", Some(id)) => Ok(json!(entities.remove(&id).is_some())),
            (operation, None) => anyhow::bail!("'{operation}' needs an id"),
            (operation, Some(_)) => anyhow::bail!("unsupported operation '{operation}'"),
        }
    }
}
