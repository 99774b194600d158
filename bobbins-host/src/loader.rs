//! Native component loading.
//!
//! Plugin code is only reachable through a [`ComponentTable`] generated when
//! the host is packaged: a fixed map from `"{plugin_id}/{view_path}"` to a
//! loader function. Nothing is ever resolved from a path at runtime.

use crate::component::{Component, ComponentModule, DEFAULT_EXPORT};
use crate::error::{HostError, HostResult};
use crate::lock;
use futures::future::{BoxFuture, FutureExt, join_all};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Produces a component module on demand.
pub type LoaderFn =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<ComponentModule>> + Send + Sync>;

/// Immutable map from lookup key to loader.
#[derive(Clone, Default)]
pub struct ComponentTable {
    entries: HashMap<String, LoaderFn>,
}

impl ComponentTable {
    pub fn builder() -> ComponentTableBuilder {
        ComponentTableBuilder::default()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Derives the table key for a view path. Leading `./` and `/` are
    /// stripped and any `#Export` suffix is ignored.
    pub fn lookup_key(plugin_id: &str, view_path: &str) -> String {
        let (path, _) = split_view_path(view_path);
        format!("{plugin_id}/{path}")
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Table keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get(&self, key: &str) -> Option<LoaderFn> {
        self.entries.get(key).cloned()
    }
}

impl std::fmt::Debug for ComponentTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentTable")
            .field("keys", &self.keys())
            .finish()
    }
}

/// Assembles a [`ComponentTable`].
#[derive(Default)]
pub struct ComponentTableBuilder {
    entries: HashMap<String, LoaderFn>,
}

impl ComponentTableBuilder {
    /// Adds an asynchronous loader for a view path.
    pub fn entry<F, Fut>(mut self, plugin_id: &str, view_path: &str, loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ComponentModule>> + Send + 'static,
    {
        let loader: LoaderFn = Arc::new(move || loader().boxed());
        self.entries
            .insert(ComponentTable::lookup_key(plugin_id, view_path), loader);
        self
    }

    /// Adds an already constructed component as the default export.
    pub fn component(self, plugin_id: &str, view_path: &str, component: Component) -> Self {
        self.entry(plugin_id, view_path, move || {
            let component = Arc::clone(&component);
            async move { Ok(ComponentModule::with_default(component)) }
        })
    }

    pub fn build(self) -> ComponentTable {
        ComponentTable {
            entries: self.entries,
        }
    }
}

/// Splits `"./views/Editor#Toolbar"` into `("views/Editor", "Toolbar")`.
fn split_view_path(view_path: &str) -> (&str, &str) {
    let (path, export) = match view_path.split_once('#') {
        Some((path, export)) if !export.is_empty() => (path, export),
        Some((path, _)) => (path, DEFAULT_EXPORT),
        None => (view_path, DEFAULT_EXPORT),
    };
    (path.trim_start_matches("./").trim_start_matches('/'), export)
}

/// Loads and memoizes components from a [`ComponentTable`].
pub struct ComponentLoader {
    table: Arc<ComponentTable>,
    cache: Mutex<HashMap<String, Arc<OnceCell<Component>>>>,
}

impl ComponentLoader {
    pub fn new(table: Arc<ComponentTable>) -> Self {
        Self {
            table,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn table(&self) -> &ComponentTable {
        &self.table
    }

    /// Whether the table has an entry for this view path.
    pub fn contains(&self, plugin_id: &str, view_path: &str) -> bool {
        self.table
            .contains_key(&ComponentTable::lookup_key(plugin_id, view_path))
    }

    /// Resolves a view path to its component.
    ///
    /// Repeated calls return the same component; concurrent calls for the
    /// same path share one load. Failures are not cached.
    pub async fn load(&self, plugin_id: &str, view_path: &str) -> HostResult<Component> {
        let (path, export) = split_view_path(view_path);
        let lookup_key = format!("{plugin_id}/{path}");
        let failure = |reason: String| HostError::ViewLoadFailure {
            plugin_id: plugin_id.to_string(),
            view_path: view_path.to_string(),
            lookup_key: lookup_key.clone(),
            reason,
        };

        let Some(loader) = self.table.get(&lookup_key) else {
            return Err(failure("no entry in component table".into()));
        };

        let cell = {
            let mut cache = lock(&self.cache);
            Arc::clone(cache.entry(format!("{lookup_key}#{export}")).or_default())
        };

        let component = cell
            .get_or_try_init(|| async {
                let module = loader().await.map_err(|e| failure(format!("{e:#}")))?;
                debug!(lookup_key = %lookup_key, export, "Loaded component module");
                module
                    .get(export)
                    .ok_or_else(|| failure(format!("module has no export '{export}'")))
            })
            .await?;
        Ok(Arc::clone(component))
    }

    /// Loads a view to warm the cache. Failures are logged, never returned.
    pub async fn preload(&self, plugin_id: &str, view_path: &str) -> bool {
        match self.load(plugin_id, view_path).await {
            Ok(_) => true,
            Err(e) => {
                warn!(plugin_id = %plugin_id, view_path = %view_path, error = %e, "Preload failed");
                false
            }
        }
    }

    /// Preloads many views concurrently. Returns how many succeeded.
    pub async fn preload_all<I>(&self, views: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let views: Vec<(String, String)> = views.into_iter().collect();
        let results = join_all(
            views
                .iter()
                .map(|(plugin_id, view_path)| self.preload(plugin_id, view_path)),
        )
        .await;
        results.into_iter().filter(|ok| *ok).count()
    }

    pub fn is_cached(&self, plugin_id: &str, view_path: &str) -> bool {
        let (path, export) = split_view_path(view_path);
        lock(&self.cache)
            .get(&format!("{plugin_id}/{path}#{export}"))
            .is_some_and(|cell| cell.initialized())
    }

    /// Drops every cached component of a plugin.
    pub fn evict_plugin(&self, plugin_id: &str) {
        let prefix = format!("{plugin_id}/");
        lock(&self.cache).retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn clear(&self) {
        lock(&self.cache).clear();
    }
}
