//! Bobbin lifecycle manager.
//!
//! Owns the shared registries and the component loader, applies the trust
//! policy at install time, and wires the view router to the extension
//! registry's condition context.

use crate::capabilities::CapabilitySet;
use crate::config::HostConfig;
use crate::error::{HostError, HostResult};
use crate::extensions::{ExtensionRegistry, RegisterOutcome};
use crate::loader::{ComponentLoader, ComponentTable};
use crate::manifest::BobbinManifest;
use crate::policy::{ExecutionMode, TrustPolicy};
use crate::router::ViewRouter;
use crate::sandbox::DataProvider;
use crate::views::{ViewRegistration, ViewRegistry};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An installed bobbin and the trust the host gave it.
#[derive(Debug, Clone)]
pub struct InstalledBobbin {
    pub manifest: BobbinManifest,
    pub version: semver::Version,
    pub execution_mode: ExecutionMode,
    pub capabilities: CapabilitySet,
    pub installed_at: DateTime<Utc>,
}

/// Per-contribution results of one install.
#[derive(Debug)]
pub struct InstallReport {
    pub plugin_id: String,
    pub execution_mode: ExecutionMode,
    pub views: usize,
    /// Extension ids stored by this install.
    pub registered: Vec<String>,
    /// Extension ids that were already present.
    pub duplicates: Vec<String>,
    /// Contribution ids the registry refused, with the reason.
    pub rejected: Vec<(String, HostError)>,
}

impl InstallReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

fn mode_name(mode: ExecutionMode) -> &'static str {
    match mode {
        ExecutionMode::Native => "native",
        ExecutionMode::Sandboxed => "sandboxed",
    }
}

/// Installs, removes and serves bobbins.
pub struct BobbinHost {
    extensions: Arc<ExtensionRegistry>,
    views: Arc<ViewRegistry>,
    loader: Arc<ComponentLoader>,
    policy: TrustPolicy,
    config: HostConfig,
    data: Option<Arc<dyn DataProvider>>,
    installed: HashMap<String, InstalledBobbin>,
}

impl BobbinHost {
    /// Creates a host with policy and config loaded from `~/.bobbins`.
    pub fn new(table: ComponentTable) -> Self {
        Self::with_policy(table, TrustPolicy::load(), HostConfig::load())
    }

    pub fn with_policy(table: ComponentTable, policy: TrustPolicy, config: HostConfig) -> Self {
        Self {
            extensions: Arc::new(ExtensionRegistry::with_config(&config.registry)),
            views: Arc::new(ViewRegistry::new()),
            loader: Arc::new(ComponentLoader::new(Arc::new(table))),
            policy,
            config,
            data: None,
            installed: HashMap::new(),
        }
    }

    pub fn with_data_provider(mut self, data: Arc<dyn DataProvider>) -> Self {
        self.data = Some(data);
        self
    }

    // ================================================================
    // Install / Uninstall
    // ================================================================

    /// Installs a bobbin.
    ///
    /// The execution mode and capabilities come from the trust policy; the
    /// manifest's own `execution.mode` is only compared for diagnostics.
    /// Contributions the registry refuses are listed in the report rather
    /// than failing the install.
    pub fn install(&mut self, manifest: BobbinManifest) -> HostResult<InstallReport> {
        manifest.validate()?;
        let version = manifest.semantic_version()?;
        let plugin_id = manifest.id.clone();

        if !self
            .policy
            .is_plugin_allowed(&plugin_id, manifest.signing_key.as_deref())
        {
            return Err(HostError::PolicyDenied(format!(
                "plugin '{}' blocked by policy",
                plugin_id
            )));
        }

        let execution_mode = self.policy.execution_mode_for(&plugin_id);
        let capabilities = self.policy.capabilities_for(&plugin_id, execution_mode);
        if let Some(declared) = manifest.declared_execution_mode() {
            if !declared.eq_ignore_ascii_case(mode_name(execution_mode)) {
                debug!(
                    plugin_id = %plugin_id,
                    declared,
                    assigned = mode_name(execution_mode),
                    "Manifest execution mode ignored"
                );
            }
        }

        for declaration in &manifest.views {
            self.views.register(ViewRegistration::from_declaration(
                &plugin_id,
                declaration,
                execution_mode,
                capabilities.clone(),
            ));
        }

        let mut report = InstallReport {
            plugin_id: plugin_id.clone(),
            execution_mode,
            views: manifest.views.len(),
            registered: Vec::new(),
            duplicates: Vec::new(),
            rejected: Vec::new(),
        };
        for contribution in &manifest.extensions {
            let extension_id = format!("{plugin_id}.{}", contribution.id);
            match self.extensions.register_versioned(
                &plugin_id,
                contribution.clone(),
                Some(version.clone()),
            ) {
                Ok(RegisterOutcome::Registered) => report.registered.push(extension_id),
                Ok(RegisterOutcome::AlreadyRegistered) => report.duplicates.push(extension_id),
                Err(e) => {
                    warn!(plugin_id = %plugin_id, contribution = %contribution.id, error = %e, "Contribution rejected");
                    report.rejected.push((contribution.id.clone(), e));
                }
            }
        }

        info!(
            plugin_id = %plugin_id,
            version = %version,
            mode = mode_name(execution_mode),
            extensions = report.registered.len(),
            views = report.views,
            "Bobbin installed"
        );
        self.installed.insert(
            plugin_id,
            InstalledBobbin {
                manifest,
                version,
                execution_mode,
                capabilities,
                installed_at: Utc::now(),
            },
        );
        Ok(report)
    }

    /// Installs manifests in ascending plugin-id order, so view registration
    /// order is the same on every start. Failures are logged and returned.
    pub fn install_all(
        &mut self,
        mut manifests: Vec<BobbinManifest>,
    ) -> Vec<(String, HostResult<InstallReport>)> {
        manifests.sort_by(|a, b| a.id.cmp(&b.id));
        manifests
            .into_iter()
            .map(|manifest| {
                let plugin_id = manifest.id.clone();
                let result = self.install(manifest);
                if let Err(e) = &result {
                    warn!(plugin_id = %plugin_id, error = %e, "Failed to install bobbin");
                }
                (plugin_id, result)
            })
            .collect()
    }

    /// Removes a bobbin's extensions, views and cached components.
    pub fn uninstall(&mut self, plugin_id: &str) -> HostResult<()> {
        if self.installed.remove(plugin_id).is_none() {
            return Err(HostError::PluginNotFound(plugin_id.to_string()));
        }
        let extensions = self.extensions.unregister_plugin(plugin_id);
        let views = self.views.unregister_plugin(plugin_id);
        self.loader.evict_plugin(plugin_id);
        info!(plugin_id = %plugin_id, extensions, views, "Bobbin uninstalled");
        Ok(())
    }

    // ================================================================
    // Native code
    // ================================================================

    /// Loads and attaches the component of every native extension that
    /// declares one. Returns how many were attached; failures are logged.
    pub async fn hydrate_extensions(&self) -> usize {
        let mut attached = 0;
        for (plugin_id, bobbin) in &self.installed {
            if bobbin.execution_mode != ExecutionMode::Native {
                continue;
            }
            for extension in self.extensions.get_extensions_for_plugin(plugin_id) {
                if extension.component.is_some() {
                    continue;
                }
                let Some(path) = extension.contribution.component.as_deref() else {
                    continue;
                };
                match self.loader.load(plugin_id, path).await {
                    Ok(component) => {
                        if self.extensions.attach_component(&extension.id, component).is_ok() {
                            attached += 1;
                        }
                    }
                    Err(e) => {
                        warn!(extension_id = %extension.id, error = %e, "Failed to load extension component");
                    }
                }
            }
        }
        attached
    }

    /// Warms the loader cache with every native view.
    pub async fn preload_native_views(&self) -> usize {
        let native: Vec<(String, String)> = self
            .installed
            .iter()
            .filter(|(_, b)| b.execution_mode == ExecutionMode::Native)
            .flat_map(|(plugin_id, _)| self.views.views_for_plugin(plugin_id))
            .filter_map(|view| view.source.map(|source| (view.plugin_id, source)))
            .collect();
        let total = native.len();
        let loaded = self.loader.preload_all(native).await;
        info!(loaded, total, "Preloaded native views");
        loaded
    }

    // ================================================================
    // Routing
    // ================================================================

    /// Creates a view router bound to this host's registries.
    ///
    /// Navigation updates the extension registry's condition context before
    /// the view loads. Spawns a task that performs navigations requested by
    /// sandboxed views; it ends with the router. Must be called within a
    /// tokio runtime.
    pub fn router(&self) -> Arc<ViewRouter> {
        let mut router = ViewRouter::new(
            Arc::clone(&self.views),
            Arc::clone(&self.loader),
            self.config.bridge.clone(),
        )
        .with_extension_context(Arc::clone(&self.extensions));
        if let Some(data) = &self.data {
            router = router.with_data_provider(Arc::clone(data));
        }
        let router = Arc::new(router);
        router.follow_navigation_requests();
        router
    }

    // ================================================================
    // Accessors
    // ================================================================

    pub fn extensions(&self) -> &Arc<ExtensionRegistry> {
        &self.extensions
    }

    pub fn views(&self) -> &Arc<ViewRegistry> {
        &self.views
    }

    pub fn loader(&self) -> &Arc<ComponentLoader> {
        &self.loader
    }

    pub fn policy(&self) -> &TrustPolicy {
        &self.policy
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn installed(&self, plugin_id: &str) -> Option<&InstalledBobbin> {
        self.installed.get(plugin_id)
    }

    /// Installed plugin ids, sorted.
    pub fn installed_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.installed.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Forgets every bobbin and restores the registries to their seeded state.
    pub fn reset(&mut self) {
        self.installed.clear();
        self.extensions.reset();
        self.views.reset();
        self.loader.clear();
    }
}

/// Reads every `*.json` manifest in a directory, sorted by file name.
/// Unreadable or invalid manifests are logged and skipped.
pub fn load_manifests(dir: &Path) -> HostResult<Vec<BobbinManifest>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        HostError::InvalidManifest(format!("cannot read manifest directory {}: {e}", dir.display()))
    })?;
    let mut paths: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut manifests = Vec::with_capacity(paths.len());
    for path in paths {
        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| HostError::InvalidManifest(e.to_string()))
            .and_then(|json| BobbinManifest::from_json(&json));
        match parsed {
            Ok(manifest) => manifests.push(manifest),
            Err(e) => warn!("Skipping manifest {:?}: {}", path, e),
        }
    }
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capability;
    use crate::component::{ComponentModule, RenderContext, ViewComponent};
    use crate::manifest::{ExtensionContribution, ViewDeclaration};
    use crate::policy::{PolicyConfig, PolicyMode};
    use crate::slots::slot_ids;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use std::collections::HashSet;

    #[derive(Debug)]
    struct Outline;

    impl ViewComponent for Outline {
        fn name(&self) -> &str {
            "Outline"
        }

        fn render(&self, _: &RenderContext) -> Value {
            json!({"tree": []})
        }
    }

    fn manifest(id: &str) -> BobbinManifest {
        BobbinManifest {
            id: id.into(),
            name: id.into(),
            version: "1.0.0".into(),
            description: None,
            signing_key: None,
            execution: None,
            extensions: vec![
                ExtensionContribution::new("outline", slot_ids::LEFT_PANEL, "panel")
                    .with_component("panels/Outline"),
            ],
            views: vec![ViewDeclaration {
                id: "editor".into(),
                name: Some("Editor".into()),
                view_type: "editor".into(),
                source: Some("views/Editor".into()),
                handlers: vec!["chapter".into()],
                priority: 0,
            }],
        }
    }

    fn policy(native: &[&str]) -> TrustPolicy {
        TrustPolicy::with_config(PolicyConfig {
            native_plugin_ids: native.iter().map(|s| s.to_string()).collect(),
            ..PolicyConfig::default()
        })
    }

    fn table() -> ComponentTable {
        ComponentTable::builder()
            .entry("manuscript", "panels/Outline", || async {
                Ok(ComponentModule::with_default(Arc::new(Outline)))
            })
            .build()
    }

    #[test]
    fn manifest_cannot_claim_native() {
        let mut host = BobbinHost::with_policy(table(), policy(&[]), HostConfig::default());
        let mut m = manifest("manuscript");
        m.execution = Some(crate::manifest::ExecutionDeclaration {
            mode: Some("native".into()),
        });

        let report = host.install(m).unwrap();
        assert_eq!(report.execution_mode, ExecutionMode::Sandboxed);
        let view = host.views().get("manuscript.editor").unwrap();
        assert_eq!(view.execution_mode, ExecutionMode::Sandboxed);
        assert!(!view.capabilities.is_granted(Capability::Write));
    }

    #[test]
    fn admin_grant_yields_native() {
        let mut host = BobbinHost::with_policy(table(), policy(&["manuscript"]), HostConfig::default());
        host.install(manifest("manuscript")).unwrap();
        let view = host.views().get("manuscript.editor").unwrap();
        assert_eq!(view.execution_mode, ExecutionMode::Native);
        assert!(view.capabilities.is_granted(Capability::Write));
    }

    #[test]
    fn policy_blocks_install() {
        let policy = TrustPolicy::with_config(PolicyConfig {
            mode: PolicyMode::Allowlist,
            allowed_plugin_ids: vec!["manuscript".into()],
            ..PolicyConfig::default()
        });
        let mut host = BobbinHost::with_policy(table(), policy, HostConfig::default());
        assert!(matches!(
            host.install(manifest("kanban")),
            Err(HostError::PolicyDenied(_))
        ));
        assert!(host.views().is_empty());
        assert!(host.install(manifest("manuscript")).is_ok());
    }

    #[test]
    fn reinstall_reports_duplicates() {
        let mut host = BobbinHost::with_policy(table(), policy(&[]), HostConfig::default());
        let first = host.install(manifest("manuscript")).unwrap();
        let second = host.install(manifest("manuscript")).unwrap();
        assert_eq!(first.registered, vec!["manuscript.outline"]);
        assert_eq!(second.duplicates, vec!["manuscript.outline"]);
        assert_eq!(host.extensions().get_extensions_for_plugin("manuscript").len(), 1);
    }

    #[test]
    fn rejected_contributions_do_not_abort_install() {
        let mut host = BobbinHost::with_policy(table(), policy(&[]), HostConfig::default());
        let mut m = manifest("manuscript");
        m.extensions
            .push(ExtensionContribution::new("bad", "shell.nowhere", "panel"));
        let report = host.install(m).unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.rejected[0].0, "bad");
        assert!(host.installed("manuscript").is_some());
    }

    #[test]
    fn install_all_is_ordered_by_id() {
        let mut host = BobbinHost::with_policy(table(), policy(&[]), HostConfig::default());
        let results = host.install_all(vec![manifest("zettel"), manifest("kanban"), manifest("manuscript")]);
        let order: Vec<_> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["kanban", "manuscript", "zettel"]);

        let views: Vec<_> = host
            .views()
            .get_views_by_handler("chapter")
            .into_iter()
            .map(|v| v.plugin_id)
            .collect();
        assert_eq!(views, vec!["kanban", "manuscript", "zettel"]);
    }

    #[test]
    fn uninstall_unknown_plugin() {
        let mut host = BobbinHost::with_policy(table(), policy(&[]), HostConfig::default());
        assert!(matches!(
            host.uninstall("ghost"),
            Err(HostError::PluginNotFound(id)) if id == "ghost"
        ));
    }

    #[tokio::test]
    async fn hydrate_attaches_native_components_only() {
        let mut host = BobbinHost::with_policy(table(), policy(&["manuscript"]), HostConfig::default());
        host.install(manifest("manuscript")).unwrap();
        host.install(manifest("kanban")).unwrap();

        assert_eq!(host.hydrate_extensions().await, 1);
        let ext = host.extensions().get_extension("manuscript.outline").unwrap();
        assert_eq!(ext.component.unwrap().name(), "Outline");
        assert!(host.extensions().get_extension("kanban.outline").unwrap().component.is_none());
    }

    #[tokio::test]
    async fn preload_failures_are_not_fatal() {
        let mut host = BobbinHost::with_policy(table(), policy(&["manuscript"]), HostConfig::default());
        host.install(manifest("manuscript")).unwrap();
        // views/Editor is absent from the table
        assert_eq!(host.preload_native_views().await, 0);
    }

    #[test]
    fn reset_forgets_everything() {
        let mut host = BobbinHost::with_policy(table(), policy(&[]), HostConfig::default());
        host.install(manifest("manuscript")).unwrap();
        host.reset();
        assert!(host.installed_ids().is_empty());
        assert!(host.views().is_empty());
        assert!(host.extensions().get_extension("manuscript.outline").is_none());
    }

    #[test]
    fn load_manifests_skips_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"{"id": "kanban", "name": "Kanban", "version": "0.3.0"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("a.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let manifests = load_manifests(dir.path()).unwrap();
        let ids: HashSet<_> = manifests.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["kanban"]));
    }
}
