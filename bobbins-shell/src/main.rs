//! Bobbins headless shell
//!
//! Installs bobbins from a manifest directory (or the built-in demo set),
//! prints what each shell slot would show, and optionally routes to an
//! entity the way the desktop shell does when the user opens it.
//!
//! Usage:
//!   bobbins-shell --manifests ./bobbins --navigate scene:s1:manuscript

mod demo;

use anyhow::{Result, bail};
use bobbins_host::{
    BobbinHost, BobbinManifest, HOST_ENDPOINT, HostConfig, MessageBridge, RenderContext, TrustPolicy, ViewOutcome,
    ViewRouter, load_manifests,
};
use bobbins_types::{BridgeMessage, NavigationState, message_types};
use clap::Parser;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "bobbins-shell")]
#[command(about = "Headless Bobbins shell")]
struct Args {
    /// Directory of bobbin manifests (*.json). Uses the demo set if omitted.
    #[arg(short, long)]
    manifests: Option<PathBuf>,

    /// Trust policy file [default: ~/.bobbins/policy.toml]
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Host config file [default: ~/.bobbins/host.toml]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Entity to open, as `type:id:bobbin`
    #[arg(short, long)]
    navigate: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let policy = args.policy.map_or_else(TrustPolicy::load, TrustPolicy::load_from);
    let config = args.config.map_or_else(HostConfig::load, HostConfig::load_from);
    let manifests = boot_manifests(args.manifests.as_deref());

    let mut host = BobbinHost::with_policy(demo::component_table(), policy, config)
        .with_data_provider(Arc::new(demo::MemoryStore::default()));
    for (plugin_id, result) in host.install_all(manifests) {
        match result {
            Ok(report) if !report.is_clean() => {
                for (contribution, error) in &report.rejected {
                    warn!("{plugin_id}: contribution '{contribution}' skipped: {error}");
                }
            }
            Ok(_) => {}
            Err(e) => warn!("{plugin_id}: not installed: {e}"),
        }
    }
    let hydrated = host.hydrate_extensions().await;
    let preloaded = host.preload_native_views().await;
    info!(
        bobbins = host.installed_ids().len(),
        hydrated, preloaded, "Shell ready"
    );

    let router = host.router();
    if let Some(target) = &args.navigate {
        let navigation = parse_navigation(target)?;
        match router.navigate(navigation.clone()).await {
            ViewOutcome::Rendered { view_id, execution_mode } => {
                info!(view_id = %view_id, mode = ?execution_mode, "Opened entity");
                if let Some(component) = router.active_component() {
                    let tree = component.render(&RenderContext::new(Some(navigation), None));
                    println!("{}", serde_json::to_string_pretty(&tree)?);
                } else {
                    greet_sandboxed_view(&router, &view_id).await;
                }
            }
            ViewOutcome::Unhandled(nav) => {
                println!("No installed bobbin can open '{}' entities.", nav.entity_type);
            }
            ViewOutcome::Failed { navigation, error } => {
                println!("Could not open {}: {error}", navigation.entity_id);
            }
            ViewOutcome::Superseded => debug!("Navigation superseded"),
        }
    }

    print_slots(&host);
    router.unmount();
    Ok(())
}

/// Manifests to install at startup. A directory that cannot be read is
/// logged and treated as empty.
fn boot_manifests(dir: Option<&Path>) -> Vec<BobbinManifest> {
    let loaded = match dir {
        Some(dir) => load_manifests(dir).map_err(anyhow::Error::from),
        None => demo::manifests(),
    };
    loaded.unwrap_or_else(|e| {
        warn!("No bobbins loaded: {e}");
        Vec::new()
    })
}

/// Parses `type:id:bobbin`.
fn parse_navigation(target: &str) -> Result<NavigationState> {
    let parts: Vec<&str> = target.split(':').collect();
    match parts.as_slice() {
        [entity_type, entity_id, bobbin_id]
            if !entity_type.is_empty() && !entity_id.is_empty() && !bobbin_id.is_empty() =>
        {
            Ok(NavigationState::new(*entity_type, *entity_id, *bobbin_id))
        }
        _ => bail!("expected type:id:bobbin, got '{target}'"),
    }
}

/// Plays the guest side of a sandboxed view: handshake, then one query.
async fn greet_sandboxed_view(router: &ViewRouter, view_id: &str) {
    let Some(guest_end) = router.take_guest_transport() else {
        return;
    };
    let guest = Arc::new(MessageBridge::new(format!("view:{view_id}"), guest_end.transport));
    guest.attach(guest_end.inbound);

    let (ready_tx, mut ready_rx) = tokio::sync::mpsc::unbounded_channel::<BridgeMessage>();
    let _ready = guest.on(message_types::SHELL_READY, move |m| {
        let _ = ready_tx.send(m.clone());
    });
    if let Err(e) = guest.send(HOST_ENDPOINT, message_types::VIEW_READY, None) {
        warn!("Sandboxed view handshake failed: {e}");
        return;
    }
    match tokio::time::timeout(Duration::from_secs(1), ready_rx.recv()).await {
        Ok(Some(ready)) => println!(
            "Sandboxed view {view_id} ready with capabilities {}",
            ready.data.map(|d| d["capabilities"].clone()).unwrap_or_default()
        ),
        _ => warn!("No shell.ready from host"),
    }

    match guest
        .request(HOST_ENDPOINT, message_types::VIEW_DATA_QUERY, Some(json!({})), None)
        .await
    {
        Ok(response) => println!("Query result: {}", response.data.unwrap_or_default()),
        Err(e) => warn!("Query failed: {e}"),
    }
    guest.close();
}

fn print_slots(host: &BobbinHost) {
    let extensions = host.extensions();
    let context = extensions.context();
    println!("\n========================================");
    println!("  Shell slots");
    println!("========================================");
    for slot in extensions.slots() {
        let visible = extensions.get_extensions_for_slot(&slot.id, Some(&context));
        println!("  {} ({})", slot.name, slot.id);
        if visible.is_empty() {
            println!("    -");
        }
        for extension in visible {
            let marker = if extension.component.is_some() { "*" } else { " " };
            println!("   {marker} {} [{}]", extension.display_title(), extension.id);
        }
    }
    println!("========================================\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn navigation_argument() {
        let nav = parse_navigation("scene:s1:manuscript").unwrap();
        assert_eq!(nav, NavigationState::new("scene", "s1", "manuscript"));
        assert!(parse_navigation("scene:s1").is_err());
        assert!(parse_navigation("scene::manuscript").is_err());
    }

    #[test]
    fn missing_manifest_dir_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(boot_manifests(Some(&dir.path().join("missing"))).is_empty());
        assert_eq!(boot_manifests(None).len(), 2);
    }

    #[tokio::test]
    async fn demo_set_installs_cleanly() {
        let mut host = BobbinHost::with_policy(
            demo::component_table(),
            TrustPolicy::default(),
            HostConfig::default(),
        );
        let results = host.install_all(demo::manifests().unwrap());
        assert!(results.iter().all(|(_, r)| r.as_ref().is_ok_and(|r| r.is_clean())));

        let router = host.router();
        let outcome = router
            .navigate(NavigationState::new("card", "c1", "kanban"))
            .await;
        assert!(matches!(outcome, ViewOutcome::Rendered { .. }));
    }
}
