//! Extension and view execution host for Bobbins.
//!
//! Registers declarative UI contribution points (slots), decides per plugin
//! whether view code runs natively or in an isolated context, routes
//! navigation to the right view, and carries correlated messages across the
//! trust boundary.
//!
//! All registries are explicit service objects. Nothing is seeded by import
//! side effects, and each exposes `reset()` so tests start from a known state.

mod bridge;
mod capabilities;
mod component;
mod conditions;
mod config;
mod error;
mod extensions;
mod history;
mod loader;
mod manager;
mod manifest;
mod policy;
mod rate_limit;
mod router;
mod sandbox;
mod slots;
mod subscription;
mod transport;
mod views;

pub use bridge::{Delivery, DropReason, InboundGuard, MessageBridge, MessageHandler};
pub use capabilities::{Capability, CapabilitySet};
pub use component::{Component, ComponentModule, DEFAULT_EXPORT, RenderContext, ViewComponent};
pub use conditions::{ConditionEvaluator, ConditionRegistry, ExtensionContext, condition_kinds};
pub use config::{BridgeConfig, DEFAULT_SANDBOX_ORIGIN, HOST_ORIGIN, HostConfig, RegistryConfig};
pub use error::{HostError, HostResult};
pub use extensions::{ExtensionRegistry, RegisterOutcome, RegisteredExtension, RegistryEvent};
pub use history::NavigationHistory;
pub use loader::{ComponentLoader, ComponentTable, ComponentTableBuilder, LoaderFn};
pub use manager::{BobbinHost, InstallReport, InstalledBobbin, load_manifests};
pub use manifest::{BobbinManifest, ExecutionDeclaration, ExtensionContribution, ViewDeclaration};
pub use policy::{ExecutionMode, PolicyConfig, PolicyMode, TrustPolicy};
pub use rate_limit::RateWindow;
pub use router::{RouterState, ViewContextEvent, ViewOutcome, ViewRouter};
pub use sandbox::{DataProvider, DataRequest, HOST_ENDPOINT, SandboxSurface, SurfaceSize};
pub use slots::{SlotDefinition, builtin_slots, slot_ids};
pub use subscription::Subscription;
pub use transport::{BridgeTransport, ChannelTransport, TransportEnd, WireFrame};
pub use views::{ViewMetadata, ViewRegistration, ViewRegistry};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the data if a listener panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
