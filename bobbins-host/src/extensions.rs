//! Extension registry: slot definitions, plugin contributions, and their
//! change notifications.
//!
//! One registry instance is shared by the whole host. Mutations take the
//! state lock briefly; listeners and condition evaluators are always invoked
//! after it is released, so either may query the registry it belongs to.

use crate::component::Component;
use crate::conditions::{ConditionEvaluator, ConditionRegistry, ExtensionContext};
use crate::config::RegistryConfig;
use crate::error::{HostError, HostResult};
use crate::lock;
use crate::manifest::ExtensionContribution;
use crate::slots::{SlotDefinition, builtin_slots};
use crate::subscription::Subscription;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// An extension stored in the registry.
#[derive(Debug, Clone)]
pub struct RegisteredExtension {
    /// `{plugin_id}.{contribution_id}`.
    pub id: String,
    pub plugin_id: String,
    pub contribution: ExtensionContribution,
    pub active: bool,
    /// Attached after the plugin's native component finished loading.
    pub component: Option<Component>,
    pub installed_at: DateTime<Utc>,
    pub version: Option<semver::Version>,
}

impl RegisteredExtension {
    pub fn synthesize_id(plugin_id: &str, contribution_id: &str) -> String {
        format!("{plugin_id}.{contribution_id}")
    }

    pub fn slot_id(&self) -> &str {
        &self.contribution.slot
    }

    /// Title, or the contribution id when none was declared.
    pub fn display_title(&self) -> &str {
        self.contribution
            .title
            .as_deref()
            .unwrap_or(&self.contribution.id)
    }
}

/// Result of a successful registration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    /// Same synthesized id already present; nothing changed.
    AlreadyRegistered,
}

/// Change notifications, delivered per slot and on the global channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    SlotRegistered {
        slot_id: String,
    },
    ExtensionRegistered {
        slot_id: String,
        extension_id: String,
    },
    ExtensionRemoved {
        slot_id: String,
        extension_id: String,
    },
    ExtensionToggled {
        slot_id: String,
        extension_id: String,
        active: bool,
    },
    ComponentAttached {
        slot_id: String,
        extension_id: String,
    },
    PluginRemoved {
        plugin_id: String,
        slots: Vec<String>,
    },
    ContextChanged,
    Reset,
}

type SlotListener = Arc<dyn Fn(&RegistryEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_slot: HashMap<String, Vec<(u64, SlotListener)>>,
}

struct RegistryState {
    slots: HashMap<String, SlotDefinition>,
    extensions: HashMap<String, RegisteredExtension>,
    context: ExtensionContext,
    conditions: ConditionRegistry,
}

impl RegistryState {
    fn seeded() -> Self {
        Self {
            slots: builtin_slots()
                .into_iter()
                .map(|slot| (slot.id.clone(), slot))
                .collect(),
            extensions: HashMap::new(),
            context: ExtensionContext::default(),
            conditions: ConditionRegistry::with_builtins(),
        }
    }
}

/// Registry of slots and the extensions contributed to them.
pub struct ExtensionRegistry {
    state: Mutex<RegistryState>,
    listeners: Arc<Mutex<Listeners>>,
    events: broadcast::Sender<RegistryEvent>,
    strict_duplicates: bool,
}

impl ExtensionRegistry {
    /// Creates a registry seeded with the built-in slots and condition kinds.
    pub fn new() -> Self {
        Self::with_config(&RegistryConfig::default())
    }

    pub fn with_config(config: &RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(RegistryState::seeded()),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            events,
            strict_duplicates: config.strict_duplicates,
        }
    }

    // ---- slots ----

    /// Inserts or replaces a slot definition.
    pub fn register_slot(&self, slot: SlotDefinition) {
        let slot_id = slot.id.clone();
        lock(&self.state).slots.insert(slot_id.clone(), slot);
        debug!(slot_id = %slot_id, "Registered slot");
        self.notify_slot(&slot_id, RegistryEvent::SlotRegistered { slot_id: slot_id.clone() });
    }

    pub fn slot(&self, slot_id: &str) -> Option<SlotDefinition> {
        lock(&self.state).slots.get(slot_id).cloned()
    }

    /// All slot definitions, ordered by id.
    pub fn slots(&self) -> Vec<SlotDefinition> {
        let mut slots: Vec<_> = lock(&self.state).slots.values().cloned().collect();
        slots.sort_by(|a, b| a.id.cmp(&b.id));
        slots
    }

    // ---- extensions ----

    pub fn register_extension(
        &self,
        plugin_id: &str,
        contribution: ExtensionContribution,
    ) -> HostResult<RegisterOutcome> {
        self.register_versioned(plugin_id, contribution, None)
    }

    /// Validates and stores a contribution as an active extension.
    ///
    /// Checks run in order: slot exists, type accepted, duplicate id,
    /// capacity. A failed call leaves the registry untouched.
    pub fn register_versioned(
        &self,
        plugin_id: &str,
        contribution: ExtensionContribution,
        version: Option<semver::Version>,
    ) -> HostResult<RegisterOutcome> {
        let id = RegisteredExtension::synthesize_id(plugin_id, &contribution.id);
        let slot_id = contribution.slot.clone();
        {
            let mut state = lock(&self.state);
            let Some(slot) = state.slots.get(&slot_id) else {
                return Err(HostError::UnknownSlot(slot_id));
            };
            if !slot.accepts_type(&contribution.contribution_type) {
                return Err(HostError::UnsupportedContributionType {
                    slot_id,
                    contribution_type: contribution.contribution_type,
                });
            }
            let max = slot.max_contributions;

            if state.extensions.contains_key(&id) {
                if self.strict_duplicates {
                    return Err(HostError::DuplicateExtension(id));
                }
                warn!(extension_id = %id, "Extension already registered, ignoring");
                return Ok(RegisterOutcome::AlreadyRegistered);
            }

            if let Some(max) = max {
                let registered = state
                    .extensions
                    .values()
                    .filter(|ext| ext.slot_id() == slot_id)
                    .count();
                if registered >= max {
                    return Err(HostError::SlotCapacityExceeded { slot_id, max });
                }
            }

            state.extensions.insert(
                id.clone(),
                RegisteredExtension {
                    id: id.clone(),
                    plugin_id: plugin_id.to_string(),
                    contribution,
                    active: true,
                    component: None,
                    installed_at: Utc::now(),
                    version,
                },
            );
        }

        info!(extension_id = %id, slot_id = %slot_id, "Registered extension");
        self.notify_slot(
            &slot_id,
            RegistryEvent::ExtensionRegistered {
                slot_id: slot_id.clone(),
                extension_id: id,
            },
        );
        Ok(RegisterOutcome::Registered)
    }

    /// Removes one extension. Returns whether it existed.
    pub fn unregister_extension(&self, extension_id: &str) -> bool {
        let removed = lock(&self.state).extensions.remove(extension_id);
        match removed {
            Some(ext) => {
                info!(extension_id = %extension_id, "Unregistered extension");
                let slot_id = ext.contribution.slot;
                self.notify_slot(
                    &slot_id,
                    RegistryEvent::ExtensionRemoved {
                        slot_id: slot_id.clone(),
                        extension_id: ext.id,
                    },
                );
                true
            }
            None => false,
        }
    }

    /// Removes every extension owned by `plugin_id` in a single step and
    /// notifies each affected slot once. Returns the number removed.
    pub fn unregister_plugin(&self, plugin_id: &str) -> usize {
        let mut slots: Vec<String> = {
            let mut state = lock(&self.state);
            let owned: Vec<String> = state
                .extensions
                .values()
                .filter(|ext| ext.plugin_id == plugin_id)
                .map(|ext| ext.id.clone())
                .collect();
            owned
                .iter()
                .filter_map(|id| state.extensions.remove(id))
                .map(|ext| ext.contribution.slot)
                .collect()
        };
        let removed = slots.len();
        slots.sort();
        slots.dedup();

        if removed > 0 {
            info!(plugin_id = %plugin_id, removed, "Unregistered plugin extensions");
            let event = RegistryEvent::PluginRemoved {
                plugin_id: plugin_id.to_string(),
                slots: slots.clone(),
            };
            for slot_id in &slots {
                self.call_slot_listeners(slot_id, &event);
            }
            let _ = self.events.send(event);
        }
        removed
    }

    pub fn get_extension(&self, extension_id: &str) -> Option<RegisteredExtension> {
        lock(&self.state).extensions.get(extension_id).cloned()
    }

    /// Active extensions of a slot whose conditions hold, in display order.
    ///
    /// Without an explicit context the registry's ambient context is used.
    pub fn get_extensions_for_slot(
        &self,
        slot_id: &str,
        context: Option<&ExtensionContext>,
    ) -> Vec<RegisteredExtension> {
        // Evaluators may call back into the registry, so they run unlocked.
        let (candidates, ambient, conditions) = {
            let state = lock(&self.state);
            let candidates: Vec<RegisteredExtension> = state
                .extensions
                .values()
                .filter(|ext| ext.active && ext.slot_id() == slot_id)
                .cloned()
                .collect();
            (candidates, state.context.clone(), state.conditions.clone())
        };
        let context = context.unwrap_or(&ambient);
        let mut visible: Vec<RegisteredExtension> = candidates
            .into_iter()
            .filter(|ext| conditions.evaluate_all(ext.contribution.when.as_ref(), context))
            .collect();
        visible.sort_by(|a, b| {
            a.display_title()
                .cmp(b.display_title())
                .then_with(|| a.id.cmp(&b.id))
        });
        visible
    }

    /// Every extension owned by a plugin, active or not, ordered by id.
    pub fn get_extensions_for_plugin(&self, plugin_id: &str) -> Vec<RegisteredExtension> {
        let mut owned: Vec<_> = lock(&self.state)
            .extensions
            .values()
            .filter(|ext| ext.plugin_id == plugin_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.id.cmp(&b.id));
        owned
    }

    /// Number of extensions registered to a slot, regardless of state.
    pub fn registered_count(&self, slot_id: &str) -> usize {
        lock(&self.state)
            .extensions
            .values()
            .filter(|ext| ext.slot_id() == slot_id)
            .count()
    }

    /// Toggles visibility. Listeners hear about it only when the flag flips.
    pub fn set_extension_active(&self, extension_id: &str, active: bool) -> HostResult<()> {
        let slot_id = {
            let mut state = lock(&self.state);
            let Some(ext) = state.extensions.get_mut(extension_id) else {
                return Err(HostError::ExtensionNotFound(extension_id.to_string()));
            };
            if ext.active == active {
                return Ok(());
            }
            ext.active = active;
            ext.contribution.slot.clone()
        };
        debug!(extension_id = %extension_id, active, "Extension toggled");
        self.notify_slot(
            &slot_id,
            RegistryEvent::ExtensionToggled {
                slot_id: slot_id.clone(),
                extension_id: extension_id.to_string(),
                active,
            },
        );
        Ok(())
    }

    /// Attaches a loaded component to an extension.
    pub fn attach_component(&self, extension_id: &str, component: Component) -> HostResult<()> {
        let slot_id = {
            let mut state = lock(&self.state);
            let Some(ext) = state.extensions.get_mut(extension_id) else {
                return Err(HostError::ExtensionNotFound(extension_id.to_string()));
            };
            ext.component = Some(component);
            ext.contribution.slot.clone()
        };
        self.notify_slot(
            &slot_id,
            RegistryEvent::ComponentAttached {
                slot_id: slot_id.clone(),
                extension_id: extension_id.to_string(),
            },
        );
        Ok(())
    }

    // ---- conditions ----

    pub fn context(&self) -> ExtensionContext {
        lock(&self.state).context.clone()
    }

    /// Replaces the ambient condition context and notifies every slot.
    pub fn set_context(&self, context: ExtensionContext) {
        self.update_context(|ctx| *ctx = context);
    }

    /// Edits the ambient condition context in place and notifies every slot.
    pub fn update_context(&self, edit: impl FnOnce(&mut ExtensionContext)) {
        edit(&mut lock(&self.state).context);
        let slot_ids: Vec<String> = lock(&self.listeners).by_slot.keys().cloned().collect();
        for slot_id in &slot_ids {
            self.call_slot_listeners(slot_id, &RegistryEvent::ContextChanged);
        }
        let _ = self.events.send(RegistryEvent::ContextChanged);
    }

    pub fn register_condition(
        &self,
        kind: impl Into<String>,
        evaluator: impl ConditionEvaluator + 'static,
    ) {
        lock(&self.state).conditions.register(kind, evaluator);
    }

    // ---- notification ----

    /// Observes changes to one slot. Listeners run in subscription order.
    pub fn subscribe_slot(
        &self,
        slot_id: impl Into<String>,
        listener: impl Fn(&RegistryEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let slot_id = slot_id.into();
        let id = {
            let mut listeners = lock(&self.listeners);
            listeners.next_id += 1;
            let id = listeners.next_id;
            listeners
                .by_slot
                .entry(slot_id.clone())
                .or_default()
                .push((id, Arc::new(listener)));
            id
        };

        let weak: Weak<Mutex<Listeners>> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                let mut listeners = lock(&listeners);
                if let Some(slot) = listeners.by_slot.get_mut(&slot_id) {
                    slot.retain(|(lid, _)| *lid != id);
                    if slot.is_empty() {
                        listeners.by_slot.remove(&slot_id);
                    }
                }
            }
        })
    }

    /// Global change feed for bulk resynchronization.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub fn slot_listener_count(&self, slot_id: &str) -> usize {
        lock(&self.listeners)
            .by_slot
            .get(slot_id)
            .map_or(0, Vec::len)
    }

    /// Restores the freshly constructed state and drops every slot listener.
    pub fn reset(&self) {
        *lock(&self.state) = RegistryState::seeded();
        lock(&self.listeners).by_slot.clear();
        let _ = self.events.send(RegistryEvent::Reset);
    }

    fn notify_slot(&self, slot_id: &str, event: RegistryEvent) {
        self.call_slot_listeners(slot_id, &event);
        let _ = self.events.send(event);
    }

    fn call_slot_listeners(&self, slot_id: &str, event: &RegistryEvent) {
        let snapshot: Vec<SlotListener> = lock(&self.listeners)
            .by_slot
            .get(slot_id)
            .map(|slot| slot.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();
        for listener in snapshot {
            listener(event);
        }
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
