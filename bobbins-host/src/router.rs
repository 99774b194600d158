//! View router: turns navigation into a rendered view.
//!
//! ```text
//! Idle --navigate--> Resolving --loaded--> Loaded
//!   ^                  |   ^                  |
//!   |   no view/error  |   +----navigate------+
//!   +------------------+
//!   +------------- return_to_container -------+
//! ```
//!
//! Every navigation takes a new generation number. A load that completes
//! after a newer navigation began, or after the router was unmounted, is
//! discarded.

use crate::component::Component;
use crate::config::BridgeConfig;
use crate::error::HostError;
use crate::extensions::ExtensionRegistry;
use crate::history::NavigationHistory;
use crate::loader::ComponentLoader;
use crate::lock;
use crate::policy::ExecutionMode;
use crate::sandbox::{DataProvider, SandboxSurface};
use crate::transport::TransportEnd;
use crate::views::{ViewRegistration, ViewRegistry};
use bobbins_types::{NAVIGATION_EVENT, NavigationState};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CONTEXT_CHANNEL_CAPACITY: usize = 64;

/// Router lifecycle state.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterState {
    Idle,
    Resolving(NavigationState),
    Loaded {
        navigation: NavigationState,
        view_id: String,
    },
}

/// Broadcast when the active view context changes, before the view loads.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewContextEvent {
    /// `None` after returning to the container.
    pub navigation: Option<NavigationState>,
    /// View chosen for the navigation, if any handles it.
    pub view_id: Option<String>,
}

impl ViewContextEvent {
    pub fn name(&self) -> &'static str {
        NAVIGATION_EVENT
    }
}

/// Result of one navigation.
#[derive(Debug)]
pub enum ViewOutcome {
    Rendered {
        view_id: String,
        execution_mode: ExecutionMode,
    },
    /// No installed view handles the entity type; render a placeholder.
    Unhandled(NavigationState),
    /// The view could not be loaded; render a fallback.
    Failed {
        navigation: NavigationState,
        error: HostError,
    },
    /// A newer navigation or an unmount overtook this one.
    Superseded,
}

enum ActiveView {
    Native {
        view_id: String,
        component: Component,
    },
    Sandboxed(SandboxSurface),
}

impl ActiveView {
    fn view_id(&self) -> &str {
        match self {
            Self::Native { view_id, .. } => view_id,
            Self::Sandboxed(surface) => &surface.view().id,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum HistoryMode {
    Push,
    /// Restoring an entry already in history.
    Replay,
}

struct RouterInner {
    state: RouterState,
    history: NavigationHistory,
    active: Option<ActiveView>,
    generation: u64,
    mounted: bool,
    theme: Option<Value>,
}

/// Resolves navigation events to views and keeps history consistent.
pub struct ViewRouter {
    views: Arc<ViewRegistry>,
    loader: Arc<ComponentLoader>,
    bridge_config: BridgeConfig,
    data: Option<Arc<dyn DataProvider>>,
    extensions: Option<Arc<ExtensionRegistry>>,
    inner: Mutex<RouterInner>,
    context_tx: broadcast::Sender<ViewContextEvent>,
    navigation_tx: mpsc::UnboundedSender<NavigationState>,
    navigation_rx: Mutex<Option<mpsc::UnboundedReceiver<NavigationState>>>,
}

impl ViewRouter {
    pub fn new(
        views: Arc<ViewRegistry>,
        loader: Arc<ComponentLoader>,
        bridge_config: BridgeConfig,
    ) -> Self {
        let (context_tx, _) = broadcast::channel(CONTEXT_CHANNEL_CAPACITY);
        let (navigation_tx, navigation_rx) = mpsc::unbounded_channel();
        Self {
            views,
            loader,
            bridge_config,
            data: None,
            extensions: None,
            inner: Mutex::new(RouterInner {
                state: RouterState::Idle,
                history: NavigationHistory::new(),
                active: None,
                generation: 0,
                mounted: true,
                theme: None,
            }),
            context_tx,
            navigation_tx,
            navigation_rx: Mutex::new(Some(navigation_rx)),
        }
    }

    /// Sets the collaborator answering sandboxed data operations.
    pub fn with_data_provider(mut self, data: Arc<dyn DataProvider>) -> Self {
        self.data = Some(data);
        self
    }

    /// Keeps the registry's condition context in step with navigation. The
    /// context is updated before the view starts loading.
    pub fn with_extension_context(mut self, extensions: Arc<ExtensionRegistry>) -> Self {
        self.extensions = Some(extensions);
        self
    }

    /// Navigates to an entity, recording it in history.
    pub async fn navigate(&self, navigation: NavigationState) -> ViewOutcome {
        self.apply(navigation, HistoryMode::Push).await
    }

    /// Restores the previous history entry without pushing it again.
    /// `None` when there is nothing to go back to.
    pub async fn back(&self) -> Option<ViewOutcome> {
        let target = lock(&self.inner).history.back().cloned()?;
        Some(self.apply(target, HistoryMode::Replay).await)
    }

    pub async fn forward(&self) -> Option<ViewOutcome> {
        let target = lock(&self.inner).history.forward().cloned()?;
        Some(self.apply(target, HistoryMode::Replay).await)
    }

    /// Leaves the active entity and goes back to `Idle`.
    pub fn return_to_container(&self) {
        {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            inner.state = RouterState::Idle;
            inner.active = None;
        }
        debug!("Returned to container");
        self.broadcast(ViewContextEvent {
            navigation: None,
            view_id: None,
        });
    }

    async fn apply(&self, navigation: NavigationState, mode: HistoryMode) -> ViewOutcome {
        let generation = {
            let mut inner = lock(&self.inner);
            if !inner.mounted {
                return ViewOutcome::Superseded;
            }
            if mode == HistoryMode::Push {
                inner.history.push(navigation.clone());
            }
            inner.generation += 1;
            inner.state = RouterState::Resolving(navigation.clone());
            inner.generation
        };

        let selected = select_view(self.views.get_views_by_handler(&navigation.entity_type));
        self.broadcast(ViewContextEvent {
            navigation: Some(navigation.clone()),
            view_id: selected.as_ref().map(|v| v.id.clone()),
        });

        let Some(view) = selected else {
            info!(entity_type = %navigation.entity_type, entity_id = %navigation.entity_id, "No view handles entity type");
            let mut inner = lock(&self.inner);
            if inner.generation != generation || !inner.mounted {
                return ViewOutcome::Superseded;
            }
            inner.state = RouterState::Idle;
            inner.active = None;
            return ViewOutcome::Unhandled(navigation);
        };

        match view.execution_mode {
            ExecutionMode::Native => self.show_native(view, navigation, generation).await,
            ExecutionMode::Sandboxed => self.show_sandboxed(view, navigation, generation),
        }
    }

    async fn show_native(
        &self,
        view: ViewRegistration,
        navigation: NavigationState,
        generation: u64,
    ) -> ViewOutcome {
        let result = match view.source.as_deref() {
            Some(source) => self.loader.load(&view.plugin_id, source).await,
            None => Err(HostError::ViewLoadFailure {
                plugin_id: view.plugin_id.clone(),
                view_path: String::new(),
                lookup_key: String::new(),
                reason: format!("view '{}' declares no source", view.id),
            }),
        };

        let mut inner = lock(&self.inner);
        if inner.generation != generation || !inner.mounted {
            debug!(view_id = %view.id, "Discarding stale view load");
            return ViewOutcome::Superseded;
        }
        match result {
            Ok(component) => {
                inner.active = Some(ActiveView::Native {
                    view_id: view.id.clone(),
                    component,
                });
                inner.state = RouterState::Loaded {
                    navigation,
                    view_id: view.id.clone(),
                };
                ViewOutcome::Rendered {
                    view_id: view.id,
                    execution_mode: ExecutionMode::Native,
                }
            }
            Err(error) => {
                warn!(view_id = %view.id, error = %error, "Failed to load view");
                inner.state = RouterState::Idle;
                inner.active = None;
                ViewOutcome::Failed { navigation, error }
            }
        }
    }

    fn show_sandboxed(
        &self,
        view: ViewRegistration,
        navigation: NavigationState,
        generation: u64,
    ) -> ViewOutcome {
        let mut inner = lock(&self.inner);
        if inner.generation != generation || !inner.mounted {
            return ViewOutcome::Superseded;
        }

        let reused = match &inner.active {
            Some(ActiveView::Sandboxed(surface)) if surface.view().id == view.id => {
                if let Err(e) = surface.route_changed(navigation.clone()) {
                    warn!(view_id = %view.id, error = %e, "Failed to push route change");
                }
                true
            }
            _ => false,
        };
        if !reused {
            let surface = SandboxSurface::mount(
                view.clone(),
                navigation.clone(),
                &self.bridge_config,
                self.data.clone(),
                self.navigation_tx.clone(),
                inner.theme.clone(),
            );
            inner.active = Some(ActiveView::Sandboxed(surface));
        }

        inner.state = RouterState::Loaded {
            navigation,
            view_id: view.id.clone(),
        };
        ViewOutcome::Rendered {
            view_id: view.id,
            execution_mode: ExecutionMode::Sandboxed,
        }
    }

    fn broadcast(&self, event: ViewContextEvent) {
        debug!(event = event.name(), view_id = ?event.view_id, "View context changed");
        if let Some(extensions) = &self.extensions {
            extensions.update_context(|ctx| {
                ctx.apply_navigation(event.navigation.as_ref(), event.view_id.as_deref())
            });
        }
        let _ = self.context_tx.send(event);
    }

    // ---- observation ----

    pub fn state(&self) -> RouterState {
        lock(&self.inner).state.clone()
    }

    pub fn history(&self) -> NavigationHistory {
        lock(&self.inner).history.clone()
    }

    pub fn subscribe_context(&self) -> broadcast::Receiver<ViewContextEvent> {
        self.context_tx.subscribe()
    }

    /// Navigation requests raised by sandboxed views. Only the first call
    /// returns the receiver.
    pub fn navigation_requests(&self) -> Option<mpsc::UnboundedReceiver<NavigationState>> {
        lock(&self.navigation_rx).take()
    }

    /// Spawns a task that performs every navigation requested by a sandboxed
    /// view. `None` if the receiver was already taken.
    pub fn follow_navigation_requests(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut requests = self.navigation_requests()?;
        let weak = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            while let Some(navigation) = requests.recv().await {
                let Some(router) = weak.upgrade() else {
                    break;
                };
                router.navigate(navigation).await;
            }
        }))
    }

    pub fn active_view_id(&self) -> Option<String> {
        lock(&self.inner)
            .active
            .as_ref()
            .map(|active| active.view_id().to_string())
    }

    /// Component of the active native view.
    pub fn active_component(&self) -> Option<Component> {
        match &lock(&self.inner).active {
            Some(ActiveView::Native { component, .. }) => Some(Arc::clone(component)),
            _ => None,
        }
    }

    /// Guest transport of the active sandboxed view, for the isolated
    /// context to connect to.
    pub fn take_guest_transport(&self) -> Option<TransportEnd> {
        match &mut lock(&self.inner).active {
            Some(ActiveView::Sandboxed(surface)) => surface.take_guest_transport(),
            _ => None,
        }
    }

    /// Stores the theme and pushes it to an active sandboxed view.
    pub fn set_theme(&self, theme: Value) {
        let mut inner = lock(&self.inner);
        inner.theme = Some(theme.clone());
        if let Some(ActiveView::Sandboxed(surface)) = &inner.active {
            if let Err(e) = surface.theme_changed(theme) {
                debug!(error = %e, "Failed to push theme change");
            }
        }
    }

    pub fn is_mounted(&self) -> bool {
        lock(&self.inner).mounted
    }

    /// Tears the router down. Pending loads resolve as `Superseded`, the
    /// active surface's bridge is closed, and later navigations are ignored.
    pub fn unmount(&self) {
        let mut inner = lock(&self.inner);
        inner.mounted = false;
        inner.generation += 1;
        inner.active = None;
        inner.state = RouterState::Idle;
        inner.history.clear();
        info!("View router unmounted");
    }
}

/// Picks the view to render among the candidates for an entity type.
fn select_view(candidates: Vec<ViewRegistration>) -> Option<ViewRegistration> {
    candidates.into_iter().next()
}
