//! Host side of a sandboxed view.
//!
//! A [`SandboxSurface`] owns a guarded [`MessageBridge`] scoped to one mounted
//! view. The guest end of its transport is handed to the isolated context;
//! everything the guest may do goes through the handlers registered here, and
//! every data operation is checked against the capabilities the host assigned
//! to the view at install time.

use crate::bridge::{InboundGuard, MessageBridge};
use crate::capabilities::{Capability, CapabilitySet};
use crate::config::{BridgeConfig, DEFAULT_SANDBOX_ORIGIN, HOST_ORIGIN};
use crate::error::{HostError, HostResult};
use crate::lock;
use crate::subscription::Subscription;
use crate::transport::{ChannelTransport, TransportEnd};
use crate::views::ViewRegistration;
use async_trait::async_trait;
use bobbins_types::{BridgeMessage, NavigationState, RESPONSE_SUFFIX, message_types};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Endpoint id of the host on every surface bridge.
pub const HOST_ENDPOINT: &str = "shell";

/// A data operation requested by a sandboxed view.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRequest {
    /// `query`, `get`, `create`, `update` or `delete`.
    pub operation: String,
    pub payload: Value,
}

/// Storage collaborator answering view data operations.
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn handle(&self, plugin_id: &str, request: DataRequest) -> anyhow::Result<Value>;
}

/// Size last requested by the guest through `view.resize`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SurfaceSize {
    pub width: Option<f64>,
    pub height: Option<f64>,
}

struct SurfaceShared {
    ready: AtomicBool,
    navigation: Mutex<NavigationState>,
    size: Mutex<SurfaceSize>,
    theme: Mutex<Option<Value>>,
}

/// A mounted sandboxed view.
pub struct SandboxSurface {
    view: ViewRegistration,
    guest_endpoint: String,
    bridge: Arc<MessageBridge>,
    guest: Option<TransportEnd>,
    shared: Arc<SurfaceShared>,
    pump: JoinHandle<()>,
    _handlers: Vec<Subscription>,
}

impl SandboxSurface {
    /// Creates the bridge for a sandboxed view and registers host handlers.
    ///
    /// Must be called within a tokio runtime.
    pub fn mount(
        view: ViewRegistration,
        navigation: NavigationState,
        config: &BridgeConfig,
        data: Option<Arc<dyn DataProvider>>,
        navigation_tx: mpsc::UnboundedSender<NavigationState>,
        theme: Option<Value>,
    ) -> Self {
        let guest_origin = config
            .allowed_origins
            .first()
            .map_or(DEFAULT_SANDBOX_ORIGIN, String::as_str);
        let (host_end, guest_end) = ChannelTransport::pair(HOST_ORIGIN, guest_origin);

        let bridge = Arc::new(
            MessageBridge::sandboxed(
                HOST_ENDPOINT,
                host_end.transport,
                InboundGuard::from_config(config),
            )
            .with_default_timeout(config.request_timeout()),
        );
        let pump = bridge.attach(host_end.inbound);

        let shared = Arc::new(SurfaceShared {
            ready: AtomicBool::new(false),
            navigation: Mutex::new(navigation),
            size: Mutex::new(SurfaceSize::default()),
            theme: Mutex::new(theme),
        });

        let handlers = vec![
            on_ready(&bridge, &shared, &view),
            on_navigate(&bridge, &view, navigation_tx),
            on_data(&bridge, &view, data),
            on_resize(&bridge, &shared),
        ];

        info!(view_id = %view.id, plugin_id = %view.plugin_id, "Mounted sandboxed view");
        Self {
            guest_endpoint: format!("view:{}", view.id),
            view,
            bridge,
            guest: Some(guest_end),
            shared,
            pump,
            _handlers: handlers,
        }
    }

    pub fn view(&self) -> &ViewRegistration {
        &self.view
    }

    /// Endpoint id the guest is expected to use.
    pub fn guest_endpoint(&self) -> &str {
        &self.guest_endpoint
    }

    pub fn bridge(&self) -> &Arc<MessageBridge> {
        &self.bridge
    }

    /// Hands the guest end of the transport to the isolated context. Only
    /// the first call returns it.
    pub fn take_guest_transport(&mut self) -> Option<TransportEnd> {
        self.guest.take()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    pub fn size(&self) -> SurfaceSize {
        *lock(&self.shared.size)
    }

    pub fn navigation(&self) -> NavigationState {
        lock(&self.shared.navigation).clone()
    }

    /// Pushes a new navigation context to the guest.
    pub fn route_changed(&self, navigation: NavigationState) -> HostResult<()> {
        let data = serde_json::to_value(&navigation)?;
        *lock(&self.shared.navigation) = navigation;
        self.bridge
            .send(&self.guest_endpoint, message_types::SHELL_ROUTE_CHANGED, Some(data))?;
        Ok(())
    }

    pub fn theme_changed(&self, theme: Value) -> HostResult<()> {
        *lock(&self.shared.theme) = Some(theme.clone());
        self.bridge
            .send(&self.guest_endpoint, message_types::SHELL_THEME_CHANGED, Some(theme))?;
        Ok(())
    }

    /// Closes the bridge and stops the inbound pump.
    pub fn unmount(self) {}
}

impl Drop for SandboxSurface {
    fn drop(&mut self) {
        self.bridge.close();
        self.pump.abort();
        debug!(view_id = %self.view.id, "Unmounted sandboxed view");
    }
}

impl std::fmt::Debug for SandboxSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxSurface")
            .field("view_id", &self.view.id)
            .field("guest_endpoint", &self.guest_endpoint)
            .field("ready", &self.is_ready())
            .finish()
    }
}

fn capability_names(capabilities: &CapabilitySet) -> Vec<&'static str> {
    capabilities.iter().map(|c| c.name()).collect()
}

/// Answers `message`, as `${type}_response` when it was
/// a request, otherwise as `shell.data.response`.
fn reply(bridge: &MessageBridge, message: &BridgeMessage, operation: &str, body: Value) {
    let result = if message.request_id.is_some() {
        bridge.respond(message, body)
    } else {
        let mut body = body;
        if let Value::Object(map) = &mut body {
            map.insert("operation".into(), json!(operation));
        }
        bridge
            .send(&message.source, message_types::SHELL_DATA_RESPONSE, Some(body))
            .map(|_| ())
    };
    if let Err(e) = result {
        debug!(error = %e, "Failed to answer sandboxed view");
    }
}

fn error_body(err: &HostError) -> Value {
    json!({ "error": err.to_string() })
}

fn on_ready(
    bridge: &Arc<MessageBridge>,
    shared: &Arc<SurfaceShared>,
    view: &ViewRegistration,
) -> Subscription {
    let weak = Arc::downgrade(bridge);
    let shared = Arc::clone(shared);
    let view_id = view.id.clone();
    let capabilities = capability_names(&view.capabilities);
    bridge.on(message_types::VIEW_READY, move |message| {
        let Some(bridge) = weak.upgrade() else {
            return;
        };
        shared.ready.store(true, Ordering::Release);
        let data = json!({
            "viewId": view_id,
            "navigation": lock(&shared.navigation).clone(),
            "capabilities": capabilities,
            "theme": lock(&shared.theme).clone(),
        });
        if let Err(e) = bridge.send(&message.source, message_types::SHELL_READY, Some(data)) {
            debug!(error = %e, "Failed to send shell.ready");
        }
    })
}

fn on_navigate(
    bridge: &Arc<MessageBridge>,
    view: &ViewRegistration,
    navigation_tx: mpsc::UnboundedSender<NavigationState>,
) -> Subscription {
    let weak: Weak<MessageBridge> = Arc::downgrade(bridge);
    let plugin_id = view.plugin_id.clone();
    let allowed = view.capabilities.is_granted(Capability::Navigate);
    bridge.on(message_types::VIEW_NAVIGATE, move |message| {
        if !allowed {
            warn!(plugin_id = %plugin_id, "Navigation request denied");
            if let Some(bridge) = weak.upgrade() {
                let err = HostError::CapabilityDenied {
                    plugin_id: plugin_id.clone(),
                    capability: Capability::Navigate.name().into(),
                };
                if message.request_id.is_some() {
                    reply(&bridge, message, "navigate", error_body(&err));
                }
            }
            return;
        }
        let target = message
            .data
            .clone()
            .map(serde_json::from_value::<NavigationState>);
        match target {
            Some(Ok(navigation)) => {
                debug!(plugin_id = %plugin_id, entity_type = %navigation.entity_type, "Forwarding navigation request");
                let _ = navigation_tx.send(navigation);
            }
            _ => debug!(plugin_id = %plugin_id, "Ignoring navigation request without a valid target"),
        }
    })
}

fn on_data(
    bridge: &Arc<MessageBridge>,
    view: &ViewRegistration,
    data: Option<Arc<dyn DataProvider>>,
) -> Subscription {
    let weak = Arc::downgrade(bridge);
    let plugin_id = view.plugin_id.clone();
    let capabilities = view.capabilities.clone();
    bridge.on_any(move |message| {
        let Some(operation) = message
            .message_type
            .strip_prefix(message_types::VIEW_DATA_PREFIX)
        else {
            return;
        };
        if operation.ends_with(RESPONSE_SUFFIX) {
            return;
        }
        let Some(bridge) = weak.upgrade() else {
            return;
        };

        let Some(required) = Capability::for_data_operation(operation) else {
            let body = json!({ "error": format!("unknown data operation '{operation}'") });
            reply(&bridge, message, operation, body);
            return;
        };
        if !capabilities.is_granted(required) {
            let err = HostError::CapabilityDenied {
                plugin_id: plugin_id.clone(),
                capability: required.name().into(),
            };
            warn!(plugin_id = %plugin_id, operation, "Data operation denied");
            reply(&bridge, message, operation, error_body(&err));
            return;
        }
        let Some(provider) = data.clone() else {
            reply(&bridge, message, operation, json!({ "error": "no data provider attached" }));
            return;
        };

        let weak = Arc::downgrade(&bridge);
        let plugin_id = plugin_id.clone();
        let message = message.clone();
        let request = DataRequest {
            operation: operation.to_string(),
            payload: message.data.clone().unwrap_or(Value::Null),
        };
        tokio::spawn(async move {
            let operation = request.operation.clone();
            let body = match provider.handle(&plugin_id, request).await {
                Ok(result) => json!({ "result": result }),
                Err(e) => json!({ "error": format!("{e:#}") }),
            };
            if let Some(bridge) = weak.upgrade() {
                reply(&bridge, &message, &operation, body);
            }
        });
    })
}

fn on_resize(bridge: &Arc<MessageBridge>, shared: &Arc<SurfaceShared>) -> Subscription {
    let shared = Arc::clone(shared);
    bridge.on(message_types::VIEW_RESIZE, move |message| {
        let Some(data) = &message.data else {
            return;
        };
        let mut size = lock(&shared.size);
        if let Some(width) = data.get("width").and_then(Value::as_f64) {
            size.width = Some(width);
        }
        if let Some(height) = data.get("height").and_then(Value::as_f64) {
            size.height = Some(height);
        }
    })
}
