//! Cross-context message bridge.
//!
//! A [`MessageBridge`] is one logical endpoint on a transport. It sends typed
//! envelopes, dispatches inbound ones to listeners, and correlates requests
//! with their `${type}_response` replies.
//!
//! Inbound processing order:
//! 1. origin allow-list (guarded endpoints only)
//! 2. rate limit (guarded endpoints only)
//! 3. structural validation
//! 4. target filter
//! 5. pending request resolution, then listeners
//!
//! Anything rejected along the way is dropped without surfacing an error.

use crate::config::BridgeConfig;
use crate::error::{HostError, HostResult};
use crate::lock;
use crate::rate_limit::RateWindow;
use crate::subscription::Subscription;
use crate::transport::{BridgeTransport, WireFrame};
use bobbins_types::{BridgeMessage, MessageId};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Callback invoked for each delivered message.
pub type MessageHandler = Arc<dyn Fn(&BridgeMessage) + Send + Sync>;

/// Why an inbound frame was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    ForeignOrigin,
    RateLimited,
    Malformed,
    NotAddressed,
    Closed,
}

/// What happened to an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to this many listeners.
    Delivered(usize),
    /// Completed an outstanding request.
    Resolved,
    Dropped(DropReason),
}

/// Admission checks for frames arriving from a sandboxed context.
#[derive(Debug)]
pub struct InboundGuard {
    allowed_origins: HashSet<String>,
    rate: Mutex<RateWindow>,
}

impl InboundGuard {
    pub fn new<I, S>(allowed_origins: I, limit: u32, window: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_origins: allowed_origins.into_iter().map(Into::into).collect(),
            rate: Mutex::new(RateWindow::new(limit, window)),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            config.allowed_origins.iter().cloned(),
            config.rate_limit_messages,
            config.rate_limit_window(),
        )
    }

    pub fn allows_origin(&self, origin: &str) -> bool {
        self.allowed_origins.contains(origin)
    }

    fn admit(&self, origin: &str) -> Result<(), DropReason> {
        if !self.allows_origin(origin) {
            return Err(DropReason::ForeignOrigin);
        }
        if !lock(&self.rate).try_acquire() {
            return Err(DropReason::RateLimited);
        }
        Ok(())
    }
}

struct Listener {
    id: u64,
    message_type: Option<String>,
    handler: MessageHandler,
}

struct PendingRequest {
    response_type: String,
    tx: oneshot::Sender<BridgeMessage>,
}

#[derive(Default)]
struct BridgeState {
    listeners: Vec<Listener>,
    pending: HashMap<String, PendingRequest>,
    closed: bool,
}

/// Removes its pending entry when the waiting request finishes either way.
struct PendingSlot {
    state: Arc<Mutex<BridgeState>>,
    request_id: String,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        lock(&self.state).pending.remove(&self.request_id);
    }
}

/// One endpoint of a bridge connection.
pub struct MessageBridge {
    endpoint_id: String,
    transport: Arc<dyn BridgeTransport>,
    guard: Option<InboundGuard>,
    state: Arc<Mutex<BridgeState>>,
    next_listener: AtomicU64,
    default_timeout: Duration,
}

impl MessageBridge {
    /// An endpoint that trusts every inbound frame's origin.
    pub fn new(endpoint_id: impl Into<String>, transport: Arc<dyn BridgeTransport>) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            transport,
            guard: None,
            state: Arc::new(Mutex::new(BridgeState::default())),
            next_listener: AtomicU64::new(0),
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// An endpoint facing a sandboxed context.
    pub fn sandboxed(
        endpoint_id: impl Into<String>,
        transport: Arc<dyn BridgeTransport>,
        guard: InboundGuard,
    ) -> Self {
        Self {
            guard: Some(guard),
            ..Self::new(endpoint_id, transport)
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    pub fn origin(&self) -> &str {
        self.transport.origin()
    }

    // ---- listeners ----

    /// Listens for one message type.
    pub fn on(
        &self,
        message_type: impl Into<String>,
        handler: impl Fn(&BridgeMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.add_listener(Some(message_type.into()), Arc::new(handler))
    }

    /// Listens for every message addressed to this endpoint.
    pub fn on_any(&self, handler: impl Fn(&BridgeMessage) + Send + Sync + 'static) -> Subscription {
        self.add_listener(None, Arc::new(handler))
    }

    fn add_listener(&self, message_type: Option<String>, handler: MessageHandler) -> Subscription {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.state).listeners.push(Listener {
            id,
            message_type,
            handler,
        });
        let weak: Weak<Mutex<BridgeState>> = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                lock(&state).listeners.retain(|l| l.id != id);
            }
        })
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.state).listeners.len()
    }

    // ---- outbound ----

    /// Posts a prepared message.
    pub fn post(&self, message: &BridgeMessage) -> HostResult<()> {
        if self.is_closed() {
            return Err(HostError::BridgeClosed(self.endpoint_id.clone()));
        }
        trace!(endpoint = %self.endpoint_id, message_type = %message.message_type, target = %message.target, "Posting message");
        self.transport.post(message.to_wire()?)
    }

    /// Sends a fire-and-forget message.
    pub fn send(
        &self,
        target: &str,
        message_type: &str,
        data: Option<Value>,
    ) -> HostResult<MessageId> {
        let message = self.envelope(target, message_type, data);
        self.post(&message)?;
        Ok(message.id)
    }

    /// Answers a request, echoing its correlation id.
    pub fn respond(&self, request: &BridgeMessage, data: Value) -> HostResult<()> {
        let response = request.reply(self.endpoint_id.clone(), self.origin(), data);
        self.post(&response)
    }

    /// Sends a request and waits for the matching `${type}_response`.
    ///
    /// Exactly one outcome is produced: the response, a `RequestTimeout`, or
    /// `BridgeClosed`. The pending entry is removed in every case, so a late
    /// response finds nothing to resolve.
    pub async fn request(
        &self,
        target: &str,
        message_type: &str,
        data: Option<Value>,
        timeout: Option<Duration>,
    ) -> HostResult<BridgeMessage> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let request_id = MessageId::new().to_string();
        let message = self
            .envelope(target, message_type, data)
            .with_request_id(request_id.clone());

        let (tx, rx) = oneshot::channel();
        {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(HostError::BridgeClosed(self.endpoint_id.clone()));
            }
            state.pending.insert(
                request_id.clone(),
                PendingRequest {
                    response_type: message.response_type(),
                    tx,
                },
            );
        }
        let _slot = PendingSlot {
            state: Arc::clone(&self.state),
            request_id: request_id.clone(),
        };

        self.post(&message)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(HostError::BridgeClosed(self.endpoint_id.clone())),
            Err(_) => {
                debug!(endpoint = %self.endpoint_id, message_type, request_id = %request_id, "Request timed out");
                Err(HostError::RequestTimeout {
                    message_type: message_type.to_string(),
                    request_id,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    pub fn pending_requests(&self) -> usize {
        lock(&self.state).pending.len()
    }

    fn envelope(&self, target: &str, message_type: &str, data: Option<Value>) -> BridgeMessage {
        let message = BridgeMessage::new(message_type, self.endpoint_id.clone(), target, self.origin());
        match data {
            Some(data) => message.with_data(data),
            None => message,
        }
    }

    // ---- inbound ----

    /// Processes one inbound frame.
    pub fn receive(&self, frame: WireFrame) -> Delivery {
        if self.is_closed() {
            return Delivery::Dropped(DropReason::Closed);
        }
        if let Some(guard) = &self.guard {
            if let Err(reason) = guard.admit(&frame.origin) {
                match reason {
                    DropReason::ForeignOrigin => {
                        warn!(endpoint = %self.endpoint_id, origin = %frame.origin, "Dropped frame from foreign origin");
                    }
                    _ => debug!(endpoint = %self.endpoint_id, ?reason, "Dropped inbound frame"),
                }
                return Delivery::Dropped(reason);
            }
        }

        let message = match BridgeMessage::from_wire(frame.payload) {
            Ok(message) => message,
            Err(e) => {
                debug!(endpoint = %self.endpoint_id, error = %e, "Dropped malformed frame");
                return Delivery::Dropped(DropReason::Malformed);
            }
        };

        if !message.is_addressed_to(&self.endpoint_id) {
            trace!(endpoint = %self.endpoint_id, target = %message.target, "Frame not addressed here");
            return Delivery::Dropped(DropReason::NotAddressed);
        }

        let handlers: Vec<MessageHandler> = {
            let mut state = lock(&self.state);
            if let Some(request_id) = message.request_id.as_deref() {
                let matches = state
                    .pending
                    .get(request_id)
                    .is_some_and(|p| p.response_type == message.message_type);
                if matches {
                    if let Some(pending) = state.pending.remove(request_id) {
                        let _ = pending.tx.send(message);
                    }
                    return Delivery::Resolved;
                }
            }
            state
                .listeners
                .iter()
                .filter(|l| {
                    l.message_type
                        .as_deref()
                        .is_none_or(|t| t == message.message_type)
                })
                .map(|l| Arc::clone(&l.handler))
                .collect()
        };

        for handler in &handlers {
            handler(&message);
        }
        Delivery::Delivered(handlers.len())
    }

    /// Spawns a task feeding `inbound` into [`receive`](Self::receive) until
    /// the channel ends, the bridge closes, or the bridge is dropped.
    pub fn attach(self: &Arc<Self>, mut inbound: mpsc::UnboundedReceiver<WireFrame>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                let Some(bridge) = weak.upgrade() else {
                    break;
                };
                if bridge.receive(frame) == Delivery::Dropped(DropReason::Closed) {
                    break;
                }
            }
        })
    }

    // ---- lifecycle ----

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Stops the endpoint. Waiting requests fail with `BridgeClosed` and
    /// every listener is dropped.
    pub fn close(&self) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }
        state.closed = true;
        state.listeners.clear();
        state.pending.clear();
        debug!(endpoint = %self.endpoint_id, "Bridge closed");
    }
}

impl std::fmt::Debug for MessageBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBridge")
            .field("endpoint_id", &self.endpoint_id)
            .field("origin", &self.origin())
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}
