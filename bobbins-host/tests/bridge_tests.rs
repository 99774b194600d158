//! Integration tests for the message bridge and sandboxed surfaces:
//! correlation, filtering, origin and rate guards, capability enforcement.

use async_trait::async_trait;
use bobbins_host::*;
use bobbins_types::{BridgeMessage, NavigationState, WILDCARD_TARGET, message_types};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn connected(a: &str, b: &str) -> (Arc<MessageBridge>, Arc<MessageBridge>) {
    let (end_a, end_b) = ChannelTransport::pair("app://a", "app://b");
    let bridge_a = Arc::new(MessageBridge::new(a, end_a.transport));
    let bridge_b = Arc::new(MessageBridge::new(b, end_b.transport));
    bridge_a.attach(end_a.inbound);
    bridge_b.attach(end_b.inbound);
    (bridge_a, bridge_b)
}

fn collect(bridge: &MessageBridge, message_type: &str) -> mpsc::UnboundedReceiver<BridgeMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    bridge
        .on(message_type, move |m| {
            let _ = tx.send(m.clone());
        })
        .detach();
    rx
}

// ================================================================
// Correlation
// ================================================================

#[tokio::test]
async fn concurrent_requests_resolve_independently() {
    let (client, server) = connected("client", "server");
    let responder = Arc::clone(&server);
    server
        .on("math.square", move |m| {
            let n = m.data.as_ref().and_then(|d| d["n"].as_i64()).unwrap_or(0);
            responder.respond(m, json!({ "square": n * n })).unwrap();
        })
        .detach();

    let (three, five) = tokio::join!(
        client.request("server", "math.square", Some(json!({"n": 3})), None),
        client.request("server", "math.square", Some(json!({"n": 5})), None),
    );

    assert_eq!(three.unwrap().data.unwrap()["square"], 9);
    assert_eq!(five.unwrap().data.unwrap()["square"], 25);
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn late_response_after_timeout_is_a_no_op() {
    let (client, server) = connected("client", "server");
    let mut requests = collect(&server, "slow.op");
    let mut stray = collect(&client, "slow.op_response");

    let err = client
        .request("server", "slow.op", None, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::RequestTimeout { timeout_ms: 50, .. }));
    assert_eq!(client.pending_requests(), 0);

    // the server finally answers
    let request = requests.recv().await.unwrap();
    server.respond(&request, json!({"late": true})).unwrap();

    // nothing was waiting, so the response falls through to listeners only
    let delivered = stray.recv().await.unwrap();
    assert_eq!(delivered.request_id, request.request_id);
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn correlation_id_alone_does_not_resolve() {
    let (end_client, mut end_server) = ChannelTransport::pair("app://a", "app://b");
    let client = Arc::new(MessageBridge::new("client", end_client.transport));

    let waiting = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.request("server", "doc.save", None, None).await })
    };
    let outbound = end_server.inbound.recv().await.unwrap();
    let request_id = outbound.payload["requestId"].as_str().unwrap().to_string();

    let answer = |message_type: &str| WireFrame {
        origin: "app://b".into(),
        payload: json!({
            "type": message_type, "source": "server", "target": "client",
            "origin": "app://b", "requestId": request_id,
        }),
    };

    assert_eq!(client.receive(answer("doc.load_response")), Delivery::Delivered(0));
    assert_eq!(client.pending_requests(), 1);

    assert_eq!(client.receive(answer("doc.save_response")), Delivery::Resolved);
    let response = waiting.await.unwrap().unwrap();
    assert_eq!(response.request_id.as_deref(), Some(request_id.as_str()));
    assert_eq!(client.pending_requests(), 0);
}

// ================================================================
// Target filtering
// ================================================================

#[tokio::test]
async fn endpoint_ignores_messages_for_others() {
    let (sender, receiver) = connected("sender", "receiver");
    let mut seen = collect(&receiver, "ping");

    sender.send("someone-else", "ping", Some(json!(1))).unwrap();
    sender.send(WILDCARD_TARGET, "ping", Some(json!(2))).unwrap();
    sender.send("receiver", "ping", Some(json!(3))).unwrap();

    assert_eq!(seen.recv().await.unwrap().data, Some(json!(2)));
    assert_eq!(seen.recv().await.unwrap().data, Some(json!(3)));
    assert!(seen.try_recv().is_err());
}

#[test]
fn unsubscribed_listener_stops_receiving() {
    let (end, _peer) = ChannelTransport::pair("app://a", "app://b");
    let bridge = MessageBridge::new("host", end.transport);
    let sub = bridge.on("ping", |_| panic!("listener should be gone"));
    sub.unsubscribe();

    let delivery = bridge.receive(WireFrame {
        origin: "app://b".into(),
        payload: json!({"type": "ping", "source": "x", "target": "host"}),
    });
    assert_eq!(delivery, Delivery::Delivered(0));
}

// ================================================================
// Guards
// ================================================================

#[test]
fn guarded_endpoint_rejects_foreign_origin_before_parsing() {
    let (end, _peer) = ChannelTransport::pair(HOST_ORIGIN, DEFAULT_SANDBOX_ORIGIN);
    let guard = InboundGuard::new([DEFAULT_SANDBOX_ORIGIN], 10, Duration::from_secs(1));
    let bridge = MessageBridge::sandboxed(HOST_ENDPOINT, end.transport, guard);

    let foreign = bridge.receive(WireFrame {
        origin: "https://elsewhere.example".into(),
        payload: json!("not even an object"),
    });
    assert_eq!(foreign, Delivery::Dropped(DropReason::ForeignOrigin));

    let malformed = bridge.receive(WireFrame {
        origin: DEFAULT_SANDBOX_ORIGIN.into(),
        payload: json!("not even an object"),
    });
    assert_eq!(malformed, Delivery::Dropped(DropReason::Malformed));
}

#[tokio::test(start_paused = true)]
async fn guarded_endpoint_rate_limits_per_window() {
    let (end, _peer) = ChannelTransport::pair(HOST_ORIGIN, DEFAULT_SANDBOX_ORIGIN);
    let guard = InboundGuard::new([DEFAULT_SANDBOX_ORIGIN], 3, Duration::from_millis(100));
    let bridge = MessageBridge::sandboxed(HOST_ENDPOINT, end.transport, guard);
    let frame = || WireFrame {
        origin: DEFAULT_SANDBOX_ORIGIN.into(),
        payload: json!({"type": "view.resize", "source": "view:x", "target": HOST_ENDPOINT}),
    };

    for _ in 0..3 {
        assert_eq!(bridge.receive(frame()), Delivery::Delivered(0));
    }
    assert_eq!(bridge.receive(frame()), Delivery::Dropped(DropReason::RateLimited));

    tokio::time::advance(Duration::from_millis(101)).await;
    assert_eq!(bridge.receive(frame()), Delivery::Delivered(0));
}

// ================================================================
// Sandboxed surfaces
// ================================================================

struct RecordingProvider {
    seen: mpsc::UnboundedSender<(String, DataRequest)>,
}

#[async_trait]
impl DataProvider for RecordingProvider {
    async fn handle(&self, plugin_id: &str, request: DataRequest) -> anyhow::Result<Value> {
        let _ = self.seen.send((plugin_id.to_string(), request.clone()));
        if request.operation == "delete" {
            anyhow::bail!("entity is locked");
        }
        Ok(json!({ "ok": request.operation }))
    }
}

fn board_view(capabilities: CapabilitySet) -> ViewRegistration {
    let declaration = ViewDeclaration {
        id: "board".into(),
        name: Some("Board".into()),
        view_type: "board".into(),
        source: Some("views/Board".into()),
        handlers: vec!["card".into()],
        priority: 0,
    };
    ViewRegistration::from_declaration("kanban", &declaration, ExecutionMode::Sandboxed, capabilities)
}

struct Mounted {
    surface: SandboxSurface,
    guest: Arc<MessageBridge>,
    navigation: mpsc::UnboundedReceiver<NavigationState>,
    provider_calls: mpsc::UnboundedReceiver<(String, DataRequest)>,
}

fn mount(capabilities: CapabilitySet, config: &BridgeConfig) -> Mounted {
    let (nav_tx, navigation) = mpsc::unbounded_channel();
    let (seen, provider_calls) = mpsc::unbounded_channel();
    let mut surface = SandboxSurface::mount(
        board_view(capabilities),
        NavigationState::new("card", "c1", "kanban"),
        config,
        Some(Arc::new(RecordingProvider { seen })),
        nav_tx,
        Some(json!({"scheme": "dark"})),
    );
    let guest_end = surface.take_guest_transport().unwrap();
    assert!(surface.take_guest_transport().is_none());
    let guest = Arc::new(
        MessageBridge::new(surface.guest_endpoint(), guest_end.transport)
            .with_default_timeout(Duration::from_secs(2)),
    );
    guest.attach(guest_end.inbound);
    Mounted {
        surface,
        guest,
        navigation,
        provider_calls,
    }
}

#[tokio::test]
async fn write_needs_write_capability() {
    let mut sandboxed = mount(CapabilitySet::sandboxed_default(), &BridgeConfig::default());
    let denied = sandboxed
        .guest
        .request(HOST_ENDPOINT, message_types::VIEW_DATA_UPDATE, Some(json!({"id": "c1"})), None)
        .await
        .unwrap();
    assert_eq!(denied.message_type, "view.data.update_response");
    let error = denied.data.unwrap()["error"].as_str().unwrap().to_string();
    assert!(error.contains("kanban") && error.contains("write"), "{error}");
    // the provider was never consulted
    assert!(sandboxed.provider_calls.try_recv().is_err());

    let granted: CapabilitySet = Capability::ALL.into_iter().collect();
    let mut trusted = mount(granted, &BridgeConfig::default());
    let accepted = trusted
        .guest
        .request(HOST_ENDPOINT, message_types::VIEW_DATA_UPDATE, Some(json!({"id": "c1"})), None)
        .await
        .unwrap();
    assert_eq!(accepted.data.unwrap()["result"]["ok"], "update");

    let (plugin_id, request) = trusted.provider_calls.recv().await.unwrap();
    assert_eq!(plugin_id, "kanban");
    assert_eq!(request.payload, json!({"id": "c1"}));
}

#[tokio::test]
async fn provider_failure_is_reported_to_guest() {
    let granted: CapabilitySet = Capability::ALL.into_iter().collect();
    let mounted = mount(granted, &BridgeConfig::default());
    let response = mounted
        .guest
        .request(HOST_ENDPOINT, message_types::VIEW_DATA_DELETE, Some(json!({"id": "c1"})), None)
        .await
        .unwrap();
    assert_eq!(response.data.unwrap()["error"], "entity is locked");
}

#[tokio::test]
async fn uncorrelated_data_message_gets_shell_data_response() {
    let mounted = mount(CapabilitySet::sandboxed_default(), &BridgeConfig::default());
    let mut responses = collect(&mounted.guest, message_types::SHELL_DATA_RESPONSE);

    mounted
        .guest
        .send(HOST_ENDPOINT, message_types::VIEW_DATA_QUERY, Some(json!({"type": "card"})))
        .unwrap();

    let response = responses.recv().await.unwrap();
    let data = response.data.unwrap();
    assert_eq!(data["operation"], "query");
    assert_eq!(data["result"]["ok"], "query");
}

#[tokio::test]
async fn ready_handshake_reports_theme_and_capabilities() {
    let mounted = mount(CapabilitySet::sandboxed_default(), &BridgeConfig::default());
    let mut ready = collect(&mounted.guest, message_types::SHELL_READY);
    mounted.guest.send(HOST_ENDPOINT, message_types::VIEW_READY, None).unwrap();

    let data = ready.recv().await.unwrap().data.unwrap();
    assert_eq!(data["viewId"], "kanban.board");
    assert_eq!(data["theme"], json!({"scheme": "dark"}));
    assert_eq!(data["capabilities"], json!(["read", "navigate"]));
    assert!(mounted.surface.is_ready());
}

#[tokio::test]
async fn navigate_without_capability_is_refused() {
    let read_only: CapabilitySet = [Capability::Read].into_iter().collect();
    let mut mounted = mount(read_only, &BridgeConfig::default());

    let response = mounted
        .guest
        .request(
            HOST_ENDPOINT,
            message_types::VIEW_NAVIGATE,
            Some(json!({"entityType": "card", "entityId": "c2", "bobbinId": "kanban"})),
            None,
        )
        .await
        .unwrap();
    assert!(response.data.unwrap()["error"].as_str().unwrap().contains("navigate"));
    assert!(mounted.navigation.try_recv().is_err());
}

#[tokio::test]
async fn surface_uses_configured_origin() {
    let config = BridgeConfig {
        allowed_origins: vec!["sandbox://custom".into()],
        ..BridgeConfig::default()
    };
    let mounted = mount(CapabilitySet::sandboxed_default(), &config);
    assert_eq!(mounted.guest.origin(), "sandbox://custom");

    let dropped = mounted.surface.bridge().receive(WireFrame {
        origin: DEFAULT_SANDBOX_ORIGIN.into(),
        payload: json!({"type": "view.ready", "source": "view:kanban.board", "target": HOST_ENDPOINT}),
    });
    assert_eq!(dropped, Delivery::Dropped(DropReason::ForeignOrigin));
}
