//! Bridge wire envelope.
//!
//! Every message crossing the host/sandbox boundary is a JSON object of the
//! shape `{ id, type, source, target, data?, timestamp, origin, requestId? }`.
//! Inbound frames are untrusted, so [`BridgeMessage::from_wire`] checks the
//! routing fields before attempting a full decode.

use crate::ids::MessageId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Target that every endpoint accepts.
pub const WILDCARD_TARGET: &str = "*";

/// Suffix appended to a request type to form its response type.
pub const RESPONSE_SUFFIX: &str = "_response";

/// Well-known message types.
pub mod message_types {
    // view -> host
    pub const VIEW_READY: &str = "view.ready";
    pub const VIEW_NAVIGATE: &str = "view.navigate";
    pub const VIEW_RESIZE: &str = "view.resize";
    pub const VIEW_DATA_PREFIX: &str = "view.data.";
    pub const VIEW_DATA_QUERY: &str = "view.data.query";
    pub const VIEW_DATA_GET: &str = "view.data.get";
    pub const VIEW_DATA_CREATE: &str = "view.data.create";
    pub const VIEW_DATA_UPDATE: &str = "view.data.update";
    pub const VIEW_DATA_DELETE: &str = "view.data.delete";

    // host -> view
    pub const SHELL_READY: &str = "shell.ready";
    pub const SHELL_DATA_RESPONSE: &str = "shell.data.response";
    pub const SHELL_THEME_CHANGED: &str = "shell.theme.changed";
    pub const SHELL_ROUTE_CHANGED: &str = "shell.route.changed";
}

fn default_id() -> MessageId {
    MessageId::new()
}

/// A typed message exchanged over the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeMessage {
    #[serde(default = "default_id")]
    pub id: MessageId,
    /// Namespaced type, e.g. `view.data.query`.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Endpoint id of the sender.
    pub source: String,
    /// Endpoint id of the receiver, or [`WILDCARD_TARGET`].
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Unix epoch milliseconds.
    #[serde(default)]
    pub timestamp: i64,
    /// Origin the sender claims. Transports attest the real origin separately.
    #[serde(default)]
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl BridgeMessage {
    /// Creates a message stamped with a fresh id and the current time.
    pub fn new(
        message_type: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            message_type: message_type.into(),
            source: source.into(),
            target: target.into(),
            data: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
            origin: origin.into(),
            request_id: None,
        }
    }

    /// Attaches a payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attaches a correlation id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// The type a response to this message carries.
    pub fn response_type(&self) -> String {
        response_type_for(&self.message_type)
    }

    /// Whether this message is a response (by naming convention).
    pub fn is_response(&self) -> bool {
        self.message_type.ends_with(RESPONSE_SUFFIX)
    }

    /// Builds the response to this message, addressed back to its sender and
    /// carrying the same correlation id.
    pub fn reply(&self, source: impl Into<String>, origin: impl Into<String>, data: Value) -> Self {
        let mut response = Self::new(self.response_type(), source, self.source.clone(), origin)
            .with_data(data);
        response.request_id = self.request_id.clone();
        response
    }

    /// Whether an endpoint with `endpoint_id` should receive this message.
    pub fn is_addressed_to(&self, endpoint_id: &str) -> bool {
        self.target == endpoint_id || self.target == WILDCARD_TARGET
    }

    /// Decodes an untrusted wire frame.
    ///
    /// `type`, `source` and `target` must be present and be strings.
    pub fn from_wire(value: Value) -> Result<Self> {
        let Some(object) = value.as_object() else {
            return Err(Error::MalformedMessage("frame is not an object".into()));
        };
        for field in ["type", "source", "target"] {
            match object.get(field) {
                Some(Value::String(_)) => {}
                Some(_) => {
                    return Err(Error::MalformedMessage(format!(
                        "field '{field}' is not a string"
                    )));
                }
                None => {
                    return Err(Error::MalformedMessage(format!("missing field '{field}'")));
                }
            }
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Encodes the message as a wire frame.
    pub fn to_wire(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Response type for a request type: `${type}_response`.
pub fn response_type_for(message_type: &str) -> String {
    format!("{message_type}{RESPONSE_SUFFIX}")
}
