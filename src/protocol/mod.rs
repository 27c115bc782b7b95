//! Realtime Wire Protocol
//!
//! Single responsibility: Define the message vocabulary and encode/decode
//! frames. No state; pure values and functions.
//!
//! # Wire Format
//!
//! Every frame is a JSON object tagged by `"type"`:
//!
//! ```text
//! { "type": "publish", "topic": "livestock.updated", "payload": {...}, "timestamp": 1722945600000 }
//! ```
//!
//! Two or more messages may travel inside a single batch envelope:
//!
//! ```text
//! { "type": "batch", "id": "<uuid>", "timestamp": ..., "messages": [ {...}, {...} ] }
//! ```
//!
//! Messages are immutable once constructed. Transformations (compression,
//! encryption, batching) build new values.

pub mod routes;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::RealtimeError;

/// Every message kind the protocol understands.
///
/// Inbound frames with a `type` outside this enumeration fail
/// deserialization and are reported, not dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Subscribe,
    Unsubscribe,
    SubscribeRoute,
    UnsubscribeRoute,
    Publish,
    Broadcast,
    Notification,
    Ping,
    Pong,
    Heartbeat,
    Error,
    Ack,
    Update,
    Create,
    Delete,
    Patch,
    Auth,
    AuthSuccess,
    AuthError,
    Custom,
    Batch,
}

impl MessageKind {
    /// Kinds that acknowledge a heartbeat ping.
    pub fn is_heartbeat_ack(self) -> bool {
        matches!(self, MessageKind::Pong | MessageKind::Heartbeat | MessageKind::Ack)
    }

    /// Kinds that describe a change to a named resource.
    pub fn is_resource_change(self) -> bool {
        matches!(
            self,
            MessageKind::Update | MessageKind::Create | MessageKind::Delete | MessageKind::Patch
        )
    }

    /// Kinds whose payload is user data rather than protocol plumbing.
    /// Only these are eligible for compression and encryption; control
    /// frames must stay readable by the server as-is.
    pub fn carries_user_payload(self) -> bool {
        matches!(
            self,
            MessageKind::Publish
                | MessageKind::Broadcast
                | MessageKind::Notification
                | MessageKind::Custom
        ) || self.is_resource_change()
    }
}

/// The unit on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Epoch milliseconds, stamped by the builders.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    fn base(kind: MessageKind) -> Self {
        Self {
            kind,
            id: None,
            channel: None,
            topic: None,
            route: None,
            resource: None,
            payload: None,
            timestamp: Some(Utc::now()),
        }
    }

    /// A `subscribe` announcement for a channel.
    pub fn subscription(channel: impl Into<String>) -> Self {
        Self {
            channel: Some(channel.into()),
            ..Self::base(MessageKind::Subscribe)
        }
    }

    /// An `unsubscribe` announcement for a channel.
    pub fn unsubscription(channel: impl Into<String>) -> Self {
        Self {
            channel: Some(channel.into()),
            ..Self::base(MessageKind::Unsubscribe)
        }
    }

    /// A `subscribe_route` announcement carrying the full topic set of
    /// interest for the route. Re-sending the same set is safe.
    pub fn route_subscription<S: AsRef<str>>(route: impl Into<String>, topics: &[S]) -> Self {
        let topics: Vec<Value> = topics
            .iter()
            .map(|t| Value::String(t.as_ref().to_string()))
            .collect();
        Self {
            route: Some(route.into()),
            payload: Some(serde_json::json!({ "topics": topics })),
            ..Self::base(MessageKind::SubscribeRoute)
        }
    }

    /// An `unsubscribe_route` announcement.
    pub fn route_unsubscription(route: impl Into<String>) -> Self {
        Self {
            route: Some(route.into()),
            ..Self::base(MessageKind::UnsubscribeRoute)
        }
    }

    /// A `publish` to a topic.
    pub fn publish(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: Some(topic.into()),
            payload: Some(payload),
            ..Self::base(MessageKind::Publish)
        }
    }

    /// A user-facing `notification`, optionally scoped to a topic.
    pub fn notification(
        title: impl Into<String>,
        body: impl Into<String>,
        topic: Option<String>,
    ) -> Self {
        Self {
            topic,
            payload: Some(serde_json::json!({
                "title": title.into(),
                "body": body.into(),
            })),
            ..Self::base(MessageKind::Notification)
        }
    }

    /// An update/create/delete/patch against a named resource.
    pub fn resource_change(
        kind: MessageKind,
        resource: impl Into<String>,
        payload: Value,
    ) -> Result<Self, RealtimeError> {
        if !kind.is_resource_change() {
            return Err(RealtimeError::Protocol(format!(
                "{:?} is not a resource-change kind",
                kind
            )));
        }
        Ok(Self {
            resource: Some(resource.into()),
            payload: Some(payload),
            ..Self::base(kind)
        })
    }

    /// A heartbeat `ping` with a correlation id.
    pub fn ping() -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            ..Self::base(MessageKind::Ping)
        }
    }

    /// A `pong` answering the ping with `id`.
    pub fn pong(id: Option<String>) -> Self {
        Self {
            id,
            ..Self::base(MessageKind::Pong)
        }
    }

    /// An `auth` message carrying a token.
    pub fn auth(token: impl Into<String>) -> Self {
        Self {
            payload: Some(serde_json::json!({ "token": token.into() })),
            ..Self::base(MessageKind::Auth)
        }
    }

    /// Check the kind-specific required fields.
    ///
    /// Locally built messages fail fast here; inbound messages that fail are
    /// reported and skipped by the dispatch loop.
    pub fn validate(&self) -> Result<(), RealtimeError> {
        let missing = |field: &str| RealtimeError::MissingField {
            kind: format!("{:?}", self.kind),
            field: field.to_string(),
        };

        match self.kind {
            MessageKind::Publish | MessageKind::Broadcast => {
                if self.topic.is_none() {
                    return Err(missing("topic"));
                }
                if self.payload.is_none() {
                    return Err(missing("payload"));
                }
            }
            MessageKind::Subscribe | MessageKind::Unsubscribe => {
                if self.channel.is_none() {
                    return Err(missing("channel"));
                }
            }
            MessageKind::SubscribeRoute | MessageKind::UnsubscribeRoute => {
                if self.route.is_none() {
                    return Err(missing("route"));
                }
            }
            MessageKind::Update | MessageKind::Create | MessageKind::Delete | MessageKind::Patch => {
                if self.resource.is_none() && self.route.is_none() {
                    return Err(missing("resource"));
                }
            }
            MessageKind::Notification | MessageKind::Auth => {
                if self.payload.is_none() {
                    return Err(missing("payload"));
                }
            }
            MessageKind::Batch => {
                return Err(RealtimeError::Protocol(
                    "batch envelopes are not plain messages".into(),
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// Serialize to a wire frame.
    pub fn to_wire(&self) -> Result<String, RealtimeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A container frame wrapping an ordered list of messages.
///
/// Exists only transiently between the batch queue and the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEnvelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl BatchEnvelope {
    /// Wrap messages, preserving their relative order.
    pub fn wrap(messages: Vec<Message>) -> Self {
        Self {
            kind: MessageKind::Batch,
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            messages,
        }
    }

    /// Unwrap into the original ordered list.
    pub fn unwrap_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn to_wire(&self) -> Result<String, RealtimeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A decoded inbound frame: either one message or a batch of them.
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    Single(Message),
    Batch(BatchEnvelope),
}

impl WireFrame {
    pub fn to_wire(&self) -> Result<String, RealtimeError> {
        match self {
            WireFrame::Single(m) => m.to_wire(),
            WireFrame::Batch(b) => b.to_wire(),
        }
    }
}

/// Decode a text frame, sniffing the `"type"` key to tell a batch envelope
/// from a single message.
pub fn decode_frame(text: &str) -> Result<WireFrame, RealtimeError> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RealtimeError::Protocol("frame missing 'type'".into()))?;

    if kind == "batch" {
        Ok(WireFrame::Batch(serde_json::from_value(value)?))
    } else {
        Ok(WireFrame::Single(serde_json::from_value(value)?))
    }
}
