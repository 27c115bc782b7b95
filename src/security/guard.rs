//! Inbound and outbound message guards
//!
//! Single responsibility: freshness (anti-replay) and permission checks on
//! inbound messages, and sensitive-field stripping on outbound payloads.
//! These are best-effort guards at the client edge, not a server trust
//! boundary.

use chrono::{Duration, Utc};
use serde_json::Value;

use crate::error::RealtimeError;
use crate::protocol::routes;
use crate::protocol::Message;

/// Field names stripped from every outgoing payload.
const SENSITIVE_KEYS: &[&str] = &["password", "token", "secret", "key", "private", "ssn"];

/// Reject messages whose timestamp falls outside the freshness window or
/// runs ahead of the clock by more than the tolerated skew.
///
/// Messages without a timestamp pass; there is nothing to judge.
pub fn check_freshness(
    message: &Message,
    window: Duration,
    skew: Duration,
) -> Result<(), RealtimeError> {
    let Some(timestamp) = message.timestamp else {
        return Ok(());
    };
    let age = Utc::now().signed_duration_since(timestamp);

    if age > window || age < -skew {
        return Err(RealtimeError::StaleMessage {
            age_ms: age.num_milliseconds(),
        });
    }
    Ok(())
}

/// Gated topic prefixes require a held token.
pub fn check_permission(message: &Message, token: Option<&str>) -> Result<(), RealtimeError> {
    let Some(topic) = message.topic.as_deref() else {
        return Ok(());
    };
    if routes::is_gated_topic(topic) && token.is_none() {
        return Err(RealtimeError::PermissionDenied(topic.to_string()));
    }
    Ok(())
}

/// Strip sensitive fields from a payload, recursively.
///
/// A key matches when its lowercased form contains any of the sensitive
/// names. Applied to every outgoing payload regardless of encryption.
pub fn sanitize(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|key, _| {
                let lowered = key.to_lowercase();
                !SENSITIVE_KEYS.iter().any(|s| lowered.contains(s))
            });
            for nested in map.values_mut() {
                sanitize(nested);
            }
        }
        Value::Array(items) => {
            for item in items {
                sanitize(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageKind;
    use serde_json::json;

    fn message_with_age(age: Duration) -> Message {
        let mut msg = Message::publish("livestock.updated", json!({"id": 1}));
        msg.timestamp = Some(Utc::now() - age);
        msg
    }

    #[test]
    fn fresh_message_passes() {
        let msg = message_with_age(Duration::seconds(30));
        assert!(check_freshness(&msg, Duration::minutes(5), Duration::seconds(1)).is_ok());
    }

    #[test]
    fn stale_message_is_rejected() {
        let msg = message_with_age(Duration::minutes(6));
        let err = check_freshness(&msg, Duration::minutes(5), Duration::seconds(1)).unwrap_err();
        assert!(matches!(err, RealtimeError::StaleMessage { age_ms } if age_ms > 0));
    }

    #[test]
    fn future_message_beyond_skew_is_rejected() {
        let msg = message_with_age(Duration::seconds(-10));
        let err = check_freshness(&msg, Duration::minutes(5), Duration::seconds(1)).unwrap_err();
        assert!(matches!(err, RealtimeError::StaleMessage { age_ms } if age_ms < 0));
    }

    #[test]
    fn small_future_skew_is_tolerated() {
        let msg = message_with_age(Duration::milliseconds(-500));
        assert!(check_freshness(&msg, Duration::minutes(5), Duration::seconds(1)).is_ok());
    }

    #[test]
    fn missing_timestamp_passes() {
        let mut msg = Message::publish("livestock.updated", json!({}));
        msg.timestamp = None;
        assert!(check_freshness(&msg, Duration::minutes(5), Duration::seconds(1)).is_ok());
    }

    #[test]
    fn gated_topic_requires_token() {
        let msg = Message::publish("finance.journal.posted", json!({}));
        assert!(matches!(
            check_permission(&msg, None),
            Err(RealtimeError::PermissionDenied(_))
        ));
        assert!(check_permission(&msg, Some("tok")).is_ok());
    }

    #[test]
    fn ungated_topic_needs_no_token() {
        let msg = Message::publish("livestock.updated", json!({}));
        assert!(check_permission(&msg, None).is_ok());
    }

    #[test]
    fn message_without_topic_passes_permission() {
        let msg = Message {
            kind: MessageKind::Ping,
            id: None,
            channel: None,
            topic: None,
            route: None,
            resource: None,
            payload: None,
            timestamp: None,
        };
        assert!(check_permission(&msg, None).is_ok());
    }

    #[test]
    fn sanitize_strips_sensitive_keys_recursively() {
        let mut payload = json!({
            "name": "Barn 7",
            "password": "hunter2",
            "api_token": "abc",
            "nested": { "secretNote": "x", "weight": 412 },
            "list": [ { "ssn": "000-00-0000", "ok": true } ]
        });
        sanitize(&mut payload);
        assert_eq!(
            payload,
            json!({
                "name": "Barn 7",
                "nested": { "weight": 412 },
                "list": [ { "ok": true } ]
            })
        );
    }

    #[test]
    fn sanitize_leaves_scalars_alone() {
        let mut payload = json!("just a string");
        sanitize(&mut payload);
        assert_eq!(payload, json!("just a string"));
    }
}
