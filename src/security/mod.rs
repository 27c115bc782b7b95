//! Security Layer
//!
//! This module gathers every security concern of the realtime client.
//!
//! # Architecture
//!
//! Organized by concern, each submodule with a single responsibility:
//!
//! | Module    | Responsibility                                      |
//! |-----------|-----------------------------------------------------|
//! | `signer`  | Signed connection URLs, client identity             |
//! | `cipher`  | Payload encryption tiers and the session key cache  |
//! | `guard`   | Freshness, permission, and sanitization checks      |
//! | `refresh` | Periodic access-token renewal                       |
//!
//! [`SecurityLayer`] composes them into the operations the client calls
//! on the hot path: `sanitize_outgoing` before any other outbound
//! transform, `encrypt_outgoing` after compression, and `screen_inbound`
//! on everything read off the socket.

pub mod cipher;
pub mod guard;
pub mod refresh;
pub mod signer;

use chrono::Utc;
use std::sync::{Arc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::config::RealtimeConfig;
use crate::error::RealtimeError;
use crate::protocol::Message;

use cipher::{AesGcmCipher, EncryptedPayload, PayloadCipher, SessionKeyCache};
use signer::UrlSigner;

/// Composition of the security submodules around one session.
pub struct SecurityLayer {
    signer: UrlSigner,
    cipher: Arc<dyn PayloadCipher>,
    keys: SessionKeyCache,
    session_id: String,
    token: RwLock<Option<String>>,
    encryption_enabled: bool,
    freshness_window: chrono::Duration,
    clock_skew: chrono::Duration,
}

impl SecurityLayer {
    /// Build the layer with the preferred cipher tier.
    pub fn new(config: &RealtimeConfig) -> Self {
        Self::with_cipher(config, Arc::new(AesGcmCipher))
    }

    /// Build the layer with an explicit cipher tier. The portable
    /// fallback tier plugs in here.
    pub fn with_cipher(config: &RealtimeConfig, cipher: Arc<dyn PayloadCipher>) -> Self {
        Self {
            signer: UrlSigner::new(config.version.clone(), config.signing_secret.clone()),
            cipher,
            keys: SessionKeyCache::new(),
            session_id: Uuid::new_v4().to_string(),
            token: RwLock::new(config.token.clone()),
            encryption_enabled: config.encryption_enabled,
            freshness_window: chrono::Duration::milliseconds(config.freshness_window_ms as i64),
            clock_skew: chrono::Duration::milliseconds(config.clock_skew_ms as i64),
        }
    }

    pub fn client_id(&self) -> &str {
        self.signer.client_id()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().expect("token lock poisoned").clone()
    }

    /// Install a new access token (from config or a refresh tick).
    pub fn set_token(&self, token: String) {
        *self.token.write().expect("token lock poisoned") = Some(token);
    }

    /// The signed URL for the next connection attempt.
    pub fn connection_url(
        &self,
        base: &str,
        extra: &[(String, String)],
    ) -> Result<String, RealtimeError> {
        let token = self.token();
        self.signer.signed_url(base, token.as_deref(), extra)
    }

    /// Strip sensitive fields from the payload. Runs before any other
    /// outbound transform so secrets never reach the wire in any form.
    pub fn sanitize_outgoing(&self, message: &mut Message) {
        if let Some(payload) = message.payload.as_mut() {
            guard::sanitize(payload);
        }
    }

    /// Encrypt the payload when encryption is on and the kind carries
    /// user data. Control frames stay clear so the server can act on them
    /// before any session key exchange. Already-encrypted payloads pass
    /// through, which makes requeue-after-reconnect safe.
    pub fn encrypt_outgoing(&self, mut message: Message) -> Result<Message, RealtimeError> {
        if self.encryption_enabled
            && message.kind.carries_user_payload()
            && !looks_encrypted(message.payload.as_ref())
        {
            if let Some(payload) = message.payload.take() {
                let plaintext = serde_json::to_vec(&payload)?;
                let key = self.keys.key_for(&self.session_id);
                let (data, iv) = self.cipher.encrypt(&key, &plaintext)?;
                message.payload = Some(serde_json::to_value(EncryptedPayload {
                    encrypted: true,
                    algorithm: self.cipher.algorithm().to_string(),
                    data,
                    iv,
                    timestamp: Utc::now(),
                })?);
                debug!(kind = ?message.kind, "Payload encrypted");
            }
        }

        Ok(message)
    }

    /// Decrypt an encrypted payload, then run the freshness and permission
    /// guards. Errors mean "drop and report", never "crash".
    pub fn screen_inbound(&self, mut message: Message) -> Result<Message, RealtimeError> {
        if let Some(envelope) = message.payload.as_ref().and_then(as_encrypted) {
            let key = self.keys.key_for(&self.session_id);
            let plaintext = self.cipher.decrypt(&key, &envelope.data, &envelope.iv)?;
            message.payload = Some(serde_json::from_slice(&plaintext)?);
            debug!(kind = ?message.kind, "Payload decrypted");
        }

        guard::check_freshness(&message, self.freshness_window, self.clock_skew)?;
        guard::check_permission(&message, self.token().as_deref())?;
        Ok(message)
    }

    /// Drop the session key, forcing a fresh one on next use.
    pub fn rotate_session_key(&self) {
        self.keys.forget(&self.session_id);
    }
}

fn looks_encrypted(payload: Option<&serde_json::Value>) -> bool {
    payload
        .and_then(|p| p.get("encrypted"))
        .and_then(|v| v.as_bool())
        == Some(true)
}

fn as_encrypted(payload: &serde_json::Value) -> Option<EncryptedPayload> {
    if payload.get("encrypted").and_then(|v| v.as_bool()) != Some(true) {
        return None;
    }
    serde_json::from_value(payload.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encrypting_config() -> RealtimeConfig {
        let mut config = RealtimeConfig::default();
        config.encryption_enabled = true;
        config.token = Some("tok".into());
        config
    }

    fn send_through(layer: &SecurityLayer, mut message: Message) -> Message {
        layer.sanitize_outgoing(&mut message);
        layer.encrypt_outgoing(message).unwrap()
    }

    #[test]
    fn round_trip_through_encrypt_and_screen() {
        let layer = SecurityLayer::new(&encrypting_config());
        let original = Message::publish("livestock.weighed", json!({"weight_kg": 412.5}));

        let sent = send_through(&layer, original.clone());
        assert_eq!(sent.payload.as_ref().unwrap()["encrypted"], json!(true));
        assert_eq!(
            sent.payload.as_ref().unwrap()["algorithm"],
            json!("aes-256-gcm")
        );

        let received = layer.screen_inbound(sent).unwrap();
        assert_eq!(received.payload, original.payload);
    }

    #[test]
    fn control_frames_stay_clear() {
        let layer = SecurityLayer::new(&encrypting_config());
        let announce = Message::route_subscription("/unit/kandang", &["livestock.updated"]);
        let sent = send_through(&layer, announce);
        assert!(sent.payload.as_ref().unwrap().get("encrypted").is_none());
        assert!(sent.payload.as_ref().unwrap().get("topics").is_some());
    }

    #[test]
    fn already_encrypted_payload_passes_through() {
        let layer = SecurityLayer::new(&encrypting_config());
        let first = send_through(&layer, Message::publish("sale.created", json!({"total": 1})));
        let again = layer.encrypt_outgoing(first.clone()).unwrap();
        assert_eq!(again.payload, first.payload);
    }

    #[test]
    fn encryption_off_leaves_payload_clear() {
        let layer = SecurityLayer::new(&RealtimeConfig::default());
        let msg = Message::publish("sale.created", json!({"total": 100}));
        let sent = send_through(&layer, msg);
        assert_eq!(sent.payload, Some(json!({"total": 100})));
    }

    #[test]
    fn outgoing_payloads_are_sanitized_even_without_encryption() {
        let layer = SecurityLayer::new(&RealtimeConfig::default());
        let msg = Message::publish("sale.created", json!({"total": 100, "password": "x"}));
        let sent = send_through(&layer, msg);
        assert_eq!(sent.payload, Some(json!({"total": 100})));
    }

    #[test]
    fn wrong_session_key_fails_loudly() {
        let config = encrypting_config();
        let sender = SecurityLayer::new(&config);
        let receiver = SecurityLayer::new(&config);

        let sent = send_through(&sender, Message::publish("sale.created", json!({"total": 1})));
        // Different SecurityLayer, different session key.
        let err = receiver.screen_inbound(sent).unwrap_err();
        assert!(matches!(err, RealtimeError::Decrypt(_)));
    }

    #[test]
    fn screen_applies_freshness_guard() {
        let layer = SecurityLayer::new(&RealtimeConfig::default());
        let mut msg = Message::publish("sale.created", json!({}));
        msg.timestamp = Some(Utc::now() - chrono::Duration::minutes(10));
        assert!(matches!(
            layer.screen_inbound(msg),
            Err(RealtimeError::StaleMessage { .. })
        ));
    }

    #[test]
    fn token_updates_are_visible() {
        let layer = SecurityLayer::new(&RealtimeConfig::default());
        assert!(layer.token().is_none());
        layer.set_token("fresh".into());
        assert_eq!(layer.token().as_deref(), Some("fresh"));
    }
}
