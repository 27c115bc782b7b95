//! Payload Encryption
//!
//! Single responsibility: Encrypt and decrypt message payloads with a
//! per-session symmetric key.
//!
//! # Two Tiers
//!
//! The preferred tier is AES-256-GCM. The portable fallback is a SHA-256
//! keystream XOR with an appended integrity tag. Both present the same
//! round-trip contract through [`PayloadCipher`]: decrypting with the
//! wrong key or a corrupted IV fails with a typed error, never returns
//! plausible-looking garbage.
//!
//! The fallback tier exists for constrained builds and offers weak
//! confidentiality. The tag is there so wrong-key decryption fails loudly.
//!
//! # Session Keys
//!
//! Keys are generated once per session id and cached. Concurrent first
//! access goes through the cache entry, so two callers racing on the same
//! session always observe one key.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::error::RealtimeError;

pub const KEY_LEN: usize = 32;

/// The encrypted form a payload takes on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub encrypted: bool,
    pub algorithm: String,
    /// Ciphertext, base64.
    pub data: String,
    /// Nonce/IV, base64.
    pub iv: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// A symmetric payload cipher. Implementations must uphold the round-trip
/// contract: `decrypt(encrypt(p)) == p`, and decryption under a wrong key
/// or corrupted IV returns `Err`, never wrong bytes.
pub trait PayloadCipher: Send + Sync {
    fn algorithm(&self) -> &'static str;

    /// Encrypt `plaintext`, returning base64 `(data, iv)`.
    fn encrypt(&self, key: &[u8; KEY_LEN], plaintext: &[u8])
        -> Result<(String, String), RealtimeError>;

    /// Invert [`PayloadCipher::encrypt`].
    fn decrypt(&self, key: &[u8; KEY_LEN], data: &str, iv: &str)
        -> Result<Vec<u8>, RealtimeError>;
}

/// AES-256-GCM, the preferred tier. The GCM tag makes tampering and
/// wrong-key decryption fail at the AEAD layer.
pub struct AesGcmCipher;

impl PayloadCipher for AesGcmCipher {
    fn algorithm(&self) -> &'static str {
        "aes-256-gcm"
    }

    fn encrypt(
        &self,
        key: &[u8; KEY_LEN],
        plaintext: &[u8],
    ) -> Result<(String, String), RealtimeError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| RealtimeError::Security(format!("bad key: {}", e)))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| RealtimeError::Security(format!("encryption failed: {}", e)))?;
        Ok((BASE64.encode(ciphertext), BASE64.encode(nonce)))
    }

    fn decrypt(
        &self,
        key: &[u8; KEY_LEN],
        data: &str,
        iv: &str,
    ) -> Result<Vec<u8>, RealtimeError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| RealtimeError::Security(format!("bad key: {}", e)))?;
        let ciphertext = BASE64
            .decode(data)
            .map_err(|e| RealtimeError::Decrypt(format!("bad ciphertext encoding: {}", e)))?;
        let iv_bytes = BASE64
            .decode(iv)
            .map_err(|e| RealtimeError::Decrypt(format!("bad IV encoding: {}", e)))?;
        if iv_bytes.len() != 12 {
            return Err(RealtimeError::Decrypt(format!(
                "IV must be 12 bytes, got {}",
                iv_bytes.len()
            )));
        }
        let nonce = Nonce::from_slice(&iv_bytes);
        cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| RealtimeError::Decrypt("authentication tag mismatch".into()))
    }
}

/// Portable fallback tier: SHA-256 keystream XOR plus an appended tag.
///
/// Weak confidentiality. The tag is `SHA-256(key || iv || plaintext)` and
/// exists so decryption under a wrong key fails loudly instead of handing
/// back scrambled bytes.
pub struct XorStreamCipher;

const TAG_LEN: usize = 32;
const XOR_IV_LEN: usize = 16;

impl XorStreamCipher {
    fn keystream_block(key: &[u8], iv: &[u8], counter: u64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(iv);
        hasher.update(counter.to_be_bytes());
        hasher.finalize().into()
    }

    fn apply_keystream(key: &[u8], iv: &[u8], data: &mut [u8]) {
        for (block_index, chunk) in data.chunks_mut(32).enumerate() {
            let block = Self::keystream_block(key, iv, block_index as u64);
            for (byte, pad) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= pad;
            }
        }
    }

    fn tag(key: &[u8], iv: &[u8], plaintext: &[u8]) -> [u8; TAG_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(iv);
        hasher.update(plaintext);
        hasher.finalize().into()
    }
}

impl PayloadCipher for XorStreamCipher {
    fn algorithm(&self) -> &'static str {
        "xor-sha256"
    }

    fn encrypt(
        &self,
        key: &[u8; KEY_LEN],
        plaintext: &[u8],
    ) -> Result<(String, String), RealtimeError> {
        let mut iv = [0u8; XOR_IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut body = plaintext.to_vec();
        Self::apply_keystream(key, &iv, &mut body);
        body.extend_from_slice(&Self::tag(key, &iv, plaintext));

        Ok((BASE64.encode(body), BASE64.encode(iv)))
    }

    fn decrypt(
        &self,
        key: &[u8; KEY_LEN],
        data: &str,
        iv: &str,
    ) -> Result<Vec<u8>, RealtimeError> {
        let body = BASE64
            .decode(data)
            .map_err(|e| RealtimeError::Decrypt(format!("bad ciphertext encoding: {}", e)))?;
        let iv_bytes = BASE64
            .decode(iv)
            .map_err(|e| RealtimeError::Decrypt(format!("bad IV encoding: {}", e)))?;
        if body.len() < TAG_LEN {
            return Err(RealtimeError::Decrypt("ciphertext shorter than tag".into()));
        }

        let (ciphertext, presented_tag) = body.split_at(body.len() - TAG_LEN);
        let mut plaintext = ciphertext.to_vec();
        Self::apply_keystream(key, &iv_bytes, &mut plaintext);

        let expected = Self::tag(key, &iv_bytes, &plaintext);
        let matches: bool = expected.ct_eq(presented_tag).into();
        if !matches {
            return Err(RealtimeError::Decrypt("integrity tag mismatch".into()));
        }
        Ok(plaintext)
    }
}

/// Per-session key cache.
///
/// `key_for` is the only way in, and it creates the key inside the map
/// entry, so a concurrent first access for one session id cannot produce
/// two different keys.
#[derive(Default)]
pub struct SessionKeyCache {
    keys: DashMap<String, Arc<[u8; KEY_LEN]>>,
}

impl SessionKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_for(&self, session_id: &str) -> Arc<[u8; KEY_LEN]> {
        self.keys
            .entry(session_id.to_string())
            .or_insert_with(|| {
                let mut key = [0u8; KEY_LEN];
                rand::thread_rng().fill_bytes(&mut key);
                Arc::new(key)
            })
            .clone()
    }

    pub fn forget(&self, session_id: &str) {
        self.keys.remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fill: u8) -> [u8; KEY_LEN] {
        [fill; KEY_LEN]
    }

    fn round_trip(cipher: &dyn PayloadCipher) {
        let payload = br#"{"topic":"livestock.weighed","weight_kg":412.5}"#;
        let (data, iv) = cipher.encrypt(&key(7), payload).unwrap();
        let back = cipher.decrypt(&key(7), &data, &iv).unwrap();
        assert_eq!(back, payload);
    }

    fn wrong_key_fails(cipher: &dyn PayloadCipher) {
        let (data, iv) = cipher.encrypt(&key(7), b"confidential").unwrap();
        let err = cipher.decrypt(&key(8), &data, &iv).unwrap_err();
        assert!(matches!(err, RealtimeError::Decrypt(_)));
    }

    fn corrupted_iv_fails(cipher: &dyn PayloadCipher) {
        let (data, _) = cipher.encrypt(&key(7), b"confidential").unwrap();
        let bogus_iv = BASE64.encode([0u8; 12]);
        assert!(cipher.decrypt(&key(7), &data, &bogus_iv).is_err());
    }

    #[test]
    fn aes_gcm_round_trip() {
        round_trip(&AesGcmCipher);
    }

    #[test]
    fn aes_gcm_wrong_key_is_loud() {
        wrong_key_fails(&AesGcmCipher);
        corrupted_iv_fails(&AesGcmCipher);
    }

    #[test]
    fn xor_fallback_round_trip() {
        // Weak tier: same round-trip contract, no claim of resisting a
        // motivated adversary.
        round_trip(&XorStreamCipher);
    }

    #[test]
    fn xor_fallback_wrong_key_is_loud() {
        wrong_key_fails(&XorStreamCipher);
    }

    #[test]
    fn xor_fallback_rejects_truncated_ciphertext() {
        let short = BASE64.encode([1u8; 8]);
        let iv = BASE64.encode([0u8; XOR_IV_LEN]);
        let err = XorStreamCipher.decrypt(&key(1), &short, &iv).unwrap_err();
        assert!(matches!(err, RealtimeError::Decrypt(_)));
    }

    #[test]
    fn session_key_is_stable_per_session() {
        let cache = SessionKeyCache::new();
        let a = cache.key_for("session-1");
        let b = cache.key_for("session-1");
        let c = cache.key_for("session-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn concurrent_first_access_yields_one_key() {
        let cache = Arc::new(SessionKeyCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.key_for("shared"))
            })
            .collect();
        let keys: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.len(), 1);
    }
}
