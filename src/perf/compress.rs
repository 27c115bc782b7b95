//! Payload Compression
//!
//! Single responsibility: Shrink payload text on the wire, reversibly.
//!
//! # Two Tiers
//!
//! The preferred tier is LZ4 block compression (behind the `compression`
//! feature, on by default). The portable fallback substitutes common wire
//! substrings with short tokens. Both tiers satisfy the same contract:
//! `decompress(compress(p)) == p` byte for byte, and `compress` returns
//! `None` when the transform would not pay for itself.
//!
//! The fallback's ratio is marginal on real payloads; it only fires when
//! it clears a minimum shrink margin.
//!
//! Key minification (`timestamp` -> `ts` and friends) is a separate,
//! optional transform. It is a pure inverse pair and never load-bearing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RealtimeError;

/// The compressed form a payload takes on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedPayload {
    pub compressed: bool,
    pub algorithm: String,
    /// Length of the original text, bytes.
    pub original_len: usize,
    /// Transformed text. Base64 for the LZ4 tier, token text for the
    /// dictionary tier.
    pub data: String,
}

/// A reversible payload text compressor.
pub trait PayloadCompressor: Send + Sync {
    fn algorithm(&self) -> &'static str;

    /// Compress `text`, or return `None` when not beneficial.
    fn compress(&self, text: &str) -> Result<Option<CompressedPayload>, RealtimeError>;

    /// Invert [`PayloadCompressor::compress`].
    fn decompress(&self, payload: &CompressedPayload) -> Result<String, RealtimeError>;
}

/// LZ4 block tier.
#[cfg(feature = "compression")]
pub struct Lz4Compressor;

#[cfg(feature = "compression")]
impl PayloadCompressor for Lz4Compressor {
    fn algorithm(&self) -> &'static str {
        "lz4"
    }

    fn compress(&self, text: &str) -> Result<Option<CompressedPayload>, RealtimeError> {
        let compressed = lz4_flex::compress_prepend_size(text.as_bytes());
        let encoded = BASE64.encode(&compressed);
        if encoded.len() >= text.len() {
            return Ok(None);
        }
        Ok(Some(CompressedPayload {
            compressed: true,
            algorithm: self.algorithm().to_string(),
            original_len: text.len(),
            data: encoded,
        }))
    }

    fn decompress(&self, payload: &CompressedPayload) -> Result<String, RealtimeError> {
        let raw = BASE64
            .decode(&payload.data)
            .map_err(|e| RealtimeError::Compression(format!("bad encoding: {}", e)))?;
        let bytes = lz4_flex::decompress_size_prepended(&raw)
            .map_err(|e| RealtimeError::Compression(format!("decompress failed: {}", e)))?;
        if bytes.len() != payload.original_len {
            return Err(RealtimeError::Compression(format!(
                "length mismatch: expected {}, got {}",
                payload.original_len,
                bytes.len()
            )));
        }
        String::from_utf8(bytes)
            .map_err(|e| RealtimeError::Compression(format!("not UTF-8: {}", e)))
    }
}

/// Substrings the dictionary tier abbreviates. Codes are `~` plus one
/// letter; a literal `~` escapes to `~~`.
const DICTIONARY: &[(&str, &str)] = &[
    ("\"timestamp\":", "~t"),
    ("\"payload\":", "~p"),
    ("\"channel\":", "~c"),
    ("\"topic\":", "~o"),
    ("\"type\":", "~y"),
    ("\"resource\":", "~s"),
    ("\"route\":", "~r"),
    ("livestock.", "~l"),
    ("purchase.", "~u"),
    ("finance.", "~f"),
    ("system.", "~m"),
];

const ESCAPE: char = '~';

/// Minimum shrink for the dictionary tier to be considered worth it,
/// in percent of the original length.
const MIN_SHRINK_PERCENT: usize = 10;

/// Token-substitution fallback tier.
pub struct DictionaryCompressor;

impl PayloadCompressor for DictionaryCompressor {
    fn algorithm(&self) -> &'static str {
        "dict"
    }

    fn compress(&self, text: &str) -> Result<Option<CompressedPayload>, RealtimeError> {
        let mut out = text.replace(ESCAPE, "~~");
        for (pattern, code) in DICTIONARY {
            out = out.replace(pattern, code);
        }

        if out.len().saturating_mul(100) > text.len().saturating_mul(100 - MIN_SHRINK_PERCENT) {
            return Ok(None);
        }
        Ok(Some(CompressedPayload {
            compressed: true,
            algorithm: self.algorithm().to_string(),
            original_len: text.len(),
            data: out,
        }))
    }

    fn decompress(&self, payload: &CompressedPayload) -> Result<String, RealtimeError> {
        let mut out = String::with_capacity(payload.original_len);
        let mut chars = payload.data.chars();
        while let Some(ch) = chars.next() {
            if ch != ESCAPE {
                out.push(ch);
                continue;
            }
            let Some(code) = chars.next() else {
                return Err(RealtimeError::Compression("dangling escape".into()));
            };
            if code == ESCAPE {
                out.push(ESCAPE);
                continue;
            }
            let token = ['~', code].iter().collect::<String>();
            let Some((pattern, _)) = DICTIONARY.iter().find(|(_, c)| *c == token) else {
                return Err(RealtimeError::Compression(format!(
                    "unknown token '{}'",
                    token
                )));
            };
            out.push_str(pattern);
        }

        if out.len() != payload.original_len {
            return Err(RealtimeError::Compression(format!(
                "length mismatch: expected {}, got {}",
                payload.original_len,
                out.len()
            )));
        }
        Ok(out)
    }
}

/// Known long key -> short key pairs for minification.
const KEY_MAP: &[(&str, &str)] = &[
    ("timestamp", "ts"),
    ("payload", "p"),
    ("channel", "c"),
    ("topic", "t"),
    ("route", "r"),
    ("resource", "rs"),
];

/// Rename known keys to their short forms, recursively. Unknown keys pass
/// through untouched.
pub fn minify_keys(value: &mut Value) {
    rename_keys(value, |key| {
        KEY_MAP
            .iter()
            .find(|(long, _)| *long == key)
            .map(|(_, short)| short.to_string())
    });
}

/// Exact inverse of [`minify_keys`].
pub fn expand_keys(value: &mut Value) {
    rename_keys(value, |key| {
        KEY_MAP
            .iter()
            .find(|(_, short)| *short == key)
            .map(|(long, _)| long.to_string())
    });
}

fn rename_keys(value: &mut Value, rename: impl Fn(&str) -> Option<String> + Copy) {
    match value {
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(new_key) = rename(&key) {
                    if let Some(inner) = map.remove(&key) {
                        map.insert(new_key, inner);
                    }
                }
            }
            for nested in map.values_mut() {
                rename_keys(nested, rename);
            }
        }
        Value::Array(items) => {
            for item in items {
                rename_keys(item, rename);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repetitive_text() -> String {
        let mut text = String::new();
        for i in 0..40 {
            text.push_str(&format!(
                "{{\"topic\":\"livestock.updated\",\"payload\":{{\"id\":{}}},\"timestamp\":1722945600000}}",
                i
            ));
        }
        text
    }

    #[cfg(feature = "compression")]
    #[test]
    fn lz4_round_trip() {
        let text = repetitive_text();
        let payload = Lz4Compressor.compress(&text).unwrap().unwrap();
        assert_eq!(payload.algorithm, "lz4");
        assert_eq!(payload.original_len, text.len());
        assert_eq!(Lz4Compressor.decompress(&payload).unwrap(), text);
    }

    #[cfg(feature = "compression")]
    #[test]
    fn lz4_skips_incompressible_input() {
        // Short high-entropy input grows under base64; must be skipped.
        assert!(Lz4Compressor.compress("q9#xZ!").unwrap().is_none());
    }

    #[test]
    fn dictionary_round_trip() {
        let text = repetitive_text();
        let payload = DictionaryCompressor.compress(&text).unwrap().unwrap();
        assert!(payload.data.len() < text.len());
        assert_eq!(DictionaryCompressor.decompress(&payload).unwrap(), text);
    }

    #[test]
    fn dictionary_escapes_literal_tilde() {
        let text =
            "{\"topic\":\"livestock.updated\",\"payload\":\"~approx\",\"timestamp\":1,\"topic\":\"livestock.moved\"}"
                .repeat(8);
        let payload = DictionaryCompressor.compress(&text).unwrap().unwrap();
        assert_eq!(DictionaryCompressor.decompress(&payload).unwrap(), text);
    }

    #[test]
    fn dictionary_respects_minimum_margin() {
        // Nothing from the dictionary appears; no shrink, no transform.
        assert!(DictionaryCompressor
            .compress("plain text without wire vocabulary")
            .unwrap()
            .is_none());
    }

    #[test]
    fn dictionary_rejects_unknown_token() {
        let payload = CompressedPayload {
            compressed: true,
            algorithm: "dict".into(),
            original_len: 4,
            data: "~zzz".into(),
        };
        assert!(matches!(
            DictionaryCompressor.decompress(&payload),
            Err(RealtimeError::Compression(_))
        ));
    }

    #[test]
    fn key_minify_expand_inverse() {
        let original = json!({
            "timestamp": 1722945600000u64,
            "payload": { "topic": "livestock.updated", "weight": 412 },
            "other": [ { "route": "/unit/kandang" } ]
        });
        let mut value = original.clone();
        minify_keys(&mut value);
        assert!(value.get("ts").is_some());
        assert!(value.get("timestamp").is_none());
        assert!(value["p"].get("t").is_some());

        expand_keys(&mut value);
        assert_eq!(value, original);
    }
}
