//! Performance Layer
//!
//! This module gathers the throughput concerns of the realtime client.
//!
//! # Architecture
//!
//! | Module     | Responsibility                                     |
//! |------------|----------------------------------------------------|
//! | `batcher`  | Coalesce outgoing messages by size or quiescence   |
//! | `compress` | Reversible payload compression tiers, minification |
//! | `metrics`  | Transfer counters and the diagnostics snapshot     |
//!
//! [`PerformanceLayer`] applies the payload transforms; the batch queue
//! itself is owned by the client because its flush sink writes to the
//! socket. None of this affects correctness, only wire size and call
//! volume.

pub mod batcher;
pub mod compress;
pub mod metrics;

use std::sync::Arc;
use tracing::debug;

use crate::config::RealtimeConfig;
use crate::error::RealtimeError;
use crate::protocol::Message;

use compress::{CompressedPayload, DictionaryCompressor, PayloadCompressor};
use metrics::TransferMetrics;

/// Payload-level transforms: compression and optional key minification.
pub struct PerformanceLayer {
    compressor: Arc<dyn PayloadCompressor>,
    compression_enabled: bool,
    minify_keys: bool,
    metrics: Arc<TransferMetrics>,
}

impl PerformanceLayer {
    /// Build the layer with the preferred compressor tier.
    pub fn new(config: &RealtimeConfig) -> Self {
        #[cfg(feature = "compression")]
        let compressor: Arc<dyn PayloadCompressor> = Arc::new(compress::Lz4Compressor);
        #[cfg(not(feature = "compression"))]
        let compressor: Arc<dyn PayloadCompressor> = Arc::new(DictionaryCompressor);

        Self::with_compressor(config, compressor)
    }

    /// Build the layer with an explicit compressor tier. The dictionary
    /// fallback plugs in here.
    pub fn with_compressor(
        config: &RealtimeConfig,
        compressor: Arc<dyn PayloadCompressor>,
    ) -> Self {
        Self {
            compressor,
            compression_enabled: config.compression_enabled,
            minify_keys: config.minify_keys,
            metrics: Arc::new(TransferMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<TransferMetrics> {
        self.metrics.clone()
    }

    /// Minify keys and compress the payload when enabled and beneficial.
    /// A payload the compressor declines to shrink goes out untouched.
    /// Already-shrunk and already-encrypted payloads pass through, which
    /// makes requeue-after-reconnect safe.
    pub fn shrink_outgoing(&self, mut message: Message) -> Result<Message, RealtimeError> {
        if !message.kind.carries_user_payload() || looks_transformed(message.payload.as_ref()) {
            return Ok(message);
        }
        let Some(mut payload) = message.payload.take() else {
            return Ok(message);
        };

        if self.minify_keys {
            compress::minify_keys(&mut payload);
        }

        if self.compression_enabled {
            let text = serde_json::to_string(&payload)?;
            if let Some(compressed) = self.compressor.compress(&text)? {
                debug!(
                    algorithm = %compressed.algorithm,
                    original_len = compressed.original_len,
                    shrunk_len = compressed.data.len(),
                    "Payload compressed"
                );
                message.payload = Some(serde_json::to_value(compressed)?);
                return Ok(message);
            }
        }

        message.payload = Some(payload);
        Ok(message)
    }

    /// Invert [`PerformanceLayer::shrink_outgoing`] on an inbound message.
    pub fn expand_inbound(&self, mut message: Message) -> Result<Message, RealtimeError> {
        let Some(payload) = message.payload.take() else {
            return Ok(message);
        };

        let mut payload = match as_compressed(&payload) {
            Some(envelope) => {
                let text = self.compressor.decompress(&envelope)?;
                serde_json::from_str(&text)?
            }
            None => payload,
        };

        if self.minify_keys {
            compress::expand_keys(&mut payload);
        }
        message.payload = Some(payload);
        Ok(message)
    }
}

fn looks_transformed(payload: Option<&serde_json::Value>) -> bool {
    let Some(payload) = payload else {
        return false;
    };
    payload.get("compressed").and_then(|v| v.as_bool()) == Some(true)
        || payload.get("encrypted").and_then(|v| v.as_bool()) == Some(true)
}

fn as_compressed(payload: &serde_json::Value) -> Option<CompressedPayload> {
    if payload.get("compressed").and_then(|v| v.as_bool()) != Some(true) {
        return None;
    }
    serde_json::from_value(payload.clone()).ok()
}
