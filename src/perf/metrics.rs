//! Transfer counters
//!
//! Single responsibility: Accumulate diagnostic counters for the life of
//! the process and expose them as a read-only snapshot. Counters never
//! influence behavior; they are observability only.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-lifetime transfer counters. Cheap to share; all methods take
/// `&self`.
#[derive(Debug, Default)]
pub struct TransferMetrics {
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
    batches_sent: AtomicU64,
    batch_bytes_saved: AtomicU64,
}

/// Point-in-time view of [`TransferMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub batches_sent: u64,
    pub batch_bytes_saved: u64,
}

impl TransferMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record one batch of `count` messages that went out as a single
    /// `bytes`-long envelope, `saved` bytes smaller than the sum of its
    /// members.
    pub fn record_batch(&self, count: usize, bytes: usize, saved: u64) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.messages_sent.fetch_add(count as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.batch_bytes_saved.fetch_add(saved, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batch_bytes_saved: self.batch_bytes_saved.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter. Only an explicit caller request does this.
    pub fn reset(&self) {
        self.messages_sent.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.messages_received.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.batches_sent.store(0, Ordering::Relaxed);
        self.batch_bytes_saved.store(0, Ordering::Relaxed);
    }
}
