//! Outgoing Batch Queue
//!
//! Single responsibility: Coalesce outgoing messages. A batch flushes when
//! the queue reaches the configured size, or after a quiescence window
//! measured from the first queued message, whichever comes first.
//!
//! The flush sink receives the drained messages in enqueue order and
//! decides the wire shape: the client sends a single message unwrapped and
//! wraps two or more in a batch envelope.
//!
//! The window timer is armed by the first enqueue only; later enqueues do
//! not push it back. `shutdown()` cancels any armed timer, so nothing
//! fires after disconnect.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::protocol::Message;

pub type FlushSink = Arc<dyn Fn(Vec<Message>) + Send + Sync>;

/// Reported network conditions used to size batches.
///
/// Mirrors what a connectivity probe reports: link class plus measured
/// downlink bandwidth.
#[derive(Debug, Clone)]
pub struct NetworkQuality {
    pub effective_type: String,
    pub downlink_mbps: f64,
}

impl NetworkQuality {
    /// Map reported conditions to a batch size inside `[min, max]`.
    /// Slow links get big batches (fewer round trips); fast links flush
    /// small batches for latency.
    pub fn suggested_batch_size(&self, min: usize, max: usize) -> usize {
        let size = match self.effective_type.as_str() {
            "slow-2g" | "2g" => max,
            "3g" => max.saturating_add(min) / 2,
            _ if self.downlink_mbps >= 10.0 => min,
            _ if self.downlink_mbps >= 2.0 => min.saturating_mul(2),
            _ => max.saturating_add(min) / 2,
        };
        size.clamp(min, max)
    }
}

struct BatchQueue {
    messages: Vec<Message>,
    timer: Option<CancellationToken>,
}

/// The outgoing message queue.
pub struct Batcher {
    queue: Mutex<BatchQueue>,
    batch_size: AtomicUsize,
    min: usize,
    max: usize,
    window: Duration,
    sink: FlushSink,
}

impl Batcher {
    pub fn new(min: usize, max: usize, window: Duration, sink: FlushSink) -> Arc<Self> {
        let min = min.max(1);
        let max = max.max(min);
        Arc::new(Self {
            queue: Mutex::new(BatchQueue {
                messages: Vec::new(),
                timer: None,
            }),
            batch_size: AtomicUsize::new(max.saturating_add(min) / 2),
            min,
            max,
            window,
            sink,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::Relaxed)
    }

    /// Adopt a batch size from reported network conditions, clamped to
    /// the configured bounds.
    pub fn adjust_for(&self, quality: &NetworkQuality) {
        let size = quality.suggested_batch_size(self.min, self.max);
        debug!(
            effective_type = %quality.effective_type,
            downlink_mbps = quality.downlink_mbps,
            batch_size = size,
            "Batch size adjusted"
        );
        self.batch_size.store(size, Ordering::Relaxed);
    }

    /// Queue a message. Flushes immediately at the size threshold,
    /// otherwise arms the quiescence timer on the first message.
    pub fn enqueue(self: &Arc<Self>, message: Message) {
        let flush_now = {
            let mut queue = self.queue.lock().expect("batch queue poisoned");
            queue.messages.push(message);

            if queue.messages.len() >= self.batch_size() {
                true
            } else {
                if queue.timer.is_none() {
                    let token = CancellationToken::new();
                    queue.timer = Some(token.clone());
                    let batcher = Arc::downgrade(self);
                    let window = self.window;
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = token.cancelled() => {}
                            _ = tokio::time::sleep(window) => {
                                if let Some(batcher) = batcher.upgrade() {
                                    batcher.flush();
                                }
                            }
                        }
                    });
                }
                false
            }
        };

        if flush_now {
            self.flush();
        }
    }

    /// Drain the queue into the sink. No-op when empty.
    pub fn flush(&self) {
        let drained = {
            let mut queue = self.queue.lock().expect("batch queue poisoned");
            if let Some(timer) = queue.timer.take() {
                timer.cancel();
            }
            std::mem::take(&mut queue.messages)
        };
        if drained.is_empty() {
            return;
        }
        debug!(count = drained.len(), "Flushing batch queue");
        (self.sink)(drained);
    }

    /// Cancel any armed timer and drop queued messages back to the
    /// caller. Used on disconnect, where the client moves them to its
    /// pending queue instead of flushing to a dead socket.
    pub fn shutdown(&self) -> Vec<Message> {
        let mut queue = self.queue.lock().expect("batch queue poisoned");
        if let Some(timer) = queue.timer.take() {
            timer.cancel();
        }
        std::mem::take(&mut queue.messages)
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().expect("batch queue poisoned").messages.len()
    }
}
