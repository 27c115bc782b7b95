//! Heartbeat ping/ack liveness monitoring.
//!
//! Single responsibility: Detect a silently-dead socket. Every interval a
//! ping goes out and a watchdog waits for the ack flag, which the read
//! loop sets on any pong/heartbeat/ack frame. A missed ack means the
//! socket is dead even if the OS has not noticed yet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No ack arrived within the timeout window after a ping.
    TimedOut,
    /// The heartbeat was cancelled externally (clean disconnect).
    Cancelled,
}

pub type PingSender = Arc<dyn Fn() + Send + Sync>;

/// Run heartbeat pings until the link dies or the token cancels.
///
/// At each `interval` tick the ack flag is cleared and a ping is sent via
/// `send_ping`; after `timeout` the flag is checked. The read loop sets
/// the flag when any heartbeat-ack kind arrives.
pub async fn run_heartbeat(
    send_ping: PingSender,
    ack_flag: Arc<AtomicBool>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
    // The first tick completes immediately; the link was just opened, so
    // skip straight to the first full interval.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
            _ = ticker.tick() => {}
        }

        ack_flag.store(false, Ordering::SeqCst);
        send_ping();

        tokio::select! {
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
            () = time::sleep(timeout) => {
                if !ack_flag.load(Ordering::SeqCst) {
                    warn!(timeout_ms = timeout.as_millis() as u64, "Heartbeat ack missed");
                    return HeartbeatResult::TimedOut;
                }
            }
        }
    }
}
