//! Realtime Client
//!
//! This module is the connection manager: the one logical connection, the
//! supervisor that keeps it alive, and the dispatch of everything that
//! crosses it.
//!
//! # Architecture
//!
//! | Module      | Responsibility                                       |
//! |-------------|------------------------------------------------------|
//! | `transport` | Raw WebSocket connect and text-frame I/O             |
//! | `state`     | Lifecycle states and the reconnect backoff schedule  |
//! | `registry`  | Channel handlers and route topic sets                |
//! | `heartbeat` | Ping/ack liveness watchdog                           |
//! | `events`    | Connect/disconnect/error/message observer lists      |
//!
//! [`RealtimeClient`] is a cheap cloneable handle over the shared state.
//! `connect()` spawns a supervisor task that owns the whole lifecycle:
//! each attempt signs a fresh URL, opens the socket, replays the
//! subscription announcements, flushes queued messages, and runs the
//! session until the socket dies or `disconnect()` cancels it. Unclean
//! session ends re-enter the backoff schedule; `disconnect()` and an
//! exhausted schedule end the supervisor.
//!
//! # Outbound order
//!
//! Every queued message passes sanitize, then shrink, then encrypt, in
//! that order. Sanitize first so secrets never reach the wire in any
//! form; shrink before encrypt because ciphertext does not compress.
//! Each transform skips payloads it has already produced, so a message
//! pulled back from a dead socket can safely pass through again.

pub mod events;
pub mod heartbeat;
pub mod registry;
pub mod state;
pub mod transport;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RealtimeConfig;
use crate::error::RealtimeError;
use crate::perf::batcher::{Batcher, FlushSink, NetworkQuality};
use crate::perf::metrics::{MetricsSnapshot, TransferMetrics};
use crate::perf::PerformanceLayer;
use crate::protocol::{decode_frame, routes, BatchEnvelope, Message, MessageKind, WireFrame};
use crate::security::refresh::{FailureSink, TokenRefresher, TokenSink};
use crate::security::SecurityLayer;

use events::{
    ConnectCallback, DisconnectCallback, ErrorCallback, EventCallbacks, GlobalMessageCallback,
};
use heartbeat::{run_heartbeat, HeartbeatResult, PingSender};
use registry::{MessageHandler, SubscriptionRegistry};
use state::{Backoff, ConnectionState};
use transport::Transport;

/// Diagnostic view of the connection, for dashboards and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub connected: bool,
    pub connecting: bool,
    pub reconnect_attempts: u32,
    pub channels: usize,
    pub routes: usize,
    pub queued_messages: usize,
}

/// Why a session ended. Only an explicit cancel counts as clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    HeartbeatTimeout,
    ConnectionClosed,
    TransportError,
}

impl SessionEnd {
    fn is_clean(self) -> bool {
        self == SessionEnd::Cancelled
    }

    fn reason(self) -> &'static str {
        match self {
            SessionEnd::Cancelled => "client disconnect",
            SessionEnd::HeartbeatTimeout => "heartbeat timeout",
            SessionEnd::ConnectionClosed => "connection closed",
            SessionEnd::TransportError => "transport error",
        }
    }
}

struct ClientShared {
    config: RealtimeConfig,
    security: SecurityLayer,
    perf: PerformanceLayer,
    metrics: Arc<TransferMetrics>,
    batcher: Arc<Batcher>,
    registry: SubscriptionRegistry,
    events: EventCallbacks,
    state: Mutex<ConnectionState>,
    reconnect_attempts: AtomicU32,
    pending: Mutex<VecDeque<Message>>,
    writer_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    ack_flag: Arc<AtomicBool>,
    intentional_shutdown: AtomicBool,
    session_cancel: Mutex<CancellationToken>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ClientShared {
    fn state(&self) -> ConnectionState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("state lock poisoned") = state;
        debug!(state = ?state, "Connection state changed");
    }

    /// Sanitize, shrink, encrypt. The one place the outbound order lives.
    fn prepare_for_wire(&self, mut message: Message) -> Result<Message, RealtimeError> {
        self.security.sanitize_outgoing(&mut message);
        let message = self.perf.shrink_outgoing(message)?;
        self.security.encrypt_outgoing(message)
    }

    fn write_raw(&self, text: String) -> bool {
        let guard = self.writer_tx.lock().expect("writer lock poisoned");
        match guard.as_ref() {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }

    /// Serialize and hand a message to the writer task. On a dead writer
    /// a user message returns to the front of the pending queue; control
    /// frames are dropped, announcements replay on the next open anyway.
    fn write_message(&self, message: Message) -> bool {
        let text = match message.to_wire() {
            Ok(text) => text,
            Err(e) => {
                self.events.emit_error(&e);
                return false;
            }
        };
        let len = text.len();
        if self.write_raw(text) {
            self.metrics.record_sent(len);
            true
        } else {
            if message.kind.carries_user_payload() {
                self.pending
                    .lock()
                    .expect("pending queue poisoned")
                    .push_front(message);
            }
            false
        }
    }

    /// The batch queue sink. Singletons go out unwrapped; two or more ride
    /// one envelope. A batch caught by a dying socket returns to pending.
    fn ship_batch(&self, mut batch: Vec<Message>) {
        if !self.state().is_open() {
            let mut pending = self.pending.lock().expect("pending queue poisoned");
            for message in batch.into_iter().rev() {
                pending.push_front(message);
            }
            return;
        }

        if batch.len() == 1 {
            self.write_message(batch.remove(0));
            return;
        }

        let individual: usize = batch
            .iter()
            .map(|m| m.to_wire().map(|t| t.len()).unwrap_or(0))
            .sum();
        let envelope = BatchEnvelope::wrap(batch);
        let count = envelope.messages.len();
        match envelope.to_wire() {
            Ok(text) => {
                let len = text.len();
                let saved = individual.saturating_sub(len) as u64;
                if self.write_raw(text) {
                    self.metrics.record_batch(count, len, saved);
                } else {
                    let mut pending = self.pending.lock().expect("pending queue poisoned");
                    for message in envelope.unwrap_messages().into_iter().rev() {
                        pending.push_front(message);
                    }
                }
            }
            Err(e) => self.events.emit_error(&e),
        }
    }

    /// Drain the pending queue onto an open socket, oldest first. Pending
    /// messages bypass the batch queue so they cannot land behind traffic
    /// sent after them.
    fn flush_pending(&self) {
        loop {
            if !self.state().is_open() {
                return;
            }
            let popped = self
                .pending
                .lock()
                .expect("pending queue poisoned")
                .pop_front();
            let Some(message) = popped else {
                return;
            };
            match self.prepare_for_wire(message) {
                Ok(prepared) => {
                    if !self.write_message(prepared) {
                        return;
                    }
                }
                Err(e) => self.events.emit_error(&e),
            }
        }
    }

    fn send_message(&self, message: Message) -> bool {
        if let Err(e) = message.validate() {
            self.events.emit_error(&e);
            return false;
        }

        if !self.state().is_open() {
            self.pending
                .lock()
                .expect("pending queue poisoned")
                .push_back(message);
            // The session may have opened between the check and the push;
            // flushing here closes that race.
            if self.state().is_open() {
                self.flush_pending();
            }
            return false;
        }

        match self.prepare_for_wire(message) {
            Ok(prepared) => {
                if self.config.batching_enabled && prepared.kind.carries_user_payload() {
                    self.batcher.enqueue(prepared);
                } else {
                    self.write_message(prepared);
                }
                true
            }
            Err(e) => {
                self.events.emit_error(&e);
                false
            }
        }
    }

    /// Replay every subscription announcement. Runs on every transition to
    /// open, so the server's view matches the registry after a reconnect.
    fn announce_registry(&self) {
        for announcement in self.registry.announcements() {
            self.write_message(announcement);
        }
    }

    fn handle_frame(&self, text: &str) {
        self.metrics.record_received(text.len());
        match decode_frame(text) {
            Ok(WireFrame::Single(message)) => self.handle_message(message),
            Ok(WireFrame::Batch(envelope)) => {
                for message in envelope.unwrap_messages() {
                    self.handle_message(message);
                }
            }
            Err(e) => self.events.emit_error(&e),
        }
    }

    /// Decrypt and guard, expand, validate, dispatch. A failure at any
    /// step drops the message and reports it; the session keeps running.
    fn handle_message(&self, message: Message) {
        let message = match self.security.screen_inbound(message) {
            Ok(message) => message,
            Err(e) => {
                self.events.emit_error(&e);
                return;
            }
        };
        let message = match self.perf.expand_inbound(message) {
            Ok(message) => message,
            Err(e) => {
                self.events.emit_error(&e);
                return;
            }
        };
        if let Err(e) = message.validate() {
            self.events.emit_error(&e);
            return;
        }

        match message.kind {
            MessageKind::Ping => {
                self.write_message(Message::pong(message.id.clone()));
            }
            kind if kind.is_heartbeat_ack() => {
                self.ack_flag.store(true, Ordering::SeqCst);
            }
            _ => {
                self.registry.dispatch_channel(&message);
                if self.registry.route_interested(&message) {
                    self.events.emit_message(&message);
                }
            }
        }
    }

    /// The synchronous half of disconnect, safe to call from callbacks.
    fn begin_shutdown(&self) {
        self.intentional_shutdown.store(true, Ordering::SeqCst);
        let state = self.state();
        if state.is_open() || state.is_connecting() {
            self.set_state(ConnectionState::Closing);
        }
        self.session_cancel
            .lock()
            .expect("cancel token poisoned")
            .cancel();
    }
}

/// One session: a connected socket, driven until it dies or is cancelled.
async fn run_session(
    client: &Arc<ClientShared>,
    transport: Transport,
    cancel: CancellationToken,
) -> SessionEnd {
    let (mut sink, mut stream) = transport.split();

    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(text) = writer_rx.recv().await {
            if let Err(e) = sink.send(WsMessage::Text(text)).await {
                warn!(error = %e, "Socket write failed");
                return;
            }
        }
    });
    *client.writer_tx.lock().expect("writer lock poisoned") = Some(writer_tx);

    let refresh_task = TokenRefresher::from_config(&client.config).map(|refresher| {
        let on_token: TokenSink = {
            let shared = Arc::downgrade(client);
            Arc::new(move |token: String| {
                if let Some(shared) = shared.upgrade() {
                    shared.security.set_token(token);
                }
            })
        };
        let on_failure: FailureSink = {
            let shared = Arc::downgrade(client);
            Arc::new(move |e: RealtimeError| {
                if let Some(shared) = shared.upgrade() {
                    shared.events.emit_error(&e);
                    shared.begin_shutdown();
                }
            })
        };
        refresher.spawn(cancel.child_token(), on_token, on_failure)
    });

    client.set_state(ConnectionState::Open);
    client.announce_registry();
    client.flush_pending();
    client.events.emit_connect();

    let pinger: PingSender = {
        let shared = Arc::downgrade(client);
        Arc::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.write_message(Message::ping());
            }
        })
    };
    let mut heartbeat = tokio::spawn(run_heartbeat(
        pinger,
        client.ack_flag.clone(),
        client.config.heartbeat_interval(),
        client.config.heartbeat_timeout(),
        cancel.child_token(),
    ));

    let end = loop {
        tokio::select! {
            () = cancel.cancelled() => break SessionEnd::Cancelled,
            outcome = &mut heartbeat => {
                if matches!(outcome, Ok(HeartbeatResult::TimedOut)) {
                    break SessionEnd::HeartbeatTimeout;
                }
                break SessionEnd::Cancelled;
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => client.handle_frame(&text),
                    Some(Ok(WsMessage::Close(_))) | None => break SessionEnd::ConnectionClosed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        client
                            .events
                            .emit_error(&RealtimeError::Transport(format!("WebSocket error: {}", e)));
                        break SessionEnd::TransportError;
                    }
                }
            }
        }
    };

    // Writes stop first so nothing races the teardown.
    *client.writer_tx.lock().expect("writer lock poisoned") = None;
    heartbeat.abort();
    if let Some(task) = refresh_task {
        task.abort();
    }
    writer.abort();

    let leftover = client.batcher.shutdown();
    if !leftover.is_empty() {
        debug!(count = leftover.len(), "Requeueing unsent batch messages");
        let mut pending = client.pending.lock().expect("pending queue poisoned");
        for message in leftover.into_iter().rev() {
            pending.push_front(message);
        }
    }

    end
}

/// Connect, run, reconnect, give up. Holds only a weak reference between
/// sessions, so dropping every client handle ends the loop.
async fn supervisor_loop(shared: Weak<ClientShared>, cancel: CancellationToken) {
    let mut backoff = {
        let Some(client) = shared.upgrade() else {
            return;
        };
        Backoff::new(
            client.config.initial_backoff(),
            client.config.max_backoff(),
            client.config.max_reconnect_attempts,
        )
    };

    loop {
        let Some(client) = shared.upgrade() else {
            return;
        };
        if client.intentional_shutdown.load(Ordering::SeqCst) {
            client.set_state(ConnectionState::Closed);
            return;
        }

        client.set_state(ConnectionState::Connecting);
        let url = match client.security.connection_url(&client.config.url, &[]) {
            Ok(url) => url,
            Err(e) => {
                client.events.emit_error(&e);
                client.set_state(ConnectionState::Closed);
                return;
            }
        };

        let attempt = tokio::select! {
            () = cancel.cancelled() => {
                client.set_state(ConnectionState::Closed);
                return;
            }
            result = time::timeout(client.config.connect_timeout(), Transport::connect(&url)) => result,
        };

        match attempt {
            Ok(Ok(transport)) => {
                backoff.reset();
                client.reconnect_attempts.store(0, Ordering::SeqCst);
                let end = run_session(&client, transport, cancel.clone()).await;
                client.events.emit_disconnect(end.reason());
                if end.is_clean() || client.intentional_shutdown.load(Ordering::SeqCst) {
                    client.set_state(ConnectionState::Closed);
                    return;
                }
            }
            Ok(Err(e)) => client.events.emit_error(&e),
            Err(_) => client.events.emit_error(&RealtimeError::Timeout(format!(
                "no connection within {}ms",
                client.config.connect_timeout_ms
            ))),
        }

        let Some(delay) = backoff.next_delay() else {
            warn!(
                attempts = backoff.attempts(),
                "Reconnect schedule exhausted, giving up"
            );
            client
                .events
                .emit_error(&RealtimeError::Transport("reconnect attempts exhausted".into()));
            client.set_state(ConnectionState::Closed);
            return;
        };
        client.reconnect_attempts.store(backoff.attempts(), Ordering::SeqCst);
        info!(
            attempt = backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting after backoff"
        );
        drop(client);

        tokio::select! {
            () = cancel.cancelled() => return,
            () = time::sleep(delay) => {}
        }
    }
}

/// The realtime client handle. Clones share one connection.
#[derive(Clone)]
pub struct RealtimeClient {
    shared: Arc<ClientShared>,
}

impl RealtimeClient {
    pub fn new(config: RealtimeConfig) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<ClientShared>| {
            let sink_target = weak.clone();
            let sink: FlushSink = Arc::new(move |batch| {
                if let Some(shared) = sink_target.upgrade() {
                    shared.ship_batch(batch);
                }
            });

            let security = SecurityLayer::new(&config);
            let perf = PerformanceLayer::new(&config);
            let metrics = perf.metrics();
            let batcher = Batcher::new(
                config.batch_min,
                config.batch_max,
                config.batch_window(),
                sink,
            );

            ClientShared {
                security,
                perf,
                metrics,
                batcher,
                registry: SubscriptionRegistry::new(),
                events: EventCallbacks::new(),
                state: Mutex::new(ConnectionState::Idle),
                reconnect_attempts: AtomicU32::new(0),
                pending: Mutex::new(VecDeque::new()),
                writer_tx: Mutex::new(None),
                ack_flag: Arc::new(AtomicBool::new(false)),
                intentional_shutdown: AtomicBool::new(false),
                session_cancel: Mutex::new(CancellationToken::new()),
                supervisor: Mutex::new(None),
                config,
            }
        });
        Self { shared }
    }

    /// Start the supervisor. A no-op while one is already running.
    pub fn connect(&self) {
        let mut supervisor = self.shared.supervisor.lock().expect("supervisor lock poisoned");
        if let Some(handle) = supervisor.as_ref() {
            if !handle.is_finished() {
                debug!("connect() ignored, supervisor already running");
                return;
            }
        }

        self.shared.intentional_shutdown.store(false, Ordering::SeqCst);
        self.shared.reconnect_attempts.store(0, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        *self
            .shared
            .session_cancel
            .lock()
            .expect("cancel token poisoned") = cancel.clone();
        *supervisor = Some(tokio::spawn(supervisor_loop(
            Arc::downgrade(&self.shared),
            cancel,
        )));
    }

    /// Cleanly shut the connection down and wait for the supervisor to
    /// finish. Suppresses reconnection; idempotent from any state.
    pub async fn disconnect(&self) {
        self.shared.begin_shutdown();
        let handle = self
            .shared
            .supervisor
            .lock()
            .expect("supervisor lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.shared.set_state(ConnectionState::Closed);
    }

    /// Queue a message for delivery. Returns true when it went to the open
    /// socket (possibly batched), false when it was queued for later or
    /// rejected as invalid. Never raises.
    pub fn send(&self, message: Message) -> bool {
        self.shared.send_message(message)
    }

    /// Publish a payload to a topic.
    pub fn publish(&self, topic: impl Into<String>, payload: serde_json::Value) -> bool {
        self.send(Message::publish(topic, payload))
    }

    /// Register a handler for a channel. The first handler triggers the
    /// subscribe announcement when the socket is open.
    pub fn subscribe(&self, channel: &str, handler: MessageHandler) {
        if self.shared.registry.subscribe(channel, handler) && self.shared.state().is_open() {
            self.shared.write_message(Message::subscription(channel));
        }
    }

    /// Remove a handler. The last handler triggers the unsubscribe
    /// announcement when the socket is open.
    pub fn unsubscribe(&self, channel: &str, handler: &MessageHandler) {
        if self.shared.registry.unsubscribe(channel, handler) && self.shared.state().is_open() {
            self.shared.write_message(Message::unsubscription(channel));
        }
    }

    /// Declare interest in a route with an explicit topic set.
    pub fn subscribe_to_route<S: AsRef<str>>(&self, route: &str, topics: &[S]) {
        self.shared.registry.subscribe_route(route, topics);
        if self.shared.state().is_open() {
            self.shared
                .write_message(Message::route_subscription(route, topics));
        }
    }

    /// Drop a route subscription.
    pub fn unsubscribe_from_route(&self, route: &str) {
        if self.shared.registry.unsubscribe_route(route) && self.shared.state().is_open() {
            self.shared
                .write_message(Message::route_unsubscription(route));
        }
    }

    /// Subscribe to a route with the topic set the route table maps it to.
    pub fn follow_route(&self, route: &str) {
        self.subscribe_to_route(route, routes::resolve_topics(route));
    }

    pub fn on_connect(&self, callback: ConnectCallback) {
        self.shared.events.on_connect(callback);
    }

    pub fn on_disconnect(&self, callback: DisconnectCallback) {
        self.shared.events.on_disconnect(callback);
    }

    pub fn on_error(&self, callback: ErrorCallback) {
        self.shared.events.on_error(callback);
    }

    pub fn on_message(&self, callback: GlobalMessageCallback) {
        self.shared.events.on_message(callback);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let state = self.shared.state();
        let queued = self
            .shared
            .pending
            .lock()
            .expect("pending queue poisoned")
            .len()
            + self.shared.batcher.queued();
        ConnectionSnapshot {
            connected: state.is_open(),
            connecting: state.is_connecting(),
            reconnect_attempts: self.shared.reconnect_attempts.load(Ordering::SeqCst),
            channels: self.shared.registry.channel_count(),
            routes: self.shared.registry.route_count(),
            queued_messages: queued,
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.shared.metrics.reset();
    }

    /// Adopt a batch size from reported network conditions.
    pub fn adjust_network(&self, quality: &NetworkQuality) {
        self.shared.batcher.adjust_for(quality);
    }

    pub fn client_id(&self) -> &str {
        self.shared.security.client_id()
    }

    pub fn session_id(&self) -> &str {
        self.shared.security.session_id()
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.shared.config
    }
}
