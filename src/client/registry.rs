//! Subscription Registry
//!
//! Single responsibility: Track who is interested in what. Channel names
//! map to handler lists (fan-out); routes map to topic sets. Empty entries
//! are removed the moment their last member goes, so the registry never
//! carries dead weight.
//!
//! Handlers have no identity beyond their allocation, so registration and
//! removal compare `Arc` pointers. Subscribing the very same handler
//! twice is a no-op; a clone of the closure is a different handler.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::protocol::Message;

pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Default)]
pub struct SubscriptionRegistry {
    channels: DashMap<String, Vec<MessageHandler>>,
    routes: DashMap<String, BTreeSet<String>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a channel. Returns true when this is the
    /// first handler for the channel, which is the caller's cue to send
    /// the subscribe announcement.
    pub fn subscribe(&self, channel: &str, handler: MessageHandler) -> bool {
        let mut entry = self.channels.entry(channel.to_string()).or_default();
        let first = entry.is_empty();
        if entry.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return false;
        }
        entry.push(handler);
        debug!(channel = %channel, handlers = entry.len(), "Handler subscribed");
        first
    }

    /// Remove a handler. Returns true when the channel entry was removed
    /// entirely, the cue to send the unsubscribe announcement. Removing a
    /// handler that was never registered is a no-op.
    pub fn unsubscribe(&self, channel: &str, handler: &MessageHandler) -> bool {
        let Some(mut entry) = self.channels.get_mut(channel) else {
            return false;
        };
        entry.retain(|h| !Arc::ptr_eq(h, handler));
        let emptied = entry.is_empty();
        drop(entry);
        if emptied {
            self.channels.remove(channel);
            debug!(channel = %channel, "Channel entry removed");
        }
        emptied
    }

    /// Replace the topic set for a route. An empty set removes the route.
    pub fn subscribe_route<S: AsRef<str>>(&self, route: &str, topics: &[S]) {
        let set: BTreeSet<String> = topics.iter().map(|t| t.as_ref().to_string()).collect();
        if set.is_empty() {
            self.routes.remove(route);
            return;
        }
        debug!(route = %route, topics = set.len(), "Route subscribed");
        self.routes.insert(route.to_string(), set);
    }

    /// Drop a route. Returns true when it existed.
    pub fn unsubscribe_route(&self, route: &str) -> bool {
        self.routes.remove(route).is_some()
    }

    /// Invoke every handler registered for the message's channel.
    /// Returns how many handlers ran.
    pub fn dispatch_channel(&self, message: &Message) -> usize {
        let Some(channel) = message.channel.as_deref() else {
            return 0;
        };
        let handlers: Vec<MessageHandler> = match self.channels.get(channel) {
            Some(entry) => entry.clone(),
            None => return 0,
        };
        for handler in &handlers {
            handler(message);
        }
        handlers.len()
    }

    /// Whether a message should reach route-scoped listeners. Messages
    /// without a route always pass; messages with one pass only when that
    /// route's registered topic set contains the message's topic.
    pub fn route_interested(&self, message: &Message) -> bool {
        let Some(route) = message.route.as_deref() else {
            return true;
        };
        let Some(topic) = message.topic.as_deref() else {
            return false;
        };
        self.routes
            .get(route)
            .map(|set| set.contains(topic))
            .unwrap_or(false)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// The current announcements, for replay on every transition to open.
    pub fn announcements(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .channels
            .iter()
            .map(|entry| Message::subscription(entry.key().clone()))
            .collect();
        for entry in self.routes.iter() {
            let topics: Vec<String> = entry.value().iter().cloned().collect();
            messages.push(Message::route_subscription(entry.key().clone(), &topics));
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler() -> (MessageHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let handler: MessageHandler = Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (handler, count)
    }

    fn channel_message(channel: &str) -> Message {
        let mut msg = Message::publish("livestock.updated", json!({}));
        msg.channel = Some(channel.to_string());
        msg
    }

    #[test]
    fn first_subscribe_signals_announcement() {
        let registry = SubscriptionRegistry::new();
        let (a, _) = counting_handler();
        let (b, _) = counting_handler();
        assert!(registry.subscribe("barn-7", a));
        assert!(!registry.subscribe("barn-7", b));
    }

    #[test]
    fn duplicate_handler_is_registered_once() {
        let registry = SubscriptionRegistry::new();
        let (handler, count) = counting_handler();
        registry.subscribe("barn-7", handler.clone());
        registry.subscribe("barn-7", handler);

        let ran = registry.dispatch_channel(&channel_message("barn-7"));
        assert_eq!(ran, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fan_out_reaches_every_handler_once() {
        let registry = SubscriptionRegistry::new();
        let (a, count_a) = counting_handler();
        let (b, count_b) = counting_handler();
        registry.subscribe("barn-7", a);
        registry.subscribe("barn-7", b);

        registry.dispatch_channel(&channel_message("barn-7"));
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn last_unsubscribe_removes_the_channel() {
        let registry = SubscriptionRegistry::new();
        let (a, _) = counting_handler();
        let (b, _) = counting_handler();
        registry.subscribe("barn-7", a.clone());
        registry.subscribe("barn-7", b.clone());

        assert!(!registry.unsubscribe("barn-7", &a));
        assert_eq!(registry.channel_count(), 1);
        assert!(registry.unsubscribe("barn-7", &b));
        assert_eq!(registry.channel_count(), 0);
    }

    #[test]
    fn unsubscribing_unknown_handler_is_a_noop() {
        let registry = SubscriptionRegistry::new();
        let (a, _) = counting_handler();
        let (stranger, _) = counting_handler();
        registry.subscribe("barn-7", a);
        assert!(!registry.unsubscribe("barn-7", &stranger));
        assert!(!registry.unsubscribe("elsewhere", &stranger));
        assert_eq!(registry.channel_count(), 1);
    }

    #[test]
    fn route_interest_filters_by_topic_set() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe_route("/unit/kandang", &["livestock.updated", "livestock.moved"]);

        let mut msg = Message::publish("livestock.updated", json!({}));
        msg.route = Some("/unit/kandang".into());
        assert!(registry.route_interested(&msg));

        msg.topic = Some("sale.created".into());
        assert!(!registry.route_interested(&msg));

        msg.route = Some("/never/subscribed".into());
        assert!(!registry.route_interested(&msg));

        msg.route = None;
        assert!(registry.route_interested(&msg));
    }

    #[test]
    fn empty_topic_set_removes_the_route() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe_route("/unit/kandang", &["livestock.updated"]);
        assert_eq!(registry.route_count(), 1);
        registry.subscribe_route::<&str>("/unit/kandang", &[]);
        assert_eq!(registry.route_count(), 0);
        assert!(!registry.unsubscribe_route("/unit/kandang"));
    }

    #[test]
    fn announcements_cover_channels_and_routes() {
        let registry = SubscriptionRegistry::new();
        let (a, _) = counting_handler();
        registry.subscribe("barn-7", a);
        registry.subscribe_route("/unit/kandang", &["livestock.updated"]);

        let announcements = registry.announcements();
        assert_eq!(announcements.len(), 2);
        assert!(announcements
            .iter()
            .any(|m| m.channel.as_deref() == Some("barn-7")));
        assert!(announcements
            .iter()
            .any(|m| m.route.as_deref() == Some("/unit/kandang")));
    }
}
