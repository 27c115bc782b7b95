//! Lifecycle callback lists
//!
//! Single responsibility: Hold the observer lists for connect, disconnect,
//! error, and message events, and fan events out to them. Registration
//! order is not a delivery-order guarantee.

use std::sync::{Arc, Mutex};

use crate::error::RealtimeError;
use crate::protocol::Message;

pub type ConnectCallback = Arc<dyn Fn() + Send + Sync>;
pub type DisconnectCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&RealtimeError) + Send + Sync>;
pub type GlobalMessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Default)]
pub struct EventCallbacks {
    on_connect: Mutex<Vec<ConnectCallback>>,
    on_disconnect: Mutex<Vec<DisconnectCallback>>,
    on_error: Mutex<Vec<ErrorCallback>>,
    on_message: Mutex<Vec<GlobalMessageCallback>>,
}

impl EventCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(&self, callback: ConnectCallback) {
        self.on_connect.lock().expect("callback list poisoned").push(callback);
    }

    pub fn on_disconnect(&self, callback: DisconnectCallback) {
        self.on_disconnect.lock().expect("callback list poisoned").push(callback);
    }

    pub fn on_error(&self, callback: ErrorCallback) {
        self.on_error.lock().expect("callback list poisoned").push(callback);
    }

    pub fn on_message(&self, callback: GlobalMessageCallback) {
        self.on_message.lock().expect("callback list poisoned").push(callback);
    }

    pub fn emit_connect(&self) {
        for callback in self.snapshot(&self.on_connect) {
            callback();
        }
    }

    pub fn emit_disconnect(&self, reason: &str) {
        for callback in self.snapshot(&self.on_disconnect) {
            callback(reason);
        }
    }

    pub fn emit_error(&self, error: &RealtimeError) {
        for callback in self.snapshot(&self.on_error) {
            callback(error);
        }
    }

    pub fn emit_message(&self, message: &Message) {
        for callback in self.snapshot(&self.on_message) {
            callback(message);
        }
    }

    pub fn message_listener_count(&self) -> usize {
        self.on_message.lock().expect("callback list poisoned").len()
    }

    // Clone the list before invoking so a callback may register another
    // without deadlocking.
    fn snapshot<T: Clone>(&self, list: &Mutex<Vec<T>>) -> Vec<T> {
        list.lock().expect("callback list poisoned").clone()
    }
}
