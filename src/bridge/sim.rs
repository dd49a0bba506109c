//! Simulated bridge for development and tests.
//!
//! Plays back scripted read results after a short delay, mirroring the timing
//! of a real shell: `start_read` returns immediately and the payload arrives
//! later through the dispatcher. A channel with no scripted result never
//! answers, which is how read-timeout paths are exercised.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use crate::bridge::{FeedbackCue, NativeBridge, NativeDispatcher, ReadChannel};
use crate::error::BridgeError;

/// In-process stand-in for the native shell.
///
/// Must be driven from within a tokio runtime; result delivery is spawned.
pub struct SimulatedBridge {
    delay: Duration,
    scripts: Mutex<HashMap<ReadChannel, VecDeque<Value>>>,
    dispatcher: Mutex<Option<NativeDispatcher>>,
    network: Mutex<Option<Value>>,
    system: Mutex<Option<Value>>,
    calls: Mutex<Vec<String>>,
}

impl SimulatedBridge {
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(50),
            scripts: Mutex::new(HashMap::new()),
            dispatcher: Mutex::new(None),
            network: Mutex::new(Some(json!({
                "connected": true,
                "type": "WiFi",
                "ip": "192.168.1.34"
            }))),
            system: Mutex::new(Some(json!({
                "platform": "Android 13 (simulated)",
                "bridgeVersion": "sim-1.0",
                "appVersion": env!("CARGO_PKG_VERSION")
            }))),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Wire the dispatcher results are posted through, normally
    /// `LoyaltyTerminal::native_dispatcher`.
    pub fn connect(&self, dispatcher: NativeDispatcher) {
        *self.dispatcher.lock().unwrap_or_else(|e| e.into_inner()) = Some(dispatcher);
    }

    /// Queue the payload the next read on `channel` will answer with.
    pub fn enqueue_result(&self, channel: ReadChannel, payload: Value) {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(channel)
            .or_default()
            .push_back(payload);
    }

    /// Replace the canned `network_info` answer. `None` makes the call fail.
    pub fn set_network_info(&self, value: Option<Value>) {
        *self.network.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }

    /// Replace the canned `system_info` answer. `None` makes the call fail.
    pub fn set_system_info(&self, value: Option<Value>) {
        *self.system.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }

    /// Every bridge call made so far, in order (for assertions).
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call.into());
    }

    fn post_later(&self, channel: ReadChannel, payload: Value) {
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(dispatcher) = dispatcher else {
            debug!(channel = %channel, "sim has no dispatcher, result dropped");
            return;
        };
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            dispatcher(channel, payload);
        });
    }
}

impl Default for SimulatedBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeBridge for SimulatedBridge {
    fn name(&self) -> &str {
        "simulated"
    }

    fn start_read(&self, channel: ReadChannel) -> Result<(), BridgeError> {
        self.record(format!("start_read:{channel}"));
        let next = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&channel)
            .and_then(|queue| queue.pop_front());
        if let Some(payload) = next {
            self.post_later(channel, payload);
        }
        Ok(())
    }

    fn stop_read(&self, channel: ReadChannel) -> Result<(), BridgeError> {
        self.record(format!("stop_read:{channel}"));
        // The real QR scanner acknowledges cancellation with a payload of its
        // own; the NFC side stops silently.
        if channel == ReadChannel::Qr {
            self.post_later(channel, json!({ "success": false, "cancelled": true }));
        }
        Ok(())
    }

    fn feedback(&self, cue: &FeedbackCue) -> Result<(), BridgeError> {
        match cue.beep_pattern() {
            Some((count, duration_ms)) => self.record(format!("beep:{count}x{duration_ms}")),
            None => {
                if let FeedbackCue::Toast { message } = cue {
                    self.record(format!("toast:{message}"));
                }
            }
        }
        Ok(())
    }

    fn network_info(&self) -> Result<Value, BridgeError> {
        self.record("network_info");
        self.network
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| BridgeError::call_failed("network_info", "sim: disabled"))
    }

    fn system_info(&self) -> Result<Value, BridgeError> {
        self.record("system_info");
        self.system
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| BridgeError::call_failed("system_info", "sim: disabled"))
    }
}
