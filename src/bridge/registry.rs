//! Callback registry for native read results.
//!
//! The original shell contract delivered results to globally named callbacks.
//! Here registration is an owned, typed operation: [`CallbackRegistry::register`]
//! hands back a [`RegistrationToken`], and dropping the token unregisters the
//! handler. A shell post that arrives after the token is gone is counted and
//! logged at debug, never delivered, so stale results cannot reach a session
//! that already finished.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tracing::debug;

use crate::bridge::ReadChannel;
use crate::error::TerminalError;

/// Handler invoked with the raw payload the shell posted.
pub type ReadHandler = Arc<dyn Fn(Value) + Send + Sync>;

struct Slot {
    id: u64,
    handler: ReadHandler,
}

type SlotMap = Mutex<HashMap<ReadChannel, Slot>>;

/// Per-channel registry of live read handlers. At most one per channel.
pub struct CallbackRegistry {
    slots: Arc<SlotMap>,
    next_id: AtomicU64,
    dropped_posts: AtomicU64,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            dropped_posts: AtomicU64::new(0),
        }
    }

    /// Register `handler` as the live handler for `channel`.
    ///
    /// Fails with [`TerminalError::DuplicateRegistration`] while another token
    /// for the same channel is alive.
    pub fn register(
        &self,
        channel: ReadChannel,
        handler: ReadHandler,
    ) -> Result<RegistrationToken, TerminalError> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.contains_key(&channel) {
            return Err(TerminalError::DuplicateRegistration { channel });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        slots.insert(channel, Slot { id, handler });
        debug!(channel = %channel, id, "read callback registered");
        Ok(RegistrationToken {
            slots: Arc::downgrade(&self.slots),
            channel,
            id,
        })
    }

    /// Deliver a shell post to the live handler, if any.
    ///
    /// Returns `false` when nothing is registered (late or spurious post).
    pub fn dispatch(&self, channel: ReadChannel, payload: Value) -> bool {
        let handler = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.get(&channel).map(|slot| Arc::clone(&slot.handler))
        };
        match handler {
            Some(handler) => {
                handler(payload);
                true
            }
            None => {
                self.dropped_posts.fetch_add(1, Ordering::Relaxed);
                debug!(channel = %channel, "native post with no live handler, dropped");
                false
            }
        }
    }

    pub fn is_registered(&self, channel: ReadChannel) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.contains_key(&channel)
    }

    /// Posts dropped because no handler was live.
    pub fn dropped_post_count(&self) -> u64 {
        self.dropped_posts.load(Ordering::Relaxed)
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Owned proof of a live registration. Dropping it unregisters the handler.
///
/// Removal checks the slot generation, so a stale token can never evict a
/// newer registration on the same channel.
#[derive(Debug)]
#[must_use = "dropping the token unregisters the handler"]
pub struct RegistrationToken {
    slots: Weak<SlotMap>,
    channel: ReadChannel,
    id: u64,
}

impl RegistrationToken {
    pub fn channel(&self) -> ReadChannel {
        self.channel
    }

    /// Explicit unregister. Equivalent to dropping the token.
    pub fn dispose(self) {}
}

impl Drop for RegistrationToken {
    fn drop(&mut self) {
        if let Some(slots) = self.slots.upgrade() {
            let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
            if slots.get(&self.channel).is_some_and(|slot| slot.id == self.id) {
                slots.remove(&self.channel);
                debug!(channel = %self.channel, id = self.id, "read callback unregistered");
            }
        }
    }
}
