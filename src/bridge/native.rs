//! Native bridge trait and shared types.
//!
//! The native shell (Android WebView host, vendor SDK wrapper, or the bundled
//! simulator) exposes NFC/QR reading, operator feedback, and device info
//! through this trait. Read results never return from `start_read`; the shell
//! posts them asynchronously through [`CallbackRegistry::dispatch`] and the
//! session racing logic decides whether they still matter.
//!
//! [`CallbackRegistry::dispatch`]: crate::bridge::CallbackRegistry::dispatch

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

/// Entry point a shell adapter posts native read results through.
pub type NativeDispatcher = Arc<dyn Fn(ReadChannel, Value) + Send + Sync>;

// ---------------------------------------------------------------------------
// Read channels
// ---------------------------------------------------------------------------

/// Physical input channel a read session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadChannel {
    Nfc,
    Qr,
}

impl ReadChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadChannel::Nfc => "NFC",
            ReadChannel::Qr => "QR",
        }
    }
}

impl fmt::Display for ReadChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Operator feedback
// ---------------------------------------------------------------------------

/// Feedback cue played through the native shell (beeper and/or toast).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FeedbackCue {
    /// Confirmation: one beep of 150 ms.
    Success,
    /// Rejection: three rapid beeps of 50 ms.
    Failure,
    /// On-screen operator prompt, no beep.
    Toast { message: String },
}

impl FeedbackCue {
    pub fn prompt(message: impl Into<String>) -> Self {
        Self::Toast {
            message: message.into(),
        }
    }

    /// `(count, duration_ms)` beep pattern, if the cue is audible.
    pub fn beep_pattern(&self) -> Option<(u8, u32)> {
        match self {
            FeedbackCue::Success => Some((1, 150)),
            FeedbackCue::Failure => Some((3, 50)),
            FeedbackCue::Toast { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Bridge trait
// ---------------------------------------------------------------------------

/// Hardware bridge surface required of the host shell.
///
/// Implementations are shared across async tasks, so methods take `&self` and
/// keep any state behind their own locks. The three info getters default to
/// a failed call so minimal shells only wire reading and feedback; the
/// diagnostics chain degrades past them.
pub trait NativeBridge: Send + Sync {
    /// Bridge name (for logging/display).
    fn name(&self) -> &str;

    /// Ask the shell to begin a read on `channel`. The result arrives later
    /// through the callback registry, or never.
    fn start_read(&self, channel: ReadChannel) -> Result<(), BridgeError>;

    /// Best-effort stop of an in-flight read. Callers treat failure as
    /// non-fatal; the local session state is already decided.
    fn stop_read(&self, channel: ReadChannel) -> Result<(), BridgeError>;

    /// Play a feedback cue. Shells may drop cues they cannot express.
    fn feedback(&self, cue: &FeedbackCue) -> Result<(), BridgeError>;

    /// One-call status snapshot, if the shell aggregates one.
    fn aggregate_hardware_info(&self) -> Result<Value, BridgeError> {
        Err(BridgeError::call_failed(
            "aggregate_hardware_info",
            format!("{}: not supported", self.name()),
        ))
    }

    /// Network state as `{"connected": bool, "type": "...", "ip": "..."}`,
    /// either an object or a JSON-encoded string.
    fn network_info(&self) -> Result<Value, BridgeError> {
        Err(BridgeError::call_failed(
            "network_info",
            format!("{}: not supported", self.name()),
        ))
    }

    /// Platform description plus shell and app versions.
    fn system_info(&self) -> Result<Value, BridgeError> {
        Err(BridgeError::call_failed(
            "system_info",
            format!("{}: not supported", self.name()),
        ))
    }
}
