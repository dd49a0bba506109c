//! Terminal event surface.
//!
//! The UI collaborator does not poll; it subscribes. Orchestration code emits
//! [`TerminalEvent`]s through an injected [`EventSink`], and the bundled
//! [`BroadcastSink`] fans them out to any number of subscribers. Payloads
//! serialize with camelCase keys, matching what the UI layer renders.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::accrual::VisitAccrualRecord;
use crate::bridge::ReadChannel;
use crate::diagnostics::HardwareStatus;
use crate::store::Customer;

/// Events the terminal emits toward the UI collaborator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TerminalEvent {
    /// A read produced an identifier, before resolution.
    CardScanned {
        channel: ReadChannel,
        identifier: String,
        timestamp: String,
    },
    /// Identifier matched a customer; accrual already ran.
    CustomerResolved {
        customer: Customer,
        accrual: VisitAccrualRecord,
    },
    /// Identifier matched nothing. Informational, not a fault.
    CardUnknown {
        channel: ReadChannel,
        identifier: String,
    },
    ReadFailed {
        channel: ReadChannel,
        error: String,
    },
    ReadCancelled {
        channel: ReadChannel,
    },
    HardwareStatusChanged {
        status: HardwareStatus,
    },
}

impl TerminalEvent {
    /// Event name (for logging/display).
    pub fn name(&self) -> &'static str {
        match self {
            TerminalEvent::CardScanned { .. } => "card_scanned",
            TerminalEvent::CustomerResolved { .. } => "customer_resolved",
            TerminalEvent::CardUnknown { .. } => "card_unknown",
            TerminalEvent::ReadFailed { .. } => "read_failed",
            TerminalEvent::ReadCancelled { .. } => "read_cancelled",
            TerminalEvent::HardwareStatusChanged { .. } => "hardware_status_changed",
        }
    }
}

/// Destination for terminal events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &TerminalEvent);
}

/// `tokio::sync::broadcast` backed sink.
pub struct BroadcastSink {
    tx: broadcast::Sender<TerminalEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TerminalEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: &TerminalEvent) {
        // Send only fails when nobody is subscribed, which is fine.
        if self.tx.send(event.clone()).is_err() {
            debug!(event = event.name(), "no event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_receives_emitted_event() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();

        sink.emit(&TerminalEvent::ReadCancelled {
            channel: ReadChannel::Nfc,
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.name(), "read_cancelled");
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let sink = BroadcastSink::new(8);
        sink.emit(&TerminalEvent::ReadCancelled {
            channel: ReadChannel::Qr,
        });
    }

    #[test]
    fn test_event_payload_is_camel_case() {
        let event = TerminalEvent::CardScanned {
            channel: ReadChannel::Nfc,
            identifier: "04A1B2C3".into(),
            timestamp: "2025-06-01T10:00:00Z".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "card_scanned");
        assert_eq!(value["identifier"], "04A1B2C3");
        assert!(value.get("timestamp").is_some());
        assert_eq!(value["channel"], "nfc");
    }
}
