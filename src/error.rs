//! Error types for terminal operations.
//!
//! Three layers: `BridgeError` for failures reported by the native hardware
//! bridge, `StoreError` for customer-store failures, and `TerminalError` as the
//! taxonomy the facade surfaces to embedders. Cancellation and unknown-card
//! outcomes are modeled here too so callers can branch on them, but they are
//! benign: the orchestration layer never logs them at error level.

use crate::bridge::ReadChannel;

/// Result type alias for terminal operations.
pub type Result<T> = std::result::Result<T, TerminalError>;

/// Errors reported by the native hardware bridge adapter.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The bridge is not present or stopped responding.
    #[error("Bridge unavailable: {message}")]
    Unavailable { message: String },

    /// A bridge method was invoked and returned a failure.
    #[error("Bridge call {method} failed: {message}")]
    CallFailed { method: String, message: String },
}

impl BridgeError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn call_failed(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CallFailed {
            method: method.into(),
            message: message.into(),
        }
    }
}

/// Errors from the customer store (SQLite or a host-provided implementation).
///
/// Row absence is not an error at this layer; lookups return `Option`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A row exists but a column could not be interpreted.
    #[error("Invalid row data: {message}")]
    InvalidRow { message: String },
}

impl StoreError {
    pub fn invalid_row(message: impl Into<String>) -> Self {
        Self::InvalidRow {
            message: message.into(),
        }
    }
}

/// Errors that can occur during read sessions and card resolution.
#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    /// The native bridge is missing or a bridge call failed.
    #[error("Hardware bridge unavailable: {message}")]
    BridgeUnavailable { message: String },

    /// A native payload could not be normalized into a usable scan result.
    #[error("Unparseable scan payload: {message}")]
    ParseFailure { message: String },

    /// The local watchdog fired before a native result arrived.
    #[error("Read timed out after {duration_ms}ms")]
    ReadTimeout { duration_ms: u64 },

    /// The operator cancelled the read. A clean outcome, not a fault.
    #[error("Read cancelled by operator")]
    ReadCancelled,

    /// A read was started on a channel whose session is still running.
    #[error("{channel} read already in progress")]
    ReadBusy { channel: ReadChannel },

    /// No customer matched the scanned identifier. Benign.
    #[error("No customer matched identifier {identifier}")]
    LookupNotFound { identifier: String },

    /// The store failed while resolving a customer.
    #[error("Customer lookup failed: {0}")]
    Lookup(#[from] StoreError),

    /// A second live callback was registered on an occupied channel.
    #[error("{channel} callback already registered")]
    DuplicateRegistration { channel: ReadChannel },

    /// A diagnostics bundle could not be assembled or written.
    #[error("Diagnostics export failed: {message}")]
    ExportFailed { message: String },

    /// The terminal configuration could not be read or parsed.
    #[error("Invalid terminal configuration: {message}")]
    Config { message: String },
}

impl TerminalError {
    pub fn bridge_unavailable(message: impl Into<String>) -> Self {
        Self::BridgeUnavailable {
            message: message.into(),
        }
    }

    pub fn parse_failure(message: impl Into<String>) -> Self {
        Self::ParseFailure {
            message: message.into(),
        }
    }

    pub fn export_failed(message: impl Into<String>) -> Self {
        Self::ExportFailed {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn read_timeout(duration_ms: u64) -> Self {
        Self::ReadTimeout { duration_ms }
    }

    pub fn not_found(identifier: impl Into<String>) -> Self {
        Self::LookupNotFound {
            identifier: identifier.into(),
        }
    }

    /// True for outcomes the UI should present as information, not as a fault.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Self::ReadCancelled | Self::LookupNotFound { .. } | Self::ReadBusy { .. }
        )
    }
}

impl From<BridgeError> for TerminalError {
    fn from(e: BridgeError) -> Self {
        Self::BridgeUnavailable {
            message: e.to_string(),
        }
    }
}
