//! Tessera POS loyalty terminal core.
//!
//! Integration layer between a POS shell (Android WebView host, vendor SDK
//! wrapper, or the bundled simulator) and the loyalty customer base:
//!
//! - **Read sessions**: callback-driven NFC and QR reads with a timeout
//!   watchdog; native result, cancel, and timeout race to a single terminal
//!   transition per session.
//! - **Resolution**: a scanned card UID or QR code resolves to a customer
//!   through the store (NFC by `(org, card UID)` binding, QR by customer id),
//!   with once-per-calendar-day visit accrual applied on every resolution.
//! - **Diagnostics**: a degrading chain of probe strategies produces a
//!   per-subsystem hardware snapshot; exportable as a zip bundle.
//!
//! The shell posts native results through [`LoyaltyTerminal::native_dispatcher`]
//! and subscribes to [`TerminalEvent`]s for everything downstream of a scan.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tessera_pos::{BroadcastSink, LoyaltyTerminal, SimulatedBridge, TerminalConfig};
//!
//! #[tokio::main]
//! async fn main() -> tessera_pos::Result<()> {
//!     tessera_pos::init_logging();
//!
//!     let bridge = Arc::new(SimulatedBridge::new());
//!     let events = Arc::new(BroadcastSink::default());
//!     let mut rx = events.subscribe();
//!
//!     let config = TerminalConfig {
//!         org_id: "org-1".into(),
//!         ..TerminalConfig::default()
//!     };
//!     let terminal = LoyaltyTerminal::with_sqlite(config, bridge.clone(), events)?;
//!     bridge.connect(terminal.native_dispatcher());
//!
//!     terminal.start_nfc_read()?;
//!     if let Ok(event) = rx.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod accrual;
pub mod bridge;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod reader;
pub mod resolver;
pub mod store;
pub mod terminal;

pub use accrual::VisitAccrualRecord;
pub use bridge::{
    FeedbackCue, NativeBridge, NativeDispatcher, ReadChannel, SimulatedBridge,
};
pub use config::{Environment, TerminalConfig};
pub use diagnostics::{HardwareStatus, StatusSource, SubsystemStatus};
pub use error::{BridgeError, Result, StoreError, TerminalError};
pub use events::{BroadcastSink, EventSink, TerminalEvent};
pub use reader::{ReadSessionState, ScanResult};
pub use resolver::Resolution;
pub use store::{CardBinding, Customer, CustomerStore, SqliteCustomerStore};
pub use terminal::LoyaltyTerminal;

/// Initialize structured logging (console + rolling file).
///
/// Respects `RUST_LOG`; without it, `info` globally and `debug` for this
/// crate. A no-op when the embedder already installed a global subscriber.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tessera_pos=debug"));

    // Prune old log files before setting up the appender
    diagnostics::prune_old_logs();

    let log_dir = diagnostics::log_dir();
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        // Keep the guard alive for the lifetime of the process; dropping it
        // flushes and closes the file writer.
        std::mem::forget(guard);
        info!(
            version = env!("CARGO_PKG_VERSION"),
            log_dir = %log_dir.display(),
            "tessera-pos logging initialized"
        );
    }
}
