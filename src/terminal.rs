//! Terminal facade.
//!
//! `LoyaltyTerminal` wires the pieces together: callback registry, read
//! sessions, resolution and accrual, diagnostics, and the event sink. The
//! hosting shell holds an `Arc<LoyaltyTerminal>`, starts and cancels reads,
//! posts native results through [`native_dispatcher`], and subscribes to
//! [`TerminalEvent`]s for everything that happens after a scan.
//!
//! [`native_dispatcher`]: LoyaltyTerminal::native_dispatcher
//! [`TerminalEvent`]: crate::events::TerminalEvent

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accrual::VisitAccrualService;
use crate::bridge::{
    CallbackRegistry, FeedbackCue, NativeBridge, NativeDispatcher, ReadChannel,
};
use crate::config::TerminalConfig;
use crate::db::{self, DbState};
use crate::diagnostics::{
    self, DiagnosticsExportOptions, HardwareDiagnosticsAggregator, HardwareStatus,
};
use crate::error::{Result, TerminalError};
use crate::events::{EventSink, TerminalEvent};
use crate::reader::{ReadManager, ReadOutcome, ReadSessionState, ScanResult};
use crate::resolver::CardResolver;
use crate::store::{CustomerStore, SqliteCustomerStore};

/// Operator prompts, worded the way the storefront app words them.
const NFC_PROMPT: &str = "Avvicina la tessera al lettore";
const QR_PROMPT: &str = "Inquadra il codice QR";
const CANCEL_NOTICE: &str = "Lettura annullata";

/// Health monitor floor. Probing walks the whole bridge; anything faster
/// than this just burns the battery of an integrated terminal.
const MIN_HEALTH_INTERVAL_SECS: u64 = 10;

pub struct LoyaltyTerminal {
    config: TerminalConfig,
    bridge: Arc<dyn NativeBridge>,
    registry: Arc<CallbackRegistry>,
    reads: ReadManager,
    resolver: Arc<CardResolver>,
    diagnostics: Arc<HardwareDiagnosticsAggregator>,
    events: Arc<dyn EventSink>,
    db: Option<Arc<DbState>>,
    monitor_shutdown: CancellationToken,
}

impl LoyaltyTerminal {
    /// Builds a terminal around a host-provided customer store.
    pub fn new(
        config: TerminalConfig,
        bridge: Arc<dyn NativeBridge>,
        store: Arc<dyn CustomerStore>,
        events: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        Self::build(config, bridge, store, events, None)
    }

    /// Builds a terminal backed by the bundled SQLite store at
    /// `config.data_dir`.
    pub fn with_sqlite(
        config: TerminalConfig,
        bridge: Arc<dyn NativeBridge>,
        events: Arc<dyn EventSink>,
    ) -> Result<Arc<Self>> {
        let database = Arc::new(db::init(&config.data_dir)?);
        let store = Arc::new(SqliteCustomerStore::new(Arc::clone(&database)));
        Ok(Self::build(config, bridge, store, events, Some(database)))
    }

    fn build(
        config: TerminalConfig,
        bridge: Arc<dyn NativeBridge>,
        store: Arc<dyn CustomerStore>,
        events: Arc<dyn EventSink>,
        database: Option<Arc<DbState>>,
    ) -> Arc<Self> {
        let registry = Arc::new(CallbackRegistry::new());
        let reads = ReadManager::new(
            Arc::clone(&bridge),
            Arc::clone(&registry),
            config.read_timeout(),
        );
        let accrual = VisitAccrualService::new(Arc::clone(&store), config.utc_offset_minutes);
        let resolver = Arc::new(CardResolver::new(store, accrual, config.org_id.clone()));
        let diagnostics = Arc::new(HardwareDiagnosticsAggregator::new(
            Arc::clone(&bridge),
            config.environment,
        ));

        info!(
            bridge = bridge.name(),
            org_id = %config.org_id,
            environment = ?config.environment,
            "terminal assembled"
        );

        Arc::new(Self {
            config,
            bridge,
            registry,
            reads,
            resolver,
            diagnostics,
            events,
            db: database,
            monitor_shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Start an NFC read. Fails with [`TerminalError::ReadBusy`] while a
    /// previous NFC session is still reading.
    pub fn start_nfc_read(self: &Arc<Self>) -> Result<Uuid> {
        self.start_read(ReadChannel::Nfc, NFC_PROMPT)
    }

    /// Start a QR read. Same busy rule as NFC; the two channels are
    /// independent.
    pub fn start_qr_read(self: &Arc<Self>) -> Result<Uuid> {
        self.start_read(ReadChannel::Qr, QR_PROMPT)
    }

    fn start_read(self: &Arc<Self>, channel: ReadChannel, prompt: &str) -> Result<Uuid> {
        let (session, done_rx) = self.reads.start(channel)?;
        self.feedback(&FeedbackCue::prompt(prompt));
        self.spawn_waiter(channel, done_rx);
        Ok(session.id())
    }

    /// Cancel the channel's read. Returns `true` if a reading session was
    /// actually cancelled.
    pub fn cancel_read(&self, channel: ReadChannel) -> bool {
        self.reads.cancel(channel)
    }

    /// Observable state of the channel's current session.
    pub fn session_state(&self, channel: ReadChannel) -> ReadSessionState {
        self.reads.session_state(channel)
    }

    /// Entry point for shell adapters to post native read results.
    ///
    /// The returned closure is cheap to clone and safe to call from any
    /// thread; results for channels nobody is reading on are dropped by the
    /// registry.
    pub fn native_dispatcher(&self) -> NativeDispatcher {
        let registry = Arc::clone(&self.registry);
        Arc::new(move |channel, payload| {
            registry.dispatch(channel, payload);
        })
    }

    /// Post a native result directly. Returns `false` when no session was
    /// listening on the channel.
    pub fn dispatch_native(&self, channel: ReadChannel, payload: Value) -> bool {
        self.reads.dispatch_native(channel, payload)
    }

    /// Consumes session outcomes: resolution, feedback cues, events.
    fn spawn_waiter(
        self: &Arc<Self>,
        channel: ReadChannel,
        done_rx: oneshot::Receiver<ReadOutcome>,
    ) {
        let terminal = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = match done_rx.await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!(channel = %channel, "session dropped without an outcome");
                    return;
                }
            };
            match outcome {
                ReadOutcome::Success(scan) => terminal.on_scan_success(channel, scan),
                ReadOutcome::TimedOut { after_ms } => {
                    terminal.feedback(&FeedbackCue::Failure);
                    terminal.events.emit(&TerminalEvent::ReadFailed {
                        channel,
                        error: TerminalError::read_timeout(after_ms).to_string(),
                    });
                }
                ReadOutcome::Failed { error } => {
                    terminal.feedback(&FeedbackCue::Failure);
                    terminal
                        .events
                        .emit(&TerminalEvent::ReadFailed { channel, error });
                }
                ReadOutcome::Cancelled => {
                    terminal.feedback(&FeedbackCue::prompt(CANCEL_NOTICE));
                    terminal
                        .events
                        .emit(&TerminalEvent::ReadCancelled { channel });
                }
            }
        });
    }

    fn on_scan_success(&self, channel: ReadChannel, scan: ScanResult) {
        let Some(identifier) = scan.identifier().map(str::to_string) else {
            // Normalization guarantees successful scans carry an identifier;
            // a miss here is a bug upstream, surface it as a failed read.
            warn!(channel = %channel, "successful scan without identifier");
            self.events.emit(&TerminalEvent::ReadFailed {
                channel,
                error: "scan carried no identifier".into(),
            });
            return;
        };

        self.events.emit(&TerminalEvent::CardScanned {
            channel,
            identifier: identifier.clone(),
            timestamp: Utc::now().to_rfc3339(),
        });

        match self.resolver.resolve(&scan) {
            Ok(resolution) => {
                self.feedback(&FeedbackCue::Success);
                self.events.emit(&TerminalEvent::CustomerResolved {
                    customer: resolution.customer,
                    accrual: resolution.accrual,
                });
            }
            Err(TerminalError::LookupNotFound { identifier }) => {
                self.feedback(&FeedbackCue::Failure);
                self.events
                    .emit(&TerminalEvent::CardUnknown { channel, identifier });
            }
            Err(e) => {
                self.feedback(&FeedbackCue::Failure);
                warn!(channel = %channel, error = %e, "resolution failed");
                self.events.emit(&TerminalEvent::ReadFailed {
                    channel,
                    error: e.to_string(),
                });
            }
        }
    }

    fn feedback(&self, cue: &FeedbackCue) {
        if !self.config.feedback_enabled {
            return;
        }
        if let Err(e) = self.bridge.feedback(cue) {
            debug!(error = %e, "feedback cue dropped");
        }
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Probe the hardware and persist the snapshot for later export.
    pub async fn probe_hardware(&self) -> Result<HardwareStatus> {
        let status = self.diagnostics.probe().await?;
        self.persist_status(&status);
        Ok(status)
    }

    /// Last completed snapshot without probing.
    pub fn hardware_status(&self) -> Option<HardwareStatus> {
        self.diagnostics.last_snapshot()
    }

    /// Store a snapshot pushed by the hosting shell; the next probe consumes
    /// it as its first stage.
    pub fn inject_hardware_snapshot(&self, snapshot: Value) {
        self.diagnostics.inject_snapshot(snapshot);
    }

    /// Version and build info block.
    pub fn about(&self) -> Value {
        diagnostics::about_info()
    }

    /// Write a diagnostics zip bundle into `output_dir`.
    pub fn export_diagnostics(&self, output_dir: &Path) -> Result<PathBuf> {
        diagnostics::export_diagnostics(
            &self.config,
            self.diagnostics.last_snapshot().as_ref(),
            output_dir,
            DiagnosticsExportOptions::default(),
        )
    }

    fn persist_status(&self, status: &HardwareStatus) {
        let Some(database) = &self.db else {
            return;
        };
        let body = match serde_json::to_string(status) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "hardware status not serializable");
                return;
            }
        };
        let conn = database.conn.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = db::set_setting(&conn, "diagnostics", "last_status", &body) {
            warn!(error = %e, "failed to persist hardware status");
        }
    }

    // -----------------------------------------------------------------------
    // Health monitor
    // -----------------------------------------------------------------------

    /// Spawn the background health monitor if the config enables it.
    ///
    /// The monitor re-probes on the configured interval (clamped to at least
    /// 10 s) and emits [`TerminalEvent::HardwareStatusChanged`] only when the
    /// readings differ from the previous snapshot. Returns whether a monitor
    /// was started.
    pub fn start_health_monitor(self: &Arc<Self>) -> bool {
        let Some(interval_secs) = self.config.health_interval_secs else {
            return false;
        };
        let interval =
            std::time::Duration::from_secs(interval_secs.max(MIN_HEALTH_INTERVAL_SECS));
        let terminal = Arc::downgrade(self);
        let shutdown = self.monitor_shutdown.clone();

        tokio::spawn(async move {
            let mut previous: Option<HardwareStatus> = None;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(terminal) = terminal.upgrade() else {
                    break;
                };
                terminal.health_tick(&mut previous).await;
            }
            debug!("health monitor stopped");
        });
        info!(interval_secs = interval.as_secs(), "health monitor started");
        true
    }

    /// One monitor pass: probe, emit on change, remember the snapshot.
    async fn health_tick(&self, previous: &mut Option<HardwareStatus>) {
        match self.diagnostics.probe().await {
            Ok(status) => {
                let changed = previous
                    .as_ref()
                    .map_or(true, |prev| !prev.same_readings(&status));
                if changed {
                    self.persist_status(&status);
                    self.events.emit(&TerminalEvent::HardwareStatusChanged {
                        status: status.clone(),
                    });
                }
                *previous = Some(status);
            }
            Err(e) => warn!(error = %e, "health probe failed"),
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Stop the health monitor and cancel any in-flight reads. In-flight
    /// native reads get a best-effort stop; callback slots are released.
    pub fn shutdown(&self) {
        self.monitor_shutdown.cancel();
        self.reads.shutdown();
        info!("terminal shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::SimulatedBridge;
    use crate::config::Environment;
    use crate::events::BroadcastSink;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::broadcast;
    use tokio::time::timeout;

    struct Harness {
        sim: Arc<SimulatedBridge>,
        terminal: Arc<LoyaltyTerminal>,
        events: broadcast::Receiver<TerminalEvent>,
        store: Arc<SqliteCustomerStore>,
    }

    fn harness() -> Harness {
        let sim = Arc::new(SimulatedBridge::new().with_delay(Duration::from_millis(10)));
        let database = Arc::new(crate::db::init_in_memory());
        let store = Arc::new(SqliteCustomerStore::new(Arc::clone(&database)));
        let sink = Arc::new(BroadcastSink::new(16));
        let events = sink.subscribe();

        let config = TerminalConfig {
            org_id: "org-1".into(),
            read_timeout_ms: 2_000,
            environment: Environment::Development,
            ..TerminalConfig::default()
        };
        let terminal = LoyaltyTerminal::new(
            config,
            Arc::clone(&sim) as Arc<dyn NativeBridge>,
            Arc::clone(&store) as Arc<dyn CustomerStore>,
            sink,
        );
        sim.connect(terminal.native_dispatcher());
        Harness {
            sim,
            terminal,
            events,
            store,
        }
    }

    async fn next_event(rx: &mut broadcast::Receiver<TerminalEvent>) -> TerminalEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event within 2s")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_nfc_scan_resolves_customer_end_to_end() -> anyhow::Result<()> {
        let mut h = harness();
        let customer = h.store.insert_customer("org-1", "Dario Fo", None, None)?;
        h.store
            .bind_card("org-1", "04A1B2C3", &customer.id, Some("staff-1"))?;
        h.sim.enqueue_result(
            ReadChannel::Nfc,
            json!({"success": true, "cardNo": "04:a1:b2:c3"}),
        );

        h.terminal.start_nfc_read()?;

        let scanned = next_event(&mut h.events).await;
        assert_eq!(scanned.name(), "card_scanned");

        let resolved = next_event(&mut h.events).await;
        match resolved {
            TerminalEvent::CustomerResolved { customer, accrual } => {
                assert_eq!(customer.name, "Dario Fo");
                assert_eq!(customer.visits, 1);
                assert!(accrual.accrued);
            }
            other => panic!("expected CustomerResolved, got {}", other.name()),
        }

        // Prompt toast first, success beep after resolution.
        let calls = h.sim.calls();
        assert!(calls.contains(&format!("toast:{NFC_PROMPT}")));
        assert!(calls.contains(&"beep:1x150".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_card_is_card_unknown_not_failure() {
        let mut h = harness();
        h.sim.enqueue_result(
            ReadChannel::Nfc,
            json!({"success": true, "cardNo": "DEADBEEF"}),
        );

        h.terminal.start_nfc_read().unwrap();

        let scanned = next_event(&mut h.events).await;
        assert_eq!(scanned.name(), "card_scanned");

        let unknown = next_event(&mut h.events).await;
        match unknown {
            TerminalEvent::CardUnknown {
                channel,
                identifier,
            } => {
                assert_eq!(channel, ReadChannel::Nfc);
                assert_eq!(identifier, "DEADBEEF");
            }
            other => panic!("expected CardUnknown, got {}", other.name()),
        }
        assert!(h.sim.calls().contains(&"beep:3x50".to_string()));
    }

    #[tokio::test]
    async fn test_qr_scan_resolves_by_customer_id() -> anyhow::Result<()> {
        let mut h = harness();
        let customer = h.store.insert_customer("org-1", "Rita Levi", None, None)?;
        h.sim.enqueue_result(
            ReadChannel::Qr,
            json!({"success": true, "content": format!("customer:{}", customer.id)}),
        );

        h.terminal.start_qr_read()?;

        let scanned = next_event(&mut h.events).await;
        assert_eq!(scanned.name(), "card_scanned");
        let resolved = next_event(&mut h.events).await;
        assert_eq!(resolved.name(), "customer_resolved");
        Ok(())
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_reading() {
        let h = harness();
        // Nothing scripted: the first session stays in Reading.
        h.terminal.start_nfc_read().unwrap();

        let err = h.terminal.start_nfc_read().unwrap_err();
        assert!(matches!(err, TerminalError::ReadBusy { .. }));
        assert_eq!(
            h.terminal.session_state(ReadChannel::Nfc),
            ReadSessionState::Reading
        );
    }

    #[tokio::test]
    async fn test_cancel_emits_read_cancelled() {
        let mut h = harness();
        h.terminal.start_nfc_read().unwrap();

        assert!(h.terminal.cancel_read(ReadChannel::Nfc));

        let event = next_event(&mut h.events).await;
        assert_eq!(event.name(), "read_cancelled");
        assert_eq!(
            h.terminal.session_state(ReadChannel::Nfc),
            ReadSessionState::Cancelled
        );
    }

    #[tokio::test]
    async fn test_failed_payload_emits_read_failed() {
        let mut h = harness();
        h.sim.enqueue_result(
            ReadChannel::Nfc,
            json!({"success": false, "error": "antenna fault"}),
        );

        h.terminal.start_nfc_read().unwrap();

        let event = next_event(&mut h.events).await;
        match event {
            TerminalEvent::ReadFailed { error, .. } => {
                assert!(error.contains("antenna fault"));
            }
            other => panic!("expected ReadFailed, got {}", other.name()),
        }
    }

    #[tokio::test]
    async fn test_probe_persists_snapshot_in_settings() -> anyhow::Result<()> {
        let sim = Arc::new(SimulatedBridge::new());
        let sink = Arc::new(BroadcastSink::new(8));
        let dir = std::env::temp_dir().join(format!("term_probe_{}", uuid::Uuid::new_v4()));
        let config = TerminalConfig {
            org_id: "org-1".into(),
            environment: Environment::Development,
            data_dir: dir.clone(),
            ..TerminalConfig::default()
        };

        let terminal = LoyaltyTerminal::with_sqlite(config, sim as Arc<dyn NativeBridge>, sink)?;
        let status = terminal.probe_hardware().await?;
        assert!(!status.simulated);

        let database = terminal.db.as_ref().expect("sqlite-backed terminal");
        let conn = database.conn.lock().unwrap();
        let stored = crate::db::get_setting(&conn, "diagnostics", "last_status")
            .expect("persisted snapshot");
        assert!(stored.contains("\"network\""));

        drop(conn);
        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }

    #[tokio::test]
    async fn test_health_tick_emits_only_on_change() {
        let mut h = harness();
        let mut previous = None;

        h.terminal.health_tick(&mut previous).await;
        let first = next_event(&mut h.events).await;
        assert_eq!(first.name(), "hardware_status_changed");

        // Same readings: no second event.
        h.terminal.health_tick(&mut previous).await;
        assert!(h.events.try_recv().is_err());

        // Network drops: readings change, event fires.
        h.sim.set_network_info(Some(json!({"connected": false})));
        h.terminal.health_tick(&mut previous).await;
        let third = next_event(&mut h.events).await;
        assert_eq!(third.name(), "hardware_status_changed");
    }

    #[tokio::test]
    async fn test_monitor_requires_configured_interval() {
        let h = harness();
        assert!(!h.terminal.start_health_monitor());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_open_reads() {
        let mut h = harness();
        h.terminal.start_nfc_read().unwrap();

        h.terminal.shutdown();

        assert_eq!(
            h.terminal.session_state(ReadChannel::Nfc),
            ReadSessionState::Cancelled
        );
        let event = next_event(&mut h.events).await;
        assert_eq!(event.name(), "read_cancelled");
    }
}
