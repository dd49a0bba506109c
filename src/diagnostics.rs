//! Hardware diagnostics.
//!
//! Provides:
//! - **Status probing**: [`HardwareDiagnosticsAggregator`] walks an ordered
//!   chain of probe strategies and merges the readings into one
//!   [`HardwareStatus`] snapshot per run.
//! - **About info**: version, build timestamp, git SHA, platform.
//! - **Diagnostics export**: packages the status snapshot, terminal config,
//!   and recent log files into a zip bundle.
//! - **Log rotation helpers**: used by `lib.rs` to configure rolling log files.

use std::fs;
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::bridge::NativeBridge;
use crate::config::{Environment, TerminalConfig};
use crate::error::{Result, TerminalError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// Maximum size per log file in bytes (5 MB).
pub const MAX_LOG_SIZE: u64 = 5 * 1024 * 1024;

/// Prefix shared by all rolling log files.
pub const LOG_FILE_PREFIX: &str = "tessera.log";

/// Subsystems covered by a snapshot.
const SUBSYSTEM_COUNT: usize = 5;

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

/// Health of one hardware subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsystemStatus {
    Online,
    Offline,
    Degraded,
    Unknown,
}

/// Probe stage that contributed the first readings of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    Injected,
    Aggregate,
    Subsystem,
    Inference,
    Simulated,
}

/// One probe run's view of the terminal hardware.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareStatus {
    pub nfc: SubsystemStatus,
    pub qr_scanner: SubsystemStatus,
    pub printer: SubsystemStatus,
    pub network: SubsystemStatus,
    pub display: SubsystemStatus,
    pub network_type: Option<String>,
    pub ip_address: Option<String>,
    pub source: StatusSource,
    /// True when any reading came from the simulated stage.
    pub simulated: bool,
    pub probed_at: DateTime<Utc>,
    pub online_count: usize,
    pub total: usize,
}

impl HardwareStatus {
    /// Compares readings, ignoring `probed_at`. The health monitor uses this
    /// to decide whether a re-probe is worth an event.
    pub fn same_readings(&self, other: &Self) -> bool {
        self.nfc == other.nfc
            && self.qr_scanner == other.qr_scanner
            && self.printer == other.printer
            && self.network == other.network
            && self.display == other.display
            && self.network_type == other.network_type
            && self.ip_address == other.ip_address
            && self.simulated == other.simulated
    }
}

/// Readings contributed by one probe stage. `None` means "no reading".
#[derive(Debug, Default)]
struct StatusPatch {
    nfc: Option<SubsystemStatus>,
    qr_scanner: Option<SubsystemStatus>,
    printer: Option<SubsystemStatus>,
    network: Option<SubsystemStatus>,
    display: Option<SubsystemStatus>,
    network_type: Option<String>,
    ip_address: Option<String>,
}

impl StatusPatch {
    fn is_empty(&self) -> bool {
        self.nfc.is_none()
            && self.qr_scanner.is_none()
            && self.printer.is_none()
            && self.network.is_none()
            && self.display.is_none()
            && self.network_type.is_none()
            && self.ip_address.is_none()
    }
}

#[derive(Debug, Default)]
struct ProbeAccumulator {
    readings: StatusPatch,
    source: Option<StatusSource>,
    simulated: bool,
}

impl ProbeAccumulator {
    /// Merges one stage's readings. Earlier stages win: a field that already
    /// holds a reading is never overwritten by a later stage.
    fn absorb(&mut self, stage: StatusSource, patch: StatusPatch) {
        let before = self.filled_count();
        fill(&mut self.readings.nfc, patch.nfc);
        fill(&mut self.readings.qr_scanner, patch.qr_scanner);
        fill(&mut self.readings.printer, patch.printer);
        fill(&mut self.readings.network, patch.network);
        fill(&mut self.readings.display, patch.display);
        fill(&mut self.readings.network_type, patch.network_type);
        fill(&mut self.readings.ip_address, patch.ip_address);
        if self.filled_count() > before {
            if self.source.is_none() {
                self.source = Some(stage);
            }
            if stage == StatusSource::Simulated {
                self.simulated = true;
            }
        }
    }

    fn filled_count(&self) -> usize {
        let r = &self.readings;
        [
            r.nfc.is_some(),
            r.qr_scanner.is_some(),
            r.printer.is_some(),
            r.network.is_some(),
            r.display.is_some(),
            r.network_type.is_some(),
            r.ip_address.is_some(),
        ]
        .iter()
        .filter(|filled| **filled)
        .count()
    }

    /// All five subsystems have a reading; later stages have nothing to add.
    fn subsystems_complete(&self) -> bool {
        let r = &self.readings;
        r.nfc.is_some()
            && r.qr_scanner.is_some()
            && r.printer.is_some()
            && r.network.is_some()
            && r.display.is_some()
    }

    /// `None` when no stage contributed anything.
    fn finish(self) -> Option<HardwareStatus> {
        let source = self.source?;
        let r = self.readings;
        let nfc = r.nfc.unwrap_or(SubsystemStatus::Unknown);
        let qr_scanner = r.qr_scanner.unwrap_or(SubsystemStatus::Unknown);
        let printer = r.printer.unwrap_or(SubsystemStatus::Unknown);
        let network = r.network.unwrap_or(SubsystemStatus::Unknown);
        let display = r.display.unwrap_or(SubsystemStatus::Unknown);
        let online_count = [nfc, qr_scanner, printer, network, display]
            .iter()
            .filter(|status| **status == SubsystemStatus::Online)
            .count();
        Some(HardwareStatus {
            nfc,
            qr_scanner,
            printer,
            network,
            display,
            network_type: r.network_type,
            ip_address: r.ip_address,
            source,
            simulated: self.simulated,
            probed_at: Utc::now(),
            online_count,
            total: SUBSYSTEM_COUNT,
        })
    }
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

// ---------------------------------------------------------------------------
// Payload parsing
// ---------------------------------------------------------------------------

/// Accepts either a JSON object or a JSON-encoded string holding one.
fn as_object(value: &Value) -> Option<serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

fn lookup<'a>(map: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| map.get(*key))
}

/// Maps the bridge's assorted status spellings onto [`SubsystemStatus`].
fn parse_subsystem_status(value: &Value) -> Option<SubsystemStatus> {
    match value {
        Value::Bool(true) => Some(SubsystemStatus::Online),
        Value::Bool(false) => Some(SubsystemStatus::Offline),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "online" | "connected" | "ready" | "ok" | "available" => Some(SubsystemStatus::Online),
            "offline" | "disconnected" | "unavailable" | "missing" => {
                Some(SubsystemStatus::Offline)
            }
            "degraded" | "checking" | "error" | "warning" => Some(SubsystemStatus::Degraded),
            _ => None,
        },
        _ => None,
    }
}

/// Parses a full snapshot object (the injected and aggregate stages share
/// this shape).
fn parse_snapshot_value(value: &Value) -> StatusPatch {
    let mut patch = StatusPatch::default();
    let Some(map) = as_object(value) else {
        return patch;
    };

    if let Some(v) = lookup(&map, &["nfc", "nfcReader", "nfc_reader"]) {
        patch.nfc = parse_subsystem_status(v);
    }
    if let Some(v) = lookup(&map, &["qrScanner", "qr_scanner", "scanner", "qr"]) {
        patch.qr_scanner = parse_subsystem_status(v);
    }
    if let Some(v) = lookup(&map, &["printer"]) {
        patch.printer = parse_subsystem_status(v);
    }
    if let Some(v) = lookup(&map, &["display", "screen"]) {
        patch.display = parse_subsystem_status(v);
    }
    if let Some(v) = lookup(&map, &["network", "wifi", "connectivity"]) {
        // Network may arrive nested as {connected, type, ip}.
        let network = parse_network_value(v);
        if network.is_empty() {
            patch.network = parse_subsystem_status(v);
        } else {
            patch.network = network.network;
            patch.network_type = network.network_type;
            patch.ip_address = network.ip_address;
        }
    }
    patch
}

/// Parses the bridge's `{connected, type, ip}` network payload.
fn parse_network_value(value: &Value) -> StatusPatch {
    let mut patch = StatusPatch::default();
    let Some(map) = as_object(value) else {
        return patch;
    };

    if let Some(connected) = lookup(&map, &["connected", "isConnected", "online"]) {
        patch.network = parse_subsystem_status(connected);
    }
    patch.network_type = lookup(&map, &["type", "networkType", "connection_type"])
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    patch.ip_address = lookup(&map, &["ip", "ipAddress", "ip_address"])
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    patch
}

/// Pulls a platform description out of the system info payload. A bare string
/// is taken as the description itself.
fn system_description(value: &Value) -> Option<String> {
    if let Some(map) = as_object(value) {
        return lookup(&map, &["platform", "os", "description", "model", "device"])
            .and_then(Value::as_str)
            .map(|s| s.to_string());
    }
    value.as_str().map(|s| s.to_string())
}

/// Infers capabilities from the platform description. Integrated Android
/// terminals carry an NFC reader, a scanner, and a receipt printer.
fn infer_from_platform(description: &str) -> StatusPatch {
    let mut patch = StatusPatch::default();
    let lowered = description.to_ascii_lowercase();
    if lowered.contains("android") {
        patch.nfc = Some(SubsystemStatus::Online);
        patch.qr_scanner = Some(SubsystemStatus::Online);
        patch.printer = Some(SubsystemStatus::Online);
    }
    if !lowered.trim().is_empty() {
        // Whatever reported a description is driving a screen.
        patch.display = Some(SubsystemStatus::Online);
    }
    patch
}

/// Development stand-in when no real stage produced readings.
fn simulated_patch() -> StatusPatch {
    StatusPatch {
        nfc: Some(SubsystemStatus::Online),
        qr_scanner: Some(SubsystemStatus::Online),
        printer: Some(SubsystemStatus::Online),
        network: Some(SubsystemStatus::Online),
        display: Some(SubsystemStatus::Online),
        network_type: Some("WiFi".to_string()),
        ip_address: Some("127.0.0.1".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Probes the bridge through an ordered chain of strategies and merges the
/// readings into one [`HardwareStatus`] snapshot.
///
/// Chain, cheapest first: injected snapshot, aggregate bridge call,
/// per-subsystem bridge calls, platform inference, simulated readings
/// (outside production only). A stage that fails or answers nothing degrades
/// to the next; readings already merged are never overwritten.
pub struct HardwareDiagnosticsAggregator {
    bridge: Arc<dyn NativeBridge>,
    environment: Environment,
    injected: Mutex<Option<Value>>,
    last: Mutex<Option<HardwareStatus>>,
    // Serializes strategy walks; probe() coalesces concurrent callers.
    walk_gate: tokio::sync::Mutex<()>,
    walk_generation: AtomicU64,
}

impl HardwareDiagnosticsAggregator {
    pub fn new(bridge: Arc<dyn NativeBridge>, environment: Environment) -> Self {
        Self {
            bridge,
            environment,
            injected: Mutex::new(None),
            last: Mutex::new(None),
            walk_gate: tokio::sync::Mutex::new(()),
            walk_generation: AtomicU64::new(0),
        }
    }

    /// Stores a snapshot pushed by the hosting shell, e.g. at app launch.
    /// The next probe consumes it as its first stage.
    pub fn inject_snapshot(&self, snapshot: Value) {
        let mut slot = self.injected.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(snapshot);
    }

    /// Last completed snapshot, if any probe has run.
    pub fn last_snapshot(&self) -> Option<HardwareStatus> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Runs the probe chain and returns the merged snapshot.
    ///
    /// Concurrent calls coalesce: a caller that arrives while a walk is in
    /// flight waits for it and shares its snapshot instead of starting a
    /// second walk.
    pub async fn probe(&self) -> Result<HardwareStatus> {
        let seen = self.walk_generation.load(Ordering::Acquire);
        let _walk = self.walk_gate.lock().await;
        if self.walk_generation.load(Ordering::Acquire) != seen {
            // A walk finished while this caller waited on the gate.
            if let Some(snapshot) = self.last_snapshot() {
                debug!("probe coalesced onto in-flight walk");
                return Ok(snapshot);
            }
        }

        let snapshot = self.walk_strategies()?;
        {
            let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
            *last = Some(snapshot.clone());
        }
        self.walk_generation.fetch_add(1, Ordering::Release);
        Ok(snapshot)
    }

    fn walk_strategies(&self) -> Result<HardwareStatus> {
        let mut acc = ProbeAccumulator::default();

        let injected = self
            .injected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(value) = injected {
            acc.absorb(StatusSource::Injected, parse_snapshot_value(&value));
        }

        if !acc.subsystems_complete() {
            match self.bridge.aggregate_hardware_info() {
                Ok(value) => acc.absorb(StatusSource::Aggregate, parse_snapshot_value(&value)),
                Err(e) => debug!(error = %e, "aggregate hardware info unavailable"),
            }
        }

        let mut description = None;
        if !acc.subsystems_complete() {
            match self.bridge.network_info() {
                Ok(value) => acc.absorb(StatusSource::Subsystem, parse_network_value(&value)),
                Err(e) => debug!(error = %e, "network info unavailable"),
            }
            match self.bridge.system_info() {
                Ok(value) => description = system_description(&value),
                Err(e) => debug!(error = %e, "system info unavailable"),
            }
        }

        if !acc.subsystems_complete() {
            if let Some(description) = &description {
                acc.absorb(StatusSource::Inference, infer_from_platform(description));
            }
        }

        if !acc.subsystems_complete() && self.environment != Environment::Production {
            let mut patch = simulated_patch();
            if acc.readings.network.is_some() {
                // Keep real network readings free of simulated addresses.
                patch.network_type = None;
                patch.ip_address = None;
            }
            acc.absorb(StatusSource::Simulated, patch);
        }

        match acc.finish() {
            Some(snapshot) => {
                debug!(
                    source = ?snapshot.source,
                    online = snapshot.online_count,
                    simulated = snapshot.simulated,
                    "hardware probe complete"
                );
                Ok(snapshot)
            }
            None => Err(TerminalError::bridge_unavailable(
                "no probe stage produced any hardware readings",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

/// Returns version, build timestamp, git SHA, and platform info.
pub fn about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Diagnostics export (zip bundle)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsExportOptions {
    pub include_logs: bool,
    pub redact_sensitive: bool,
}

impl Default for DiagnosticsExportOptions {
    fn default() -> Self {
        Self {
            include_logs: true,
            redact_sensitive: true,
        }
    }
}

/// Collects diagnostics data and writes a zip bundle into `output_dir`.
/// Returns the path to the zip file.
pub fn export_diagnostics(
    config: &TerminalConfig,
    status: Option<&HardwareStatus>,
    output_dir: &Path,
    options: DiagnosticsExportOptions,
) -> Result<PathBuf> {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let zip_name = format!("tessera-pos-diagnostics-{timestamp}.zip");
    let zip_path = output_dir.join(&zip_name);

    let file = fs::File::create(&zip_path).map_err(|e| {
        TerminalError::export_failed(format!("create {}: {e}", zip_path.display()))
    })?;
    let mut zip = zip::ZipWriter::new(file);
    let zip_options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    write_json_entry(&mut zip, "about.json", about_info(), options, zip_options)?;

    let status_value = match status {
        Some(status) => serde_json::to_value(status)
            .map_err(|e| TerminalError::export_failed(format!("serialize status: {e}")))?,
        None => Value::Null,
    };
    write_json_entry(
        &mut zip,
        "hardware_status.json",
        status_value,
        options,
        zip_options,
    )?;

    let config_value = serde_json::to_value(config)
        .map_err(|e| TerminalError::export_failed(format!("serialize config: {e}")))?;
    write_json_entry(&mut zip, "config.json", config_value, options, zip_options)?;

    if options.include_logs {
        append_log_files(&mut zip, zip_options);
    }

    zip.finish()
        .map_err(|e| TerminalError::export_failed(format!("finalize zip: {e}")))?;

    info!(path = %zip_path.display(), "diagnostics bundle written");
    Ok(zip_path)
}

fn write_json_entry(
    zip: &mut zip::ZipWriter<fs::File>,
    name: &str,
    value: Value,
    options: DiagnosticsExportOptions,
    zip_options: zip::write::SimpleFileOptions,
) -> Result<()> {
    let value = redact_value_for_export(value, options.redact_sensitive);
    let body = serde_json::to_string_pretty(&value)
        .map_err(|e| TerminalError::export_failed(format!("serialize {name}: {e}")))?;
    zip.start_file(name, zip_options)
        .map_err(|e| TerminalError::export_failed(format!("{name}: {e}")))?;
    zip.write_all(body.as_bytes())
        .map_err(|e| TerminalError::export_failed(format!("{name}: {e}")))?;
    Ok(())
}

fn append_log_files(
    zip: &mut zip::ZipWriter<fs::File>,
    zip_options: zip::write::SimpleFileOptions,
) {
    let dir = log_dir();
    if !dir.exists() {
        return;
    }
    let Ok(entries) = fs::read_dir(&dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(LOG_FILE_PREFIX) {
            continue;
        }
        let zip_entry = format!("logs/{name}");
        if zip.start_file(&zip_entry, zip_options).is_ok() {
            if let Ok(f) = fs::File::open(&path) {
                let mut buf = Vec::new();
                // Cap per file to keep the bundle manageable.
                let _ = f.take(MAX_LOG_SIZE).read_to_end(&mut buf);
                let _ = zip.write_all(&buf);
            }
        }
    }
}

fn redact_value_for_export(value: Value, enabled: bool) -> Value {
    if !enabled {
        return value;
    }
    redact_sensitive_fields(value)
}

fn redact_sensitive_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, value) in map {
                if should_redact_key(&key) {
                    redacted.insert(key, Value::String("[REDACTED]".to_string()));
                } else {
                    redacted.insert(key, redact_sensitive_fields(value));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(redact_sensitive_fields).collect())
        }
        other => other,
    }
}

fn should_redact_key(key: &str) -> bool {
    let normalized = key.to_ascii_lowercase();
    let sensitive_markers = [
        "api_key",
        "apikey",
        "secret",
        "password",
        "token",
        "authorization",
        "cookie",
        "pin",
    ];
    sensitive_markers
        .iter()
        .any(|marker| normalized.contains(marker))
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

/// Returns the log directory path (same location used by `lib.rs`).
pub fn log_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("com.tessera.pos").join("logs")
}

/// Prune old log files, keeping only the most recent [`MAX_LOG_FILES`].
pub fn prune_old_logs() {
    let dir = log_dir();
    if !dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(&dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if name.starts_with(LOG_FILE_PREFIX) {
                        let modified = entry
                            .metadata()
                            .ok()
                            .and_then(|m| m.modified().ok())
                            .unwrap_or(std::time::UNIX_EPOCH);
                        log_files.push((path, modified));
                    }
                }
            }
        }
    }

    // Sort newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{FeedbackCue, ReadChannel};
    use crate::error::BridgeError;

    struct SilentBridge;

    impl NativeBridge for SilentBridge {
        fn name(&self) -> &str {
            "silent"
        }
        fn start_read(&self, _channel: ReadChannel) -> std::result::Result<(), BridgeError> {
            Ok(())
        }
        fn stop_read(&self, _channel: ReadChannel) -> std::result::Result<(), BridgeError> {
            Ok(())
        }
        fn feedback(&self, _cue: &FeedbackCue) -> std::result::Result<(), BridgeError> {
            Ok(())
        }
    }

    struct CannedBridge {
        aggregate: Option<Value>,
        network: Option<Value>,
        system: Option<Value>,
    }

    impl NativeBridge for CannedBridge {
        fn name(&self) -> &str {
            "canned"
        }
        fn start_read(&self, _channel: ReadChannel) -> std::result::Result<(), BridgeError> {
            Ok(())
        }
        fn stop_read(&self, _channel: ReadChannel) -> std::result::Result<(), BridgeError> {
            Ok(())
        }
        fn feedback(&self, _cue: &FeedbackCue) -> std::result::Result<(), BridgeError> {
            Ok(())
        }
        fn aggregate_hardware_info(&self) -> std::result::Result<Value, BridgeError> {
            self.aggregate
                .clone()
                .ok_or_else(|| BridgeError::call_failed("aggregate_hardware_info", "none"))
        }
        fn network_info(&self) -> std::result::Result<Value, BridgeError> {
            self.network
                .clone()
                .ok_or_else(|| BridgeError::call_failed("network_info", "none"))
        }
        fn system_info(&self) -> std::result::Result<Value, BridgeError> {
            self.system
                .clone()
                .ok_or_else(|| BridgeError::call_failed("system_info", "none"))
        }
    }

    #[tokio::test]
    async fn test_silent_bridge_outside_production_yields_simulated_snapshot() {
        let agg =
            HardwareDiagnosticsAggregator::new(Arc::new(SilentBridge), Environment::Development);

        let status = agg.probe().await.unwrap();

        assert!(status.simulated);
        assert_eq!(status.source, StatusSource::Simulated);
        assert_eq!(status.online_count, 5);
        assert_eq!(status.total, 5);
        assert_ne!(status.nfc, SubsystemStatus::Unknown);
        assert_ne!(status.network, SubsystemStatus::Unknown);
        assert!(status.network_type.is_some());
    }

    #[tokio::test]
    async fn test_silent_bridge_in_production_is_bridge_unavailable() {
        let agg =
            HardwareDiagnosticsAggregator::new(Arc::new(SilentBridge), Environment::Production);

        let err = agg.probe().await.unwrap_err();
        assert!(matches!(err, TerminalError::BridgeUnavailable { .. }));
        assert!(agg.last_snapshot().is_none());
    }

    #[tokio::test]
    async fn test_injected_readings_are_not_overwritten() {
        let bridge = CannedBridge {
            aggregate: Some(json!({"nfc": "online", "printer": "online"})),
            network: None,
            system: None,
        };
        let agg = HardwareDiagnosticsAggregator::new(Arc::new(bridge), Environment::Development);
        agg.inject_snapshot(json!({"nfc": "offline"}));

        let status = agg.probe().await.unwrap();

        assert_eq!(status.nfc, SubsystemStatus::Offline);
        assert_eq!(status.printer, SubsystemStatus::Online);
        assert_eq!(status.source, StatusSource::Injected);
    }

    #[tokio::test]
    async fn test_aggregate_payload_may_be_json_encoded_string() {
        let bridge = CannedBridge {
            aggregate: Some(json!(
                "{\"printer\": true, \"network\": {\"connected\": true, \"type\": \"Ethernet\", \"ip\": \"10.0.0.9\"}}"
            )),
            network: None,
            system: None,
        };
        let agg = HardwareDiagnosticsAggregator::new(Arc::new(bridge), Environment::Production);

        let status = agg.probe().await.unwrap();

        assert_eq!(status.printer, SubsystemStatus::Online);
        assert_eq!(status.network, SubsystemStatus::Online);
        assert_eq!(status.network_type.as_deref(), Some("Ethernet"));
        assert_eq!(status.ip_address.as_deref(), Some("10.0.0.9"));
    }

    #[tokio::test]
    async fn test_subsystem_calls_and_platform_inference_fill_the_rest() {
        let bridge = CannedBridge {
            aggregate: None,
            network: Some(json!({"connected": true, "type": "WiFi", "ip": "192.168.4.20"})),
            system: Some(json!({"platform": "Android 13 (Z108)", "bridgeVersion": "2.4.1"})),
        };
        let agg = HardwareDiagnosticsAggregator::new(Arc::new(bridge), Environment::Development);

        let status = agg.probe().await.unwrap();

        assert_eq!(status.source, StatusSource::Subsystem);
        assert_eq!(status.network, SubsystemStatus::Online);
        assert_eq!(status.nfc, SubsystemStatus::Online);
        assert_eq!(status.qr_scanner, SubsystemStatus::Online);
        assert_eq!(status.display, SubsystemStatus::Online);
        // Every subsystem was resolved before the simulated stage.
        assert!(!status.simulated);
        assert_eq!(status.ip_address.as_deref(), Some("192.168.4.20"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_probes_coalesce_onto_one_walk() {
        use std::sync::atomic::AtomicUsize;

        struct SlowBridge {
            calls: AtomicUsize,
        }

        impl NativeBridge for SlowBridge {
            fn name(&self) -> &str {
                "slow"
            }
            fn start_read(&self, _channel: ReadChannel) -> std::result::Result<(), BridgeError> {
                Ok(())
            }
            fn stop_read(&self, _channel: ReadChannel) -> std::result::Result<(), BridgeError> {
                Ok(())
            }
            fn feedback(&self, _cue: &FeedbackCue) -> std::result::Result<(), BridgeError> {
                Ok(())
            }
            fn aggregate_hardware_info(&self) -> std::result::Result<Value, BridgeError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(100));
                Ok(json!({
                    "nfc": true, "scanner": true, "printer": true,
                    "display": true, "network": {"connected": true}
                }))
            }
        }

        let bridge = Arc::new(SlowBridge {
            calls: AtomicUsize::new(0),
        });
        let agg = Arc::new(HardwareDiagnosticsAggregator::new(
            bridge.clone(),
            Environment::Production,
        ));

        let first = tokio::spawn({
            let agg = agg.clone();
            async move { agg.probe().await.unwrap() }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let second = tokio::spawn({
            let agg = agg.clone();
            async move { agg.probe().await.unwrap() }
        });

        let (a, b) = (first.await.unwrap(), second.await.unwrap());
        assert_eq!(bridge.calls.load(Ordering::SeqCst), 1);
        assert!(a.same_readings(&b));
    }

    #[test]
    fn test_same_readings_ignores_probe_timestamp() {
        let mut acc = ProbeAccumulator::default();
        acc.absorb(StatusSource::Simulated, simulated_patch());
        let a = acc.finish().unwrap();
        let mut b = a.clone();
        b.probed_at = Utc::now() + chrono::Duration::seconds(90);
        assert!(a.same_readings(&b));

        b.printer = SubsystemStatus::Offline;
        assert!(!a.same_readings(&b));
    }

    #[test]
    fn test_platform_inference() {
        let android = infer_from_platform("Android 13 (Z108)");
        assert_eq!(android.nfc, Some(SubsystemStatus::Online));
        assert_eq!(android.printer, Some(SubsystemStatus::Online));

        let desktop = infer_from_platform("Ubuntu 22.04");
        assert_eq!(desktop.nfc, None);
        assert_eq!(desktop.display, Some(SubsystemStatus::Online));
    }

    #[test]
    fn test_status_spellings() {
        assert_eq!(
            parse_subsystem_status(&json!("Connected")),
            Some(SubsystemStatus::Online)
        );
        assert_eq!(
            parse_subsystem_status(&json!(false)),
            Some(SubsystemStatus::Offline)
        );
        assert_eq!(
            parse_subsystem_status(&json!("checking")),
            Some(SubsystemStatus::Degraded)
        );
        assert_eq!(parse_subsystem_status(&json!(42)), None);
    }

    #[test]
    fn test_about_info_has_required_fields() {
        let info = about_info();
        assert!(info.get("version").is_some());
        assert!(info.get("buildTimestamp").is_some());
        assert!(info.get("gitSha").is_some());
        assert!(info.get("platform").is_some());
    }

    #[test]
    fn test_redact_sensitive_fields_recurses_through_objects() {
        let value = json!({
            "token": "tk-val",
            "nested": {
                "api_key": "key-value",
                "status": "ok"
            },
            "items": [
                { "password": "1234" },
                { "name": "safe" }
            ]
        });
        let redacted = redact_sensitive_fields(value);
        assert_eq!(redacted["token"], "[REDACTED]");
        assert_eq!(redacted["nested"]["api_key"], "[REDACTED]");
        assert_eq!(redacted["nested"]["status"], "ok");
        assert_eq!(redacted["items"][0]["password"], "[REDACTED]");
        assert_eq!(redacted["items"][1]["name"], "safe");
    }

    #[test]
    fn test_export_creates_zip_with_status_and_config() {
        let dir = std::env::temp_dir().join(format!("diag_export_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut acc = ProbeAccumulator::default();
        acc.absorb(StatusSource::Simulated, simulated_patch());
        let status = acc.finish().unwrap();
        let config = TerminalConfig::default();

        let zip_path = export_diagnostics(
            &config,
            Some(&status),
            &dir,
            DiagnosticsExportOptions::default(),
        )
        .unwrap();
        assert!(zip_path.exists());

        let file = std::fs::File::open(&zip_path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        assert!(archive.len() >= 3);
        assert!(archive.by_name("hardware_status.json").is_ok());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
