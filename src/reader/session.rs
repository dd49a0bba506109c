//! Read session state machine.
//!
//! One session is one read attempt on one channel. Three things race to end
//! it: the native result posted by the shell, the local timeout watchdog, and
//! an operator cancel. Whoever takes the state lock first performs the single
//! terminal transition; everyone else finds the session already done and is
//! dropped. The watchdog is disarmed and the callback registration released on
//! any terminal transition, so neither can outlive the session.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::{CallbackRegistry, NativeBridge, ReadChannel, ReadHandler, RegistrationToken};
use crate::error::TerminalError;
use crate::reader::normalizer::{self, ScanResult};

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadSessionState {
    Idle,
    Reading,
    Success,
    Error,
    Cancelled,
}

/// Terminal outcome of a session.
#[derive(Debug, Clone)]
pub enum ReadOutcome {
    Success(ScanResult),
    TimedOut { after_ms: u64 },
    Failed { error: String },
    Cancelled,
}

impl ReadOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReadOutcome::Success(_) => "success",
            ReadOutcome::TimedOut { .. } => "timeout",
            ReadOutcome::Failed { .. } => "failed",
            ReadOutcome::Cancelled => "cancelled",
        }
    }
}

enum Phase {
    Idle,
    Reading,
    Done(ReadOutcome),
}

/// A single read attempt. Created by `ReadManager`, shared with the callback
/// registry and the timeout watchdog through `Arc`.
pub struct ReadSession {
    id: Uuid,
    channel: ReadChannel,
    timeout: Duration,
    bridge: Arc<dyn NativeBridge>,
    started_at: DateTime<Utc>,
    phase: Mutex<Phase>,
    token: Mutex<Option<RegistrationToken>>,
    done_tx: Mutex<Option<oneshot::Sender<ReadOutcome>>>,
    watchdog: CancellationToken,
}

impl std::fmt::Debug for ReadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadSession")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("timeout", &self.timeout)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl ReadSession {
    /// Create an idle session. The receiver resolves with the terminal
    /// outcome once the session ends.
    pub fn new(
        channel: ReadChannel,
        timeout: Duration,
        bridge: Arc<dyn NativeBridge>,
    ) -> (Arc<Self>, oneshot::Receiver<ReadOutcome>) {
        let (done_tx, done_rx) = oneshot::channel();
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            channel,
            timeout,
            bridge,
            started_at: Utc::now(),
            phase: Mutex::new(Phase::Idle),
            token: Mutex::new(None),
            done_tx: Mutex::new(Some(done_tx)),
            watchdog: CancellationToken::new(),
        });
        (session, done_rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> ReadChannel {
        self.channel
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> ReadSessionState {
        let phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        match &*phase {
            Phase::Idle => ReadSessionState::Idle,
            Phase::Reading => ReadSessionState::Reading,
            Phase::Done(ReadOutcome::Success(_)) => ReadSessionState::Success,
            Phase::Done(ReadOutcome::Cancelled) => ReadSessionState::Cancelled,
            Phase::Done(_) => ReadSessionState::Error,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            *self.phase.lock().unwrap_or_else(|e| e.into_inner()),
            Phase::Done(_)
        )
    }

    /// Begin the read: register the result callback, tell the shell to start,
    /// arm the timeout watchdog.
    ///
    /// Must run inside a tokio runtime (the watchdog is spawned).
    pub fn start(session: &Arc<Self>, registry: &CallbackRegistry) -> Result<(), TerminalError> {
        {
            let mut phase = session.phase.lock().unwrap_or_else(|e| e.into_inner());
            match *phase {
                Phase::Idle => *phase = Phase::Reading,
                _ => {
                    return Err(TerminalError::ReadBusy {
                        channel: session.channel,
                    })
                }
            }
        }

        let weak = Arc::downgrade(session);
        let handler: ReadHandler = Arc::new(move |payload: Value| {
            if let Some(session) = weak.upgrade() {
                session.on_native_result(&payload);
            }
        });
        let token = registry.register(session.channel, handler)?;
        *session.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(token);

        if let Err(e) = session.bridge.start_read(session.channel) {
            session.finish(ReadOutcome::Failed {
                error: e.to_string(),
            });
            return Err(e.into());
        }

        let weak = Arc::downgrade(session);
        let watchdog = session.watchdog.clone();
        let timeout = session.timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = watchdog.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(session) = weak.upgrade() {
                        session.on_timeout();
                    }
                }
            }
        });

        info!(
            channel = %session.channel,
            session = %session.id,
            timeout_ms = session.timeout.as_millis() as u64,
            "read session started"
        );
        Ok(())
    }

    /// Handle a payload the shell posted for this session's channel.
    pub fn on_native_result(&self, payload: &Value) {
        let result = normalizer::normalize(self.channel, payload);
        let outcome = if result.cancelled {
            ReadOutcome::Cancelled
        } else if result.success {
            ReadOutcome::Success(result)
        } else {
            ReadOutcome::Failed {
                error: result
                    .error
                    .unwrap_or_else(|| "scan failed".to_string()),
            }
        };
        self.finish(outcome);
    }

    /// Operator cancel. Returns `true` if this call ended the session.
    pub fn cancel(&self) -> bool {
        let won = self.finish(ReadOutcome::Cancelled);
        if won {
            self.stop_native();
        }
        won
    }

    fn on_timeout(&self) {
        let after_ms = self.timeout.as_millis() as u64;
        let won = self.finish(ReadOutcome::TimedOut { after_ms });
        if won {
            warn!(
                channel = %self.channel,
                session = %self.id,
                after_ms,
                "read timed out"
            );
            self.stop_native();
        }
    }

    /// Best-effort native stop. The local state is already decided.
    fn stop_native(&self) {
        if let Err(e) = self.bridge.stop_read(self.channel) {
            debug!(channel = %self.channel, error = %e, "native stop_read failed");
        }
    }

    /// The single terminal transition. Returns `true` for the winner; every
    /// later caller is dropped with a debug log.
    fn finish(&self, outcome: ReadOutcome) -> bool {
        {
            let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
            match *phase {
                Phase::Reading => {}
                Phase::Idle => return false,
                Phase::Done(_) => {
                    debug!(
                        channel = %self.channel,
                        session = %self.id,
                        late = outcome.label(),
                        "late arrival after terminal transition, dropped"
                    );
                    return false;
                }
            }
            *phase = Phase::Done(outcome.clone());
        }

        self.watchdog.cancel();
        drop(self.token.lock().unwrap_or_else(|e| e.into_inner()).take());
        if let Some(tx) = self
            .done_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = tx.send(outcome.clone());
        }

        info!(
            channel = %self.channel,
            session = %self.id,
            outcome = outcome.label(),
            "read session finished"
        );
        true
    }
}
