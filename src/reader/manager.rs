//! Per-channel session ownership.
//!
//! `ReadManager` enforces the one-live-session-per-channel rule: a start on a
//! channel whose session is still reading is rejected, the operator has to
//! cancel first. Finished sessions stay in the map until the next start so
//! their terminal state remains observable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::info;

use crate::bridge::{CallbackRegistry, NativeBridge, ReadChannel};
use crate::error::TerminalError;
use crate::reader::session::{ReadOutcome, ReadSession, ReadSessionState};

pub struct ReadManager {
    bridge: Arc<dyn NativeBridge>,
    registry: Arc<CallbackRegistry>,
    timeout: Duration,
    sessions: Mutex<HashMap<ReadChannel, Arc<ReadSession>>>,
}

impl ReadManager {
    pub fn new(
        bridge: Arc<dyn NativeBridge>,
        registry: Arc<CallbackRegistry>,
        timeout: Duration,
    ) -> Self {
        Self {
            bridge,
            registry,
            timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a read on `channel`.
    ///
    /// Returns the session and a receiver that resolves with its terminal
    /// outcome. Fails with [`TerminalError::ReadBusy`] while the channel's
    /// current session is still reading.
    pub fn start(
        &self,
        channel: ReadChannel,
    ) -> Result<(Arc<ReadSession>, oneshot::Receiver<ReadOutcome>), TerminalError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = sessions.get(&channel) {
            if !existing.is_finished() {
                return Err(TerminalError::ReadBusy { channel });
            }
        }

        let (session, done_rx) =
            ReadSession::new(channel, self.timeout, Arc::clone(&self.bridge));
        ReadSession::start(&session, &self.registry)?;
        sessions.insert(channel, Arc::clone(&session));
        Ok((session, done_rx))
    }

    /// Cancel the channel's session. Returns `true` if a reading session was
    /// actually cancelled; cancelling an idle or finished channel is a no-op.
    pub fn cancel(&self, channel: ReadChannel) -> bool {
        let session = {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.get(&channel).cloned()
        };
        match session {
            Some(session) => session.cancel(),
            None => false,
        }
    }

    /// Deliver a shell post. Returns `false` when no session was listening.
    pub fn dispatch_native(&self, channel: ReadChannel, payload: Value) -> bool {
        self.registry.dispatch(channel, payload)
    }

    /// Observable state of the channel's current session. A channel that has
    /// never read is `Idle`.
    pub fn session_state(&self, channel: ReadChannel) -> ReadSessionState {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(&channel)
            .map(|session| session.state())
            .unwrap_or(ReadSessionState::Idle)
    }

    /// Cancel anything still reading. Called on terminal shutdown.
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<ReadSession>> = {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.values().cloned().collect()
        };
        let mut cancelled = 0u32;
        for session in sessions {
            if session.cancel() {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(cancelled, "open read sessions cancelled on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::SimulatedBridge;
    use serde_json::json;

    fn manager_with_sim(timeout_ms: u64) -> (Arc<SimulatedBridge>, ReadManager) {
        let sim = Arc::new(SimulatedBridge::new());
        let manager = ReadManager::new(
            Arc::clone(&sim) as Arc<dyn NativeBridge>,
            Arc::new(CallbackRegistry::new()),
            Duration::from_millis(timeout_ms),
        );
        (sim, manager)
    }

    #[tokio::test]
    async fn test_second_start_on_reading_channel_is_rejected() {
        let (_sim, manager) = manager_with_sim(1_000);
        let (first, _rx) = manager.start(ReadChannel::Nfc).unwrap();

        let err = manager.start(ReadChannel::Nfc).unwrap_err();
        assert!(matches!(
            err,
            TerminalError::ReadBusy {
                channel: ReadChannel::Nfc
            }
        ));
        // The running session is untouched by the rejected start.
        assert_eq!(first.state(), ReadSessionState::Reading);
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let (_sim, manager) = manager_with_sim(1_000);
        let (_nfc, _rx1) = manager.start(ReadChannel::Nfc).unwrap();
        let (_qr, _rx2) = manager.start(ReadChannel::Qr).unwrap();

        assert_eq!(manager.session_state(ReadChannel::Nfc), ReadSessionState::Reading);
        assert_eq!(manager.session_state(ReadChannel::Qr), ReadSessionState::Reading);
    }

    #[tokio::test]
    async fn test_restart_allowed_after_terminal_state() {
        let (_sim, manager) = manager_with_sim(1_000);
        let (_session, rx) = manager.start(ReadChannel::Nfc).unwrap();

        manager.dispatch_native(ReadChannel::Nfc, json!({"success": true, "cardNo": "AA"}));
        rx.await.unwrap();
        assert_eq!(manager.session_state(ReadChannel::Nfc), ReadSessionState::Success);

        manager.start(ReadChannel::Nfc).unwrap();
        assert_eq!(manager.session_state(ReadChannel::Nfc), ReadSessionState::Reading);
    }

    #[tokio::test]
    async fn test_cancel_without_session_is_noop() {
        let (_sim, manager) = manager_with_sim(1_000);
        assert!(!manager.cancel(ReadChannel::Qr));
        assert_eq!(manager.session_state(ReadChannel::Qr), ReadSessionState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_open_sessions() {
        let (_sim, manager) = manager_with_sim(10_000);
        let (nfc, _rx1) = manager.start(ReadChannel::Nfc).unwrap();
        let (_qr, _rx2) = manager.start(ReadChannel::Qr).unwrap();

        manager.shutdown();
        assert_eq!(nfc.state(), ReadSessionState::Cancelled);
        assert_eq!(manager.session_state(ReadChannel::Qr), ReadSessionState::Cancelled);
    }
}
