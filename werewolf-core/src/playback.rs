//! The speech-playback rendezvous.
//!
//! After a statement is broadcast, the moderator waits until the presentation
//! side reports that the speaker's audio finished. The gate holds a single slot
//! keyed by the expected speaker. Acknowledgments for anyone else are dropped,
//! and the wait is bounded so a silent front end never blocks the game.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct PlaybackGate {
    expected: Mutex<Option<String>>,
    notify: Notify,
}

impl PlaybackGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<String>> {
        self.expected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start expecting an acknowledgment for `speaker`, replacing any previous one.
    pub(crate) fn arm(&self, speaker: &str) {
        *self.slot() = Some(speaker.to_string());
    }

    /// The speaker currently awaited, if any.
    pub fn expected(&self) -> Option<String> {
        self.slot().clone()
    }

    /// Report that `speaker`'s playback finished.
    ///
    /// Returns `false` and changes nothing when `speaker` is not the one awaited.
    pub fn ack(&self, speaker: &str) -> bool {
        let mut slot = self.slot();
        if slot.as_deref() != Some(speaker) {
            warn!(
                speaker,
                expected = slot.as_deref().unwrap_or("nobody"),
                "Ignoring playback acknowledgment"
            );
            return false;
        }
        *slot = None;
        drop(slot);
        self.notify.notify_one();
        true
    }

    /// Wait until the armed speaker is acknowledged or `timeout` elapses.
    ///
    /// Returns `true` on acknowledgment. On timeout the slot is cleared, a
    /// warning is logged and `false` is returned.
    pub(crate) async fn wait_for(&self, speaker: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.slot().as_deref() != Some(speaker) {
                debug!(speaker, "Playback acknowledged");
                return true;
            }
            if timeout_at(deadline, self.notify.notified()).await.is_err() {
                let mut slot = self.slot();
                if slot.as_deref() != Some(speaker) {
                    return true;
                }
                *slot = None;
                warn!(speaker, timeout_ms = timeout.as_millis() as u64, "Playback timed out");
                return false;
            }
        }
    }

    /// Drop any pending expectation.
    pub(crate) fn disarm(&self) {
        *self.slot() = None;
    }
}
