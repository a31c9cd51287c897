use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::round_id::RoundIdentifier;
use crate::traits::{ConsensusEvent, RoundTimer};

/// Round timer backed by a spawned tokio sleep. Expiry is delivered as a
/// `RoundExpired` event on the sequence's event queue, so it is serialized
/// with message handling instead of racing it.
pub struct TokioRoundTimer {
    events: mpsc::UnboundedSender<ConsensusEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TokioRoundTimer {
    pub fn new(events: mpsc::UnboundedSender<ConsensusEvent>) -> Self {
        TokioRoundTimer {
            events,
            task: Mutex::new(None),
        }
    }
}

impl RoundTimer for TokioRoundTimer {
    fn start(&self, round: RoundIdentifier, timeout: Duration) {
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            debug!(round = %round, "round timer fired");
            // Receiver gone means the sequence driver already shut down
            let _ = events.send(ConsensusEvent::RoundExpired(round));
        });

        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
    }

    fn cancel(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }
}

impl Drop for TokioRoundTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Timer that never fires; used where round expiry is driven manually
#[derive(Debug, Default)]
pub struct NullRoundTimer;

impl RoundTimer for NullRoundTimer {
    fn start(&self, _round: RoundIdentifier, _timeout: Duration) {}
    fn cancel(&self) {}
}
