//! Progress events emitted by the coordinator
//!
//! Events are optional. Callers that want them pass a sender to
//! [`WaveCoordinator::with_events`](crate::coordinator::WaveCoordinator::with_events).
//! Sending never blocks the run; a dropped receiver is ignored.

use crate::aggregator::OverallStatus;
use crate::types::{WaveNumber, WaveState, WorkerId, WorkerStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Coordinator progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum CoordinatorEvent {
    /// An attempt of a wave started
    WaveStarted {
        /// Wave number
        wave: WaveNumber,
        /// 1-based attempt counter
        attempt: u32,
        /// Workers dispatched in this attempt
        workers: usize,
    },
    /// A worker finished deploy and validation
    WorkerSettled {
        /// Wave number
        wave: WaveNumber,
        /// Worker id
        worker_id: WorkerId,
        /// Resulting status
        status: WorkerStatus,
    },
    /// An attempt of a wave settled
    WaveSettled {
        /// Wave number
        wave: WaveNumber,
        /// State after the attempt
        state: WaveState,
        /// Aggregate confidence, if computed
        confidence: Option<f64>,
    },
    /// The run ended
    RunFinished {
        /// Final status
        status: OverallStatus,
    },
}

/// Sender half handed to the coordinator
pub type EventSender = mpsc::UnboundedSender<CoordinatorEvent>;

/// Receiver half kept by the caller
pub type EventReceiver = mpsc::UnboundedReceiver<CoordinatorEvent>;

/// Create an event channel
#[inline]
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Fire-and-forget emit on an optional sender
pub(crate) fn emit(sender: Option<&EventSender>, event: CoordinatorEvent) {
    if let Some(tx) = sender {
        // Receiver may be gone; the run does not depend on it.
        let _ = tx.send(event);
    }
}
