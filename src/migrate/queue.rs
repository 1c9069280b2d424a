//! Bounded batch queue
//!
//! Single producer, single consumer, FIFO. Capacity is counted in batches.
//! The producer ends the stream with `close()`; a producer that goes away
//! without closing (it failed or panicked) is reported to the consumer as
//! `QueueError::Abandoned` instead of looking like a clean end.

use super::batch::Batch;
use std::fmt;
use tokio::sync::{mpsc, oneshot};

/// Create a queue holding at most `capacity` batches
///
/// # Panics
///
/// Panics if `capacity` is 0.
pub fn bounded(capacity: usize) -> (BatchSender, BatchReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let (closed_tx, closed_rx) = oneshot::channel();

    (
        BatchSender { tx, closed_tx },
        BatchReceiver {
            rx,
            closed_rx,
            drained: false,
        },
    )
}

/// Producer half, owned by the exporter
pub struct BatchSender {
    tx: mpsc::Sender<Batch>,
    closed_tx: oneshot::Sender<()>,
}

impl BatchSender {
    /// Hand a batch over, waiting while the queue is full
    ///
    /// Fails only if the consumer is gone; the batch is then dropped with it.
    pub async fn publish(&self, batch: Batch) -> Result<(), QueueError> {
        self.tx.send(batch).await.map_err(|_| QueueError::Closed)
    }

    /// Announce that no batch will follow
    ///
    /// Taking `self` makes a second close, or a publish after close,
    /// impossible to write.
    pub fn close(self) {
        let BatchSender { tx, closed_tx } = self;
        // The marker must be set before the channel shuts, the receiver
        // checks it once the channel reports no more senders.
        let _ = closed_tx.send(());
        drop(tx);
    }
}

/// Consumer half, owned by the importer
pub struct BatchReceiver {
    rx: mpsc::Receiver<Batch>,
    closed_rx: oneshot::Receiver<()>,
    drained: bool,
}

impl BatchReceiver {
    /// Wait for the next batch
    ///
    /// Returns `Ok(None)` once the queue was closed and every published batch
    /// has been handed out. Batches published before the producer went away
    /// are always delivered before `Abandoned` is reported.
    pub async fn next_or_done(&mut self) -> Result<Option<Batch>, QueueError> {
        if self.drained {
            return Ok(None);
        }

        if let Some(batch) = self.rx.recv().await {
            return Ok(Some(batch));
        }

        match self.closed_rx.try_recv() {
            Ok(()) => {
                self.drained = true;
                Ok(None)
            }
            Err(_) => Err(QueueError::Abandoned),
        }
    }
}

/// Queue errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The consumer went away, nothing reads the queue anymore
    Closed,

    /// The producer went away without closing the queue
    Abandoned,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Closed => write!(f, "batch queue has no consumer"),
            QueueError::Abandoned => write!(f, "batch producer stopped without closing the queue"),
        }
    }
}

impl std::error::Error for QueueError {}
