//! Tick ingestion queue for a collector
//!
//! Each running collector owns one bounded, ordered, single-consumer queue.
//! Transports hold a cloneable [`TickSink`] and push into it; the collector's
//! delivery task owns the matching [`TickQueue`] and drains it in FIFO order,
//! so ticks of one instrument are never applied concurrently or reordered.
//!
//! Overflow policy: async transports call [`TickSink::send`] and wait for
//! capacity. Callback transports that cannot wait call
//! [`TickSink::try_send`]; a full queue rejects the tick, which is counted as
//! received, dropped and an error.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use types::tick::Tick;

use crate::metrics::{CollectorMetrics, DropReason};

/// Errors raised when handing a tick to a collector.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestionError {
    #[error("tick queue full: capacity {capacity}")]
    QueueFull { capacity: usize },

    #[error("tick queue closed: collector is no longer consuming")]
    Closed,
}

/// A tick waiting in the queue, stamped on arrival for latency tracking.
#[derive(Debug, Clone)]
pub struct QueuedTick {
    pub tick: Tick,
    pub enqueued_at: Instant,
}

/// Create a bounded tick queue.
pub fn tick_queue(capacity: usize, metrics: Arc<CollectorMetrics>) -> (TickSink, TickQueue) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    debug!(capacity, "Tick queue created");
    (
        TickSink {
            tx,
            capacity,
            metrics,
        },
        TickQueue { rx },
    )
}

/// Producer handle given to a transport on connect.
#[derive(Clone)]
pub struct TickSink {
    tx: mpsc::Sender<QueuedTick>,
    capacity: usize,
    metrics: Arc<CollectorMetrics>,
}

impl TickSink {
    /// Enqueue a tick, waiting for capacity.
    pub async fn send(&self, tick: Tick) -> Result<(), IngestionError> {
        self.tx
            .send(QueuedTick {
                tick,
                enqueued_at: Instant::now(),
            })
            .await
            .map_err(|_| IngestionError::Closed)
    }

    /// Enqueue a tick without waiting. A full queue drops the tick.
    pub fn try_send(&self, tick: Tick) -> Result<(), IngestionError> {
        let queued = QueuedTick {
            tick,
            enqueued_at: Instant::now(),
        };
        match self.tx.try_send(queued) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                self.metrics.record_tick();
                self.metrics.record_error(DropReason::QueueOverflow);
                warn!(
                    token = %dropped.tick.instrument_token,
                    capacity = self.capacity,
                    "Tick queue full, dropping tick"
                );
                Err(IngestionError::QueueFull {
                    capacity: self.capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(IngestionError::Closed),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer end, owned by exactly one delivery task.
pub struct TickQueue {
    rx: mpsc::Receiver<QueuedTick>,
}

impl TickQueue {
    /// Next tick in arrival order. `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<QueuedTick> {
        self.rx.recv().await
    }

    /// Stop accepting new ticks. Already-queued ticks remain receivable.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
