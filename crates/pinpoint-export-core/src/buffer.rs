//! Size- and time-bounded in-memory event buffer.
//!
//! The buffer never talks to the destination. A flush drains the current
//! batch and hands it to the dispatcher over an unbounded channel, so callers
//! of [`EventBuffer::add`] never wait on network I/O.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::CoreError;
use crate::event::RawEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Accumulated bytes reached the upload limit.
    Size,
    /// The periodic timer fired with events pending.
    Interval,
    /// Explicit request, e.g. at shutdown.
    Manual,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Size => "size",
            FlushReason::Interval => "interval",
            FlushReason::Manual => "manual",
        }
    }
}

/// A drained batch on its way to the dispatcher.
#[derive(Debug)]
pub struct FlushedBatch {
    pub events: Vec<RawEvent>,
    pub bytes: usize,
    pub reason: FlushReason,
}

/// Point-in-time view of the buffer, read under a single lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferUsage {
    pub events: usize,
    pub bytes: usize,
}

/// Events accumulated since the last flush. `bytes` is always the exact sum
/// of the serialized sizes of `events`.
#[derive(Debug, Default)]
struct BufferedBatch {
    events: Vec<RawEvent>,
    bytes: usize,
}

impl BufferedBatch {
    fn take(&mut self, reason: FlushReason) -> FlushedBatch {
        let drained = std::mem::take(self);
        FlushedBatch {
            events: drained.events,
            bytes: drained.bytes,
            reason,
        }
    }
}

pub struct EventBuffer {
    /// Accumulate-and-check and drain-and-reset both run under this lock.
    batch: Mutex<BufferedBatch>,
    limit_bytes: usize,
    interval: Duration,
    flushes: mpsc::UnboundedSender<FlushedBatch>,
}

impl EventBuffer {
    /// Create a buffer and the receiving end its flushes are sent to.
    pub fn new(
        limit_bytes: usize,
        interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<FlushedBatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let buffer = Self {
            batch: Mutex::new(BufferedBatch::default()),
            limit_bytes,
            interval,
            flushes: tx,
        };
        (buffer, rx)
    }

    pub fn from_config(config: &Config) -> (Self, mpsc::UnboundedReceiver<FlushedBatch>) {
        Self::new(config.upload_bytes(), config.upload_interval())
    }

    /// Append `event`; flushes immediately once the byte limit is reached.
    pub async fn add(&self, event: RawEvent) -> Result<(), CoreError> {
        let size = event.serialized_size()?;
        let mut batch = self.batch.lock().await;
        batch.events.push(event);
        batch.bytes += size;
        if batch.bytes >= self.limit_bytes {
            let flushed = batch.take(FlushReason::Size);
            self.emit(flushed);
        }
        Ok(())
    }

    /// Drain whatever is buffered. Returns the number of events flushed; an
    /// empty buffer sends nothing.
    pub async fn flush(&self, reason: FlushReason) -> usize {
        match self.drain(reason).await {
            Some(flushed) => {
                let count = flushed.events.len();
                self.emit(flushed);
                count
            }
            None => 0,
        }
    }

    /// Drain the buffer without handing the batch to the dispatcher.
    pub async fn drain(&self, reason: FlushReason) -> Option<FlushedBatch> {
        let mut batch = self.batch.lock().await;
        if batch.events.is_empty() {
            return None;
        }
        Some(batch.take(reason))
    }

    pub async fn len(&self) -> usize {
        self.batch.lock().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.batch.lock().await.events.is_empty()
    }

    /// Serialized bytes currently buffered.
    pub async fn bytes(&self) -> usize {
        self.batch.lock().await.bytes
    }

    /// Event count and byte total taken together, so a concurrent flush
    /// cannot split them.
    pub async fn usage(&self) -> BufferUsage {
        let batch = self.batch.lock().await;
        BufferUsage {
            events: batch.events.len(),
            bytes: batch.bytes,
        }
    }

    pub fn limit_bytes(&self) -> usize {
        self.limit_bytes
    }

    /// Background loop: flush pending events every interval.
    ///
    /// The first tick is one full interval after start. Spawned once per
    /// process; runs until the task is aborted.
    pub async fn run_flush_loop(self: Arc<Self>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let flushed = self.flush(FlushReason::Interval).await;
            if flushed == 0 {
                debug!("Interval tick with empty buffer");
            }
        }
    }

    fn emit(&self, flushed: FlushedBatch) {
        info!(
            reason = flushed.reason.as_str(),
            count = flushed.events.len(),
            bytes = flushed.bytes,
            "Buffer flushed"
        );
        if let Err(e) = self.flushes.send(flushed) {
            warn!(
                count = e.0.events.len(),
                "Dispatcher is not running, flushed events dropped"
            );
        }
    }
}
