//! Flushed batch delivery.
//!
//! The dispatcher turns every [`FlushedBatch`] into one `PutEvents` call on a
//! spawned task and reports the outcome over a channel. Failed batches are
//! logged and dropped; nothing is re-buffered. On stop, batches already
//! queued or in flight are still delivered before the loop returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::batch::{build_batch_request, BatchRequest};
use crate::buffer::{FlushReason, FlushedBatch};
use crate::error::DispatchError;

/// The destination event-ingestion API.
///
/// Implementations must be safe to call from several dispatch tasks at once.
#[async_trait]
pub trait EventsApi: Send + Sync + 'static {
    async fn put_events(
        &self,
        application_id: &str,
        request: &BatchRequest,
    ) -> Result<(), DispatchError>;
}

/// Outcome of one flush cycle's delivery.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub reason: FlushReason,
    /// Raw events drained by the flush.
    pub events: usize,
    /// Batch entries (distinct batch keys) in the request.
    pub entries: usize,
    pub result: Result<(), DispatchError>,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn log(&self, application_id: &str) {
        match &self.result {
            Ok(()) => info!(
                count = self.events,
                entries = self.entries,
                reason = self.reason.as_str(),
                application_id,
                "Delivered events to Pinpoint"
            ),
            Err(e) => error!(
                count = self.events,
                entries = self.entries,
                reason = self.reason.as_str(),
                application_id,
                error = %e,
                "Failed to deliver events to Pinpoint, batch dropped"
            ),
        }
    }
}

/// Process-wide counters, exposed on the health endpoint.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    accepted: AtomicU64,
    ignored: AtomicU64,
    flushes: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliverySnapshot {
    pub accepted: u64,
    pub ignored: u64,
    pub flushes: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl DeliveryStats {
    pub fn record_accepted(&self, count: u64) {
        self.accepted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_ignored(&self, count: u64) {
        self.ignored.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_report(&self, report: &DispatchReport) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        let counter = if report.is_success() {
            &self.delivered
        } else {
            &self.failed
        };
        counter.fetch_add(report.events as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeliverySnapshot {
        DeliverySnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct Dispatcher {
    api: Arc<dyn EventsApi>,
    application_id: String,
}

impl Dispatcher {
    pub fn new(api: Arc<dyn EventsApi>, application_id: impl Into<String>) -> Self {
        Self {
            api,
            application_id: application_id.into(),
        }
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    /// Build the request for `batch` and submit it, waiting for the answer.
    pub async fn deliver(&self, batch: FlushedBatch) -> DispatchReport {
        let request = build_batch_request(&batch.events);
        let result = if request.is_empty() {
            Ok(())
        } else {
            self.api.put_events(&self.application_id, &request).await
        };
        DispatchReport {
            reason: batch.reason,
            events: batch.events.len(),
            entries: request.len(),
            result,
        }
    }

    /// Background loop: deliver every flushed batch on its own task and
    /// forward each outcome to `reports`. Successive deliveries may complete
    /// out of order.
    ///
    /// Returns once the flush channel closes or `stop` fires. Either way,
    /// batches still queued on the channel and deliveries in flight are
    /// awaited first. `reports` is dropped on return, which ends
    /// [`run_report_loop`].
    pub async fn run(
        self: Arc<Self>,
        mut flushes: mpsc::UnboundedReceiver<FlushedBatch>,
        reports: mpsc::UnboundedSender<DispatchReport>,
        mut stop: oneshot::Receiver<()>,
    ) {
        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                batch = flushes.recv() => match batch {
                    Some(batch) => self.spawn_delivery(&mut in_flight, batch),
                    None => break,
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    forward(&reports, joined);
                }
                _ = &mut stop => break,
            }
        }

        flushes.close();
        while let Some(batch) = flushes.recv().await {
            self.spawn_delivery(&mut in_flight, batch);
        }
        if !in_flight.is_empty() {
            info!(pending = in_flight.len(), "Waiting for in-flight deliveries");
        }
        while let Some(joined) = in_flight.join_next().await {
            forward(&reports, joined);
        }
        debug!("Dispatcher stopped");
    }

    fn spawn_delivery(
        self: &Arc<Self>,
        in_flight: &mut JoinSet<DispatchReport>,
        batch: FlushedBatch,
    ) {
        let this = Arc::clone(self);
        in_flight.spawn(async move { this.deliver(batch).await });
    }
}

fn forward(
    reports: &mpsc::UnboundedSender<DispatchReport>,
    joined: Result<DispatchReport, JoinError>,
) {
    match joined {
        Ok(report) => {
            if reports.send(report).is_err() {
                debug!("Report channel closed, dispatch outcome not recorded");
            }
        }
        Err(e) => error!(error = %e, "Delivery task did not complete"),
    }
}

/// Background loop: log every dispatch outcome and update the counters.
pub async fn run_report_loop(
    mut reports: mpsc::UnboundedReceiver<DispatchReport>,
    stats: Arc<DeliveryStats>,
    application_id: String,
) {
    while let Some(report) = reports.recv().await {
        report.log(&application_id);
        stats.record_report(&report);
    }
}
