use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use pinpoint_export_core::{
    buffer::{EventBuffer, FlushReason},
    config::Config,
    dispatch::{run_report_loop, DeliveryStats, Dispatcher, EventsApi},
    error::CoreError,
    event::RawEvent,
    filter::EventFilter,
};

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
///
/// This is the one context object for the exporter: constructed once at
/// startup, passed by reference, drained explicitly with
/// [`AppState::shutdown`].
pub struct AppState {
    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    /// Event names dropped before they reach the buffer.
    pub filter: EventFilter,

    /// Size- and time-bounded buffer. Its flushes go straight to the
    /// dispatcher task.
    pub buffer: Arc<EventBuffer>,

    pub stats: Arc<DeliveryStats>,

    /// Dispatcher and report tasks; taken by the first `shutdown`.
    background: Mutex<Option<Background>>,
}

struct Background {
    stop: oneshot::Sender<()>,
    dispatcher: JoinHandle<()>,
    reports: JoinHandle<()>,
}

/// Result of handing a batch of events to the exporter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub accepted: usize,
    pub ignored: usize,
}

impl AppState {
    /// Construct the state and spawn the dispatcher and report tasks.
    ///
    /// Must be called from within a Tokio runtime. The interval flush loop is
    /// not started here; see [`AppState::run_buffer_flush_loop`].
    pub fn new(config: Config, api: Arc<dyn EventsApi>) -> Self {
        let (buffer, flushes) = EventBuffer::from_config(&config);
        let dispatcher = Arc::new(Dispatcher::new(api, config.application_id.clone()));
        let stats = Arc::new(DeliveryStats::default());

        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = oneshot::channel();
        let background = Background {
            stop,
            dispatcher: tokio::spawn(dispatcher.run(flushes, reports_tx, stop_rx)),
            reports: tokio::spawn(run_report_loop(
                reports_rx,
                Arc::clone(&stats),
                config.application_id.clone(),
            )),
        };

        Self {
            filter: EventFilter::new(config.events_to_ignore.iter().cloned()),
            config: Arc::new(config),
            buffer: Arc::new(buffer),
            stats,
            background: Mutex::new(Some(background)),
        }
    }

    /// Filter `events` and append the survivors to the buffer in order.
    ///
    /// Counters reflect every event handled before an error, so a failed
    /// call still accounts for the events it already buffered.
    pub async fn ingest(&self, events: Vec<RawEvent>) -> Result<IngestOutcome, CoreError> {
        let mut outcome = IngestOutcome::default();
        let result = self.buffer_events(events, &mut outcome).await;
        self.stats.record_accepted(outcome.accepted as u64);
        self.stats.record_ignored(outcome.ignored as u64);
        result.map(|()| outcome)
    }

    async fn buffer_events(
        &self,
        events: Vec<RawEvent>,
        outcome: &mut IngestOutcome,
    ) -> Result<(), CoreError> {
        for event in events {
            if self.filter.should_ignore(&event) {
                debug!(event = %event.event, "Ignoring event");
                outcome.ignored += 1;
                continue;
            }
            self.buffer.add(event).await?;
            outcome.accepted += 1;
        }
        Ok(())
    }

    /// Flush whatever is buffered through the normal dispatch path.
    pub async fn flush_buffer(&self) -> usize {
        self.buffer.flush(FlushReason::Manual).await
    }

    /// Background loop: flush the buffer on the configured interval.
    ///
    /// Spawned as a `tokio::spawn` task in `main.rs`; aborted before
    /// [`AppState::shutdown`].
    pub async fn run_buffer_flush_loop(self: Arc<Self>) {
        Arc::clone(&self.buffer).run_flush_loop().await;
    }

    /// Flush the buffer one last time, then wait until every flushed batch
    /// (including ones queued or in flight before this call) has been
    /// delivered and its outcome logged and counted.
    ///
    /// Callers bound this with a timeout; delivery at shutdown is best
    /// effort. Later calls only flush.
    pub async fn shutdown(&self) {
        let drained = self.buffer.flush(FlushReason::Manual).await;
        let Some(background) = self.background.lock().await.take() else {
            return;
        };
        info!(drained, "Stopping dispatcher");

        if background.stop.send(()).is_err() {
            debug!("Dispatcher already stopped");
        }
        if let Err(e) = background.dispatcher.await {
            error!(error = %e, "Dispatcher task failed");
        }
        if let Err(e) = background.reports.await {
            error!(error = %e, "Report task failed");
        }
    }
}
