//! Pipeline Dispatcher
//!
//! One consumer task reads the event queue and spawns a handler task per
//! event; it never waits for a handler. Handlers write the Record's status and
//! submit the event for the next stage:
//!
//! ```text
//! new → runExtraction → processed → runNormalize → transformed
//!     → runEnrich → done → finalize
//! any error → failed → recordFailure
//! ```
//!
//! Handler and poll tasks run on a [`TaskTracker`] so [`Dispatcher::shutdown`]
//! can wait for in-flight work. The queue is unbounded: [`Dispatcher::pending`]
//! reports its depth but nothing limits it.

mod event;
mod ledger;
mod stages;

pub use event::{Event, EventKind};
pub use ledger::{Claim, ClaimRefused, SequenceLedger};

use chrono::Utc;
use expense_common::blob::BlobStore;
use expense_common::db::RecordStore;
use expense_common::events::{EventBus, ExpenseEvent};
use expense_common::models::Record;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::enrich::{EnrichError, Enricher};
use crate::extraction::{ExtractionError, ExtractionProvider, ResultPoller};
use crate::normalize::NormalizeError;

/// Interval at which shutdown re-checks for idleness
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Event queue is closed")]
    QueueClosed,

    #[error("Dispatcher is shutting down")]
    ShuttingDown,

    #[error("Drain timed out with {running} tasks running and {pending} events queued")]
    DrainTimeout { running: usize, pending: usize },
}

/// Why a stage failed; the `Display` text becomes the `failed` payload
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Enrich(#[from] EnrichError),

    #[error(transparent)]
    Storage(#[from] expense_common::Error),

    #[error("Cannot encode artifact: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Artifact {path} is not a valid expense: {source}")]
    Artifact {
        path: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("unknown event message: '{0}'")]
    UnknownEvent(String),
}

/// Collaborators shared by every stage handler
#[derive(Clone)]
pub struct PipelineContext {
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub provider: Arc<dyn ExtractionProvider>,
    pub poller: ResultPoller,
    pub enricher: Enricher,
    pub events: EventBus,
}

impl PipelineContext {
    /// Context with no post-processors and a private event bus
    pub fn new(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        provider: Arc<dyn ExtractionProvider>,
        poller: ResultPoller,
    ) -> Self {
        Self {
            records,
            blobs,
            provider,
            poller,
            enricher: Enricher::new(),
            events: EventBus::new(256),
        }
    }

    pub fn with_enricher(mut self, enricher: Enricher) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }
}

/// State shared between the consumer, the handlers and the [`Dispatcher`]
pub(crate) struct Shared {
    pub(crate) ctx: PipelineContext,
    pub(crate) ledger: Arc<SequenceLedger>,
    pub(crate) tracker: TaskTracker,
    tx: mpsc::UnboundedSender<Event>,
    /// Admitted but not yet handed to a handler task
    pending: AtomicUsize,
    closing: AtomicBool,
}

impl Shared {
    /// Queue an event from inside the pipeline; accepted during drain
    pub(crate) fn push(&self, event: Event) -> Result<(), DispatchError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(event).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(DispatchError::QueueClosed);
        }
        Ok(())
    }

    fn is_idle(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0 && self.tracker.is_empty()
    }
}

pub struct Dispatcher {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn the consumer task and return the handle used to submit events
    pub fn start(ctx: PipelineContext) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            ctx,
            ledger: Arc::new(SequenceLedger::new()),
            tracker: TaskTracker::new(),
            tx,
            pending: AtomicUsize::new(0),
            closing: AtomicBool::new(false),
        });
        let cancel = CancellationToken::new();

        let consumer = tokio::spawn(consume(shared.clone(), rx, cancel.clone()));
        info!("Pipeline dispatcher started");

        Arc::new(Self {
            shared,
            cancel,
            consumer: Mutex::new(Some(consumer)),
        })
    }

    /// Enqueue `kind` for `record`. Never waits for the event to be handled.
    pub fn submit(
        &self,
        kind: EventKind,
        record: Record,
        payload: Option<String>,
    ) -> Result<(), DispatchError> {
        if self.shared.closing.load(Ordering::SeqCst) {
            return Err(DispatchError::ShuttingDown);
        }
        let token = self.shared.ledger.enter(record.id);
        debug!(record_id = %record.id, kind = %kind, token, "Event submitted");
        self.shared.push(Event::new(record, kind, payload, token))
    }

    /// Events queued but not yet picked up by the consumer
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Handler and poll tasks currently running
    pub fn running(&self) -> usize {
        self.shared.tracker.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.closing.load(Ordering::SeqCst)
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.shared.ctx.events
    }

    /// Stop accepting external events and drain.
    ///
    /// Waits until the queue is empty and no handler or poll task is running,
    /// then stops the consumer. Returns [`DispatchError::DrainTimeout`] when
    /// work is still in flight after `timeout`; those tasks are left to finish
    /// on their own.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), DispatchError> {
        self.shared.closing.store(true, Ordering::SeqCst);
        info!(
            pending = self.pending(),
            running = self.running(),
            "Draining pipeline dispatcher"
        );

        let drained = tokio::time::timeout(timeout, async {
            while !self.shared.is_idle() {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok();

        self.cancel.cancel();
        self.shared.tracker.close();
        if let Some(consumer) = self.consumer.lock().await.take() {
            if let Err(e) = consumer.await {
                warn!(error = %e, "Dispatcher consumer ended abnormally");
            }
        }

        if !drained {
            let running = self.running();
            let pending = self.pending();
            warn!(running, pending, "Dispatcher drain timed out");
            return Err(DispatchError::DrainTimeout { running, pending });
        }

        self.shared.tracker.wait().await;
        info!("Pipeline dispatcher stopped");
        Ok(())
    }
}

/// Consumer loop: one handler task per event
async fn consume(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<Event>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        shared.ctx.events.emit_lossy(ExpenseEvent::StageDispatched {
            record_id: event.record.id,
            kind: event.kind.to_string(),
            timestamp: Utc::now(),
        });
        shared.tracker.spawn(stages::handle(shared.clone(), event));
        shared.pending.fetch_sub(1, Ordering::SeqCst);
    }
    debug!("Dispatcher consumer stopped");
}
