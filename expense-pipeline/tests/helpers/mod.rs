//! Shared fixtures for pipeline integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use expense_common::blob::{BlobStore, InMemoryBlobStore};
use expense_common::db::{InMemoryRecordStore, RecordStore};
use expense_common::events::{EventBus, ExpenseEvent};
use expense_common::models::{json_path, Record, Status};
use expense_common::Error;
use expense_pipeline::dispatch::{Dispatcher, PipelineContext};
use expense_pipeline::enrich::{CurrencyService, EnrichError, Enricher};
use expense_pipeline::extraction::{
    ExtractionError, ExtractionProvider, JobPoll, ResultPoller, Submission,
};
use expense_pipeline::schema::Schema;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Raw Document AI document for a small USD receipt
pub fn document_ai_payload() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "entities": [
            { "type": "supplier_name", "mentionText": "Corner Deli" },
            { "type": "supplier_address", "mentionText": "12 Main St" },
            { "type": "receipt_date", "mentionText": "2024-03-01",
              "normalizedValue": { "dateValue": { "year": 2024, "month": 3, "day": 1 } } },
            { "type": "total_amount", "mentionText": "$40.00",
              "normalizedValue": { "moneyValue": { "currencyCode": "USD" } } },
            { "type": "total_tax_amount", "mentionText": "$8.00" }
        ]
    }))
    .unwrap()
}

/// Raw Document Intelligence analyze result for a EUR receipt
pub fn docu_intel_payload() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "status": "succeeded",
        "analyzeResult": { "documents": [{ "fields": {
            "MerchantName": { "valueString": "Café Central" },
            "TransactionDate": { "valueDate": "2024-04-02" },
            "Total": { "valueCurrency": { "amount": 12.5, "currencyCode": "EUR" } },
            "TotalTax": { "valueNumber": 2.0 }
        } }] }
    }))
    .unwrap()
}

/// Synchronous provider: stores a fixed payload during `process`
pub struct StoringProvider {
    pub blobs: Arc<dyn BlobStore>,
    pub payload: Vec<u8>,
    pub calls: AtomicU32,
}

impl StoringProvider {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Arc<Self> {
        Self::with_payload(blobs, document_ai_payload())
    }

    pub fn with_payload(blobs: Arc<dyn BlobStore>, payload: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            blobs,
            payload,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionProvider for StoringProvider {
    fn schema(&self) -> Schema {
        Schema::DocumentAi
    }

    async fn process(&self, record: &Record) -> Result<Submission, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.blobs.store(&json_path(record.id), &self.payload).await?;
        Ok(Submission::Stored)
    }
}

/// Asynchronous provider whose job succeeds on the given poll (never when `None`)
pub struct JobProvider {
    pub succeed_on: Option<u32>,
    pub polls: AtomicU32,
}

impl JobProvider {
    pub fn new(succeed_on: Option<u32>) -> Arc<Self> {
        Arc::new(Self {
            succeed_on,
            polls: AtomicU32::new(0),
        })
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionProvider for JobProvider {
    fn schema(&self) -> Schema {
        Schema::DocuIntel
    }

    async fn process(&self, record: &Record) -> Result<Submission, ExtractionError> {
        Ok(Submission::Submitted {
            job_id: format!("job-{}", record.id),
        })
    }

    async fn poll(&self, _job_id: &str) -> Result<JobPoll, ExtractionError> {
        let attempt = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.succeed_on {
            Some(k) if attempt >= k => Ok(JobPoll::Succeeded(docu_intel_payload())),
            _ => Ok(JobPoll::Running),
        }
    }
}

/// Provider that rejects every document
pub struct RejectingProvider;

#[async_trait]
impl ExtractionProvider for RejectingProvider {
    fn schema(&self) -> Schema {
        Schema::DocumentAi
    }

    async fn process(&self, _record: &Record) -> Result<Submission, ExtractionError> {
        Err(ExtractionError::Status {
            status: 400,
            body: "unsupported document".to_string(),
        })
    }
}

/// Record Store whose first `failures` updates are refused
pub struct FlakyRecords {
    pub inner: Arc<InMemoryRecordStore>,
    pub failures: AtomicU32,
}

impl FlakyRecords {
    pub fn new(inner: Arc<InMemoryRecordStore>, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failures: AtomicU32::new(failures),
        })
    }
}

#[async_trait]
impl RecordStore for FlakyRecords {
    async fn get(&self, id: Uuid) -> Result<Record, Error> {
        self.inner.get(id).await
    }

    async fn create(&self, record: &Record) -> Result<(), Error> {
        self.inner.create(record).await
    }

    async fn update(&self, record: &Record) -> Result<(), Error> {
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Error::Internal("connection reset".to_string()));
        }
        self.inner.update(record).await
    }
}

/// Blob Store refusing writes of names ending in `suffix`
pub struct RefusingBlobs {
    pub inner: Arc<InMemoryBlobStore>,
    pub suffix: &'static str,
}

#[async_trait]
impl BlobStore for RefusingBlobs {
    async fn get(&self, name: &str) -> Result<Vec<u8>, Error> {
        self.inner.get(name).await
    }

    async fn store(&self, name: &str, bytes: &[u8]) -> Result<(), Error> {
        if name.ends_with(self.suffix) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.store(name, bytes).await
    }
}

/// Currency service answering every lookup with one rate
pub struct FixedRate(pub f64);

#[async_trait]
impl CurrencyService for FixedRate {
    async fn get_rate(&self, _from: &str, _to: &str, _as_of: NaiveDate) -> Result<f64, EnrichError> {
        Ok(self.0)
    }
}

/// Dispatcher wired to in-memory stores
pub struct Harness {
    pub records: Arc<InMemoryRecordStore>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub bus: EventBus,
}

impl Harness {
    /// Poll unit is 1 ms so exhaustion takes about 10 ms
    pub fn start(
        provider: impl FnOnce(Arc<dyn BlobStore>) -> Arc<dyn ExtractionProvider>,
        enricher: Enricher,
    ) -> Self {
        Self::start_wrapped(
            provider,
            enricher,
            |records| records as Arc<dyn RecordStore>,
            |blobs| blobs as Arc<dyn BlobStore>,
        )
    }

    /// Like [`Harness::start`], with the pipeline seeing wrapped stores while
    /// the harness keeps reading the in-memory ones underneath
    pub fn start_wrapped(
        provider: impl FnOnce(Arc<dyn BlobStore>) -> Arc<dyn ExtractionProvider>,
        enricher: Enricher,
        wrap_records: impl FnOnce(Arc<InMemoryRecordStore>) -> Arc<dyn RecordStore>,
        wrap_blobs: impl FnOnce(Arc<InMemoryBlobStore>) -> Arc<dyn BlobStore>,
    ) -> Self {
        let records = Arc::new(InMemoryRecordStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let bus = EventBus::new(1024);

        let pipeline_records = wrap_records(records.clone());
        let shared_blobs = wrap_blobs(blobs.clone());

        let poller = ResultPoller::new(shared_blobs.clone()).with_unit(Duration::from_millis(1));
        let ctx = PipelineContext::new(pipeline_records, shared_blobs.clone(), provider(shared_blobs), poller)
            .with_enricher(enricher)
            .with_event_bus(bus.clone());

        Self {
            records,
            blobs,
            dispatcher: Dispatcher::start(ctx),
            bus,
        }
    }

    /// Persist a pending Record with an uploaded PDF
    pub async fn pending_record(&self) -> Record {
        let record = Record::new("receipt.pdf", "application/pdf", ".pdf");
        self.blobs.store(&record.path, b"%PDF-1.7").await.unwrap();
        self.records.create(&record).await.unwrap();
        record
    }

    /// Wait until the Record reaches a terminal status
    pub async fn wait_terminal(&self, id: Uuid) -> Record {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let record = self.records.get(id).await.unwrap();
                if record.status.is_terminal() {
                    return record;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("record did not reach a terminal status")
    }
}

/// Persisted statuses of `id` in the order the bus reported them
pub fn status_history(rx: &mut broadcast::Receiver<ExpenseEvent>, id: Uuid) -> Vec<Status> {
    let mut history = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ExpenseEvent::StatusChanged {
            record_id,
            new_status,
            ..
        } = event
        {
            if record_id == id {
                history.push(new_status);
            }
        }
    }
    history
}

/// Reasons of every stale event dropped for `id`
pub fn drop_reasons(rx: &mut broadcast::Receiver<ExpenseEvent>, id: Uuid) -> Vec<String> {
    let mut reasons = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ExpenseEvent::StaleEventDropped {
            record_id, reason, ..
        } = event
        {
            if record_id == id {
                reasons.push(reason);
            }
        }
    }
    reasons
}

/// Event kinds dispatched for `id`, in order
pub fn dispatched_kinds(rx: &mut broadcast::Receiver<ExpenseEvent>, id: Uuid) -> Vec<String> {
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ExpenseEvent::StageDispatched { record_id, kind, .. } = event {
            if record_id == id {
                kinds.push(kind);
            }
        }
    }
    kinds
}
