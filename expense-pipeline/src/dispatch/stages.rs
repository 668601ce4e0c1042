//! Stage handlers
//!
//! A handler claims its event's sequence token in [`admit`] before any side
//! effect and keeps the claim until [`commit`] persists the next status.
//! Every status write goes through [`commit`].

use chrono::Utc;
use expense_common::events::ExpenseEvent;
use expense_common::models::{expense_path, json_path, Expense, Record, Status};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{Claim, Event, EventKind, Shared, StageError};
use crate::extraction::Submission;
use crate::normalize;

/// Run the handler for `event`; a failure is turned into a `failed` event
pub(super) async fn handle(shared: Arc<Shared>, event: Event) {
    let Event {
        record,
        kind,
        payload,
        token,
    } = event;
    let snapshot = record.clone();

    let result = match &kind {
        EventKind::New => run_extraction(&shared, record, token).await,
        EventKind::Processed => run_normalize(&shared, record, payload, token).await,
        EventKind::Transformed => run_enrich(&shared, record, token).await,
        EventKind::Done => finalize(&shared, record, token).await,
        EventKind::Failed => {
            let reason = payload.unwrap_or_else(|| "unspecified failure".to_string());
            record_failure(&shared, &kind, record, reason, token).await
        }
        EventKind::Unknown(name) => {
            let reason = StageError::UnknownEvent(name.clone()).to_string();
            record_failure(&shared, &kind, record, reason, token).await
        }
    };

    if let Err(e) = result {
        match &kind {
            EventKind::Failed | EventKind::Unknown(_) => {
                error!(record_id = %snapshot.id, kind = %kind, error = %e, "Cannot record failure");
            }
            _ => fail(&shared, &kind, snapshot, token, e),
        }
    }
}

/// Route a stage error to `recordFailure`
fn fail(shared: &Shared, kind: &EventKind, record: Record, token: u64, e: StageError) {
    error!(record_id = %record.id, kind = %kind, error = %e, "Stage failed");
    let id = record.id;
    if let Err(submit_error) = shared.push(Event::failed(record, e.to_string(), token)) {
        error!(record_id = %id, error = %submit_error, "Cannot submit failure event");
    }
}

fn drop_stale(shared: &Shared, kind: &EventKind, id: Uuid, reason: String) {
    warn!(record_id = %id, kind = %kind, reason = %reason, "Dropping stale event");
    shared.ctx.events.emit_lossy(ExpenseEvent::StaleEventDropped {
        record_id: id,
        kind: kind.to_string(),
        reason,
        timestamp: Utc::now(),
    });
}

/// Fresh copy of the Record plus the claim on `token`, if its persisted
/// status can still move to `target` and no other handler owns the step.
/// Runs before any side effect of the stage.
async fn admit(
    shared: &Shared,
    kind: &EventKind,
    id: Uuid,
    token: u64,
    target: Status,
) -> Result<Option<(Record, Claim)>, StageError> {
    let record = shared.ctx.records.get(id).await?;
    if record.status.is_terminal() {
        shared.ledger.release(id);
        drop_stale(shared, kind, id, format!("record is already {}", record.status));
        return Ok(None);
    }
    if !record.status.can_transition_to(target) {
        drop_stale(
            shared,
            kind,
            id,
            format!("status {} cannot move to {}", record.status, target),
        );
        return Ok(None);
    }
    match shared.ledger.claim(id, token) {
        Ok(claim) => Ok(Some((record, claim))),
        Err(refused) => {
            drop_stale(shared, kind, id, refused.to_string());
            Ok(None)
        }
    }
}

/// Persist `next` for the claimed Record and advance its token.
///
/// Returns `None` without writing when the transition would regress or leave
/// a terminal state. The token only advances once the store accepted the
/// write; on a store error the claim is handed back so the `failed` event can
/// take it.
async fn commit(
    shared: &Shared,
    kind: &EventKind,
    claim: Claim,
    next: Status,
    mutate: impl FnOnce(&mut Record),
) -> Result<Option<(Record, u64)>, StageError> {
    let id = claim.id();
    let mut record = shared.ctx.records.get(id).await?;

    if !record.status.can_transition_to(next) {
        if record.status.is_terminal() {
            shared.ledger.release(id);
        }
        drop_stale(
            shared,
            kind,
            id,
            format!("status {} cannot move to {}", record.status, next),
        );
        return Ok(None);
    }

    mutate(&mut record);
    let old = record.transition_to(next);
    shared.ctx.records.update(&record).await?;
    let next_token = claim.advance();

    info!(record_id = %id, from = %old, to = %next, "Record status updated");
    shared.ctx.events.emit_lossy(ExpenseEvent::StatusChanged {
        record_id: id,
        old_status: old,
        new_status: next,
        timestamp: Utc::now(),
    });

    if next.is_terminal() {
        shared.ledger.release(id);
    }
    Ok(Some((record, next_token)))
}

async fn run_extraction(shared: &Arc<Shared>, record: Record, token: u64) -> Result<(), StageError> {
    let kind = EventKind::New;
    let Some((record, claim)) = admit(shared, &kind, record.id, token, Status::Processed).await?
    else {
        return Ok(());
    };

    match shared.ctx.provider.process(&record).await? {
        Submission::Stored => finish_extraction(shared, claim).await,
        Submission::Submitted { job_id } => {
            info!(record_id = %record.id, job_id = %job_id, "Extraction job submitted, polling for result");
            let poll_shared = shared.clone();
            shared.tracker.spawn(async move {
                let outcome = poll_shared
                    .ctx
                    .poller
                    .run(poll_shared.ctx.provider.as_ref(), record.id, &job_id)
                    .await;
                let result = match outcome {
                    Ok(_) => finish_extraction(&poll_shared, claim).await,
                    Err(e) => {
                        drop(claim);
                        Err(e.into())
                    }
                };
                if let Err(e) = result {
                    fail(&poll_shared, &kind, record, token, e);
                }
            });
            Ok(())
        }
    }
}

/// Single writer of `processed`, for both provider variants
async fn finish_extraction(shared: &Shared, claim: Claim) -> Result<(), StageError> {
    let schema = shared.ctx.provider.schema();
    let path = json_path(claim.id());

    let committed = commit(shared, &EventKind::New, claim, Status::Processed, |record| {
        record.json_path = Some(path)
    })
    .await?;

    if let Some((record, next_token)) = committed {
        shared.push(Event::new(
            record,
            EventKind::Processed,
            Some(schema.to_string()),
            next_token,
        ))?;
    }
    Ok(())
}

async fn run_normalize(
    shared: &Shared,
    record: Record,
    schema: Option<String>,
    token: u64,
) -> Result<(), StageError> {
    let kind = EventKind::Processed;
    let Some((record, claim)) = admit(shared, &kind, record.id, token, Status::Transformed).await?
    else {
        return Ok(());
    };

    let schema = schema.unwrap_or_else(|| shared.ctx.provider.schema().to_string());
    let normalizer = normalize::for_schema(&schema)?;
    let path = record.json_path.clone().unwrap_or_else(|| json_path(record.id));

    let raw = shared.ctx.blobs.get(&path).await?;
    let expense = normalizer.to_canonical(&raw)?;
    shared
        .ctx
        .blobs
        .store(&path, &serde_json::to_vec_pretty(&expense)?)
        .await?;
    debug!(record_id = %record.id, schema = %schema, "Expense normalized");

    if let Some((record, next_token)) =
        commit(shared, &kind, claim, Status::Transformed, |_| {}).await?
    {
        shared.push(Event::new(record, EventKind::Transformed, None, next_token))?;
    }
    Ok(())
}

/// Enrich and store `<id>-expense.json`; `done` itself is written by [`finalize`]
async fn run_enrich(shared: &Shared, record: Record, token: u64) -> Result<(), StageError> {
    let kind = EventKind::Transformed;
    let Some((record, claim)) = admit(shared, &kind, record.id, token, Status::Done).await? else {
        return Ok(());
    };

    let path = record.json_path.clone().unwrap_or_else(|| json_path(record.id));
    let bytes = shared.ctx.blobs.get(&path).await?;
    let mut expense: Expense = serde_json::from_slice(&bytes)
        .map_err(|source| StageError::Artifact { path, source })?;

    let report = shared.ctx.enricher.run(&mut expense).await;
    for (post_processor, reason) in report.skipped {
        shared.ctx.events.emit_lossy(ExpenseEvent::PostProcessorSkipped {
            record_id: record.id,
            post_processor: post_processor.to_string(),
            reason,
            timestamp: Utc::now(),
        });
    }

    shared
        .ctx
        .blobs
        .store(&expense_path(record.id), &serde_json::to_vec_pretty(&expense)?)
        .await?;
    debug!(record_id = %record.id, applied = ?report.applied, "Expense enriched");

    // No status write here; the step still moves the token on
    let next_token = claim.advance();
    shared.push(Event::new(record, EventKind::Done, None, next_token))?;
    Ok(())
}

async fn finalize(shared: &Shared, record: Record, token: u64) -> Result<(), StageError> {
    let kind = EventKind::Done;
    let Some((record, claim)) = admit(shared, &kind, record.id, token, Status::Done).await? else {
        return Ok(());
    };

    if commit(shared, &kind, claim, Status::Done, |_| {}).await?.is_some() {
        info!(record_id = %record.id, filename = %record.filename, "Expense pipeline complete");
    }
    Ok(())
}

/// Only writer of `failed`
async fn record_failure(
    shared: &Shared,
    kind: &EventKind,
    record: Record,
    reason: String,
    token: u64,
) -> Result<(), StageError> {
    let Some((record, claim)) = admit(shared, kind, record.id, token, Status::Failed).await? else {
        return Ok(());
    };

    let failure = reason.clone();
    if commit(shared, kind, claim, Status::Failed, |r| r.failure = Some(failure))
        .await?
        .is_some()
    {
        warn!(record_id = %record.id, reason = %reason, "Record failed");
    }
    Ok(())
}
