//! Result Poller
//!
//! Drives one asynchronous extraction job to a terminal state:
//!
//! ```text
//! submitted → polling → succeeded
//!                     ↘ exhausted
//! ```
//!
//! Each attempt is one status query. A running job and a failed query both
//! consume one attempt. After the n-th unsuccessful attempt the poller waits
//! `n` time units (linear backoff) unless the budget is spent. On success the
//! payload is stored at `<id>.json` and polling stops.
//!
//! The poller never touches the Record Store. Its outcome is returned to the
//! caller, which is the only writer of the Record's status.

use expense_common::blob::BlobStore;
use expense_common::models::json_path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ExtractionError, ExtractionProvider, JobPoll};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_UNIT: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct ResultPoller {
    max_attempts: u32,
    unit: Duration,
    blobs: Arc<dyn BlobStore>,
}

impl ResultPoller {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            unit: DEFAULT_UNIT,
            blobs,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait after the `attempt`-th unsuccessful poll
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.unit * attempt
    }

    /// Poll `job_id` until it succeeds or the budget runs out.
    ///
    /// Returns the number of attempts used on success. Exhaustion yields
    /// [`ExtractionError::Exhausted`]; a failure to store the final payload
    /// is returned as-is without further polling.
    pub async fn run(
        &self,
        provider: &dyn ExtractionProvider,
        record_id: Uuid,
        job_id: &str,
    ) -> Result<u32, ExtractionError> {
        let mut last_error = String::from("job still running");

        for attempt in 1..=self.max_attempts {
            debug!(record_id = %record_id, job_id, attempt, "Polling extraction job");

            match provider.poll(job_id).await {
                Ok(JobPoll::Succeeded(payload)) => {
                    self.blobs.store(&json_path(record_id), &payload).await?;
                    info!(record_id = %record_id, job_id, attempt, "Extraction job succeeded");
                    return Ok(attempt);
                }
                Ok(JobPoll::Running) => {
                    last_error = String::from("job still running");
                }
                Err(e) => {
                    warn!(record_id = %record_id, job_id, attempt, error = %e, "Job status query failed");
                    last_error = e.to_string();
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        warn!(
            record_id = %record_id,
            job_id,
            attempts = self.max_attempts,
            "Extraction job polling exhausted"
        );
        Err(ExtractionError::Exhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }
}
