use crate::error::{CoreError, CoreResult};
use crate::fault::classifier::classify;
use crate::ids::now_rfc3339_utc;
use crate::model::build::{BuildJob, FailureReason};
use crate::storage::records::RecordStore;

// Ticket payloads carry the message; keep it bounded.
const MAX_ERROR_CHARS: usize = 2048;

/// Applies one failure to the job in memory. Callers persist it as part of a
/// single record update.
pub fn apply_failure(job: &mut BuildJob, err: &CoreError, now: &str) -> FailureReason {
    let reason = classify(err);
    job.failure_count = job.failure_count.saturating_add(1);
    job.failure_reason = Some(reason);
    job.last_failed_at = Some(now.to_string());
    job.last_error = Some(err.to_string().chars().take(MAX_ERROR_CHARS).collect());
    reason
}

/// Persists a failure against the stored build in one atomic update.
pub fn record_failure(
    store: &RecordStore,
    build_id: &str,
    err: &CoreError,
) -> CoreResult<BuildJob> {
    let now = now_rfc3339_utc()?;
    store.update_build(build_id, |job| {
        apply_failure(job, err, &now);
        Ok(())
    })
}
