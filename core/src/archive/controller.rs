use crate::adapters::interface::{
    AgentDispatcher, AgentRequest, DurableStore, ObjectSource, TicketPayload, TicketingSystem,
};
use crate::archive::accumulator::ArchiveAccumulator;
use crate::archive::budget::AttemptBudget;
use crate::audit::event::AuditEvent;
use crate::audit::log::AuditLog;
use crate::config::ReliabilityConfig;
use crate::error::{CoreError, CoreResult};
use crate::fault::escalation::{EscalationDecision, EscalationPolicy};
use crate::fault::recorder::apply_failure;
use crate::ids::{new_build_id, now_rfc3339_utc};
use crate::model::build::{ArchiveObject, BuildJob, BuildStatus, BuildView, FailureReason};
use crate::model::incident::Severity;
use crate::storage::records::RecordStore;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const BUILD_SOURCE_TYPE: &str = "archive_build";

/// External collaborators of the build controller.
#[derive(Clone)]
pub struct BuildServices {
    pub source: Arc<dyn ObjectSource>,
    pub durable: Arc<dyn DurableStore>,
    pub ticketing: Arc<dyn TicketingSystem>,
    pub dispatcher: Arc<dyn AgentDispatcher>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildOutcome {
    pub build_id: String,
    pub status: BuildStatus,
    pub archive_path: Option<String>,
    pub archive_size_bytes: Option<u64>,
    pub archive_sha256: Option<String>,
    /// Checkpoints written by this attempt.
    pub chunks_committed: usize,
    pub failure_reason: Option<FailureReason>,
    pub decision: EscalationDecision,
    pub ticket_id: Option<String>,
    pub error: Option<String>,
}

impl BuildOutcome {
    fn ready(job: &BuildJob, chunks_committed: usize) -> Self {
        Self {
            build_id: job.build_id.clone(),
            status: job.status,
            archive_path: job.archive_path.clone(),
            archive_size_bytes: job.archive_size_bytes,
            archive_sha256: job.archive_sha256.clone(),
            chunks_committed,
            failure_reason: None,
            decision: EscalationDecision::default(),
            ticket_id: None,
            error: None,
        }
    }
}

pub struct BuildController {
    cfg: ReliabilityConfig,
    policy: EscalationPolicy,
    store: RecordStore,
    pub audit: AuditLog,
    scratch_dir: PathBuf,
    services: BuildServices,
}

impl BuildController {
    pub fn new(
        cfg: ReliabilityConfig,
        store: RecordStore,
        audit: AuditLog,
        scratch_dir: impl Into<PathBuf>,
        services: BuildServices,
    ) -> CoreResult<Self> {
        cfg.validate()?;
        Ok(Self {
            policy: EscalationPolicy::from_config(&cfg),
            cfg,
            store,
            audit,
            scratch_dir: scratch_dir.into(),
            services,
        })
    }

    /// Creates a build at `NONE`. Chunk size is pinned on the record.
    pub fn request(
        &mut self,
        request_id: &str,
        tenant_id: &str,
        objects: Vec<ArchiveObject>,
    ) -> CoreResult<BuildJob> {
        let now = now_rfc3339_utc()?;
        let job = BuildJob::new(
            new_build_id(),
            request_id.to_string(),
            tenant_id.to_string(),
            objects,
            self.cfg.chunk_size,
            &now,
        )?;
        self.store.insert_build(&job)?;
        self.emit(
            "BUILD_REQUESTED",
            &job,
            serde_json::json!({
                "request_id": job.request_id,
                "total_objects": job.total_objects(),
                "chunk_size": job.chunk_size,
            }),
        )?;
        info!(build_id = %job.build_id, total_objects = job.total_objects(), "build requested");
        Ok(job)
    }

    pub fn view(&self, build_id: &str) -> CoreResult<BuildView> {
        Ok(self
            .store
            .load_build(build_id)?
            .view(self.cfg.ticket_threshold))
    }

    /// Runs one attempt with the configured budget.
    pub fn build(&mut self, build_id: &str) -> CoreResult<BuildOutcome> {
        let budget = AttemptBudget::from_secs(self.cfg.attempt_budget_secs);
        self.build_with_budget(build_id, &budget)
    }

    /// Runs one attempt. Safe to call again after any failure: work resumes at
    /// `chunk_index + 1`. Faults are classified, recorded and escalated here and
    /// come back as a `FAILED` outcome; only caller/state errors and failures of
    /// the record store itself are returned as `Err`.
    pub fn build_with_budget(
        &mut self,
        build_id: &str,
        budget: &AttemptBudget,
    ) -> CoreResult<BuildOutcome> {
        let job = self.store.load_build(build_id)?;
        if job.objects.is_empty() {
            return Err(CoreError::EmptyBuild(build_id.to_string()));
        }
        if job.status == BuildStatus::READY {
            debug!(build_id, "build already ready");
            return Ok(BuildOutcome::ready(&job, 0));
        }
        if job.status == BuildStatus::FAILED {
            self.reject_if_escalated(&job)?;
        }

        let mut chunks_committed = 0;
        match self.run_attempt(build_id, budget, &mut chunks_committed) {
            Ok(outcome) => Ok(outcome),
            Err(err) if !err.is_fault() => Err(err),
            Err(err) => self.handle_failure(build_id, err, chunks_committed),
        }
    }

    /// Operator-initiated retry of a failed build. Rejected once the build is
    /// escalated or has a ticket.
    pub fn regenerate(&mut self, build_id: &str) -> CoreResult<BuildOutcome> {
        let job = self.store.load_build(build_id)?;
        if job.status != BuildStatus::FAILED {
            return Err(CoreError::InvalidTransition(format!(
                "only failed builds can be regenerated; {} is {:?}",
                build_id, job.status
            )));
        }
        self.reject_if_escalated(&job)?;

        self.store
            .update_build(build_id, |j| j.transition(BuildStatus::NONE))?;
        let outcome = self.build(build_id)?;
        if outcome.status == BuildStatus::READY && self.cfg.reset_failures_on_success {
            self.store.update_build(build_id, |j| {
                j.failure_count = 0;
                j.failure_reason = None;
                j.last_failed_at = None;
                j.last_error = None;
                Ok(())
            })?;
            info!(build_id, "failure history reset after successful regenerate");
        }
        Ok(outcome)
    }

    /// Escalated or ticketed builds are never retried. A missing ticket (the
    /// ticketing system was down when the threshold was crossed) is opened here.
    fn reject_if_escalated(&mut self, job: &BuildJob) -> CoreResult<()> {
        if job.can_regenerate_with(self.cfg.ticket_threshold) {
            return Ok(());
        }
        if self.policy.decide_for(job).open_ticket {
            self.open_ticket(&job.build_id)?;
        }
        let job = self.store.load_build(&job.build_id)?;
        self.emit(
            "BUILD_REGENERATE_REJECTED",
            &job,
            serde_json::json!({
                "failure_count": job.failure_count,
                "escalation_ticket_id": job.escalation_ticket_id,
            }),
        )?;
        warn!(
            build_id = %job.build_id,
            failure_count = job.failure_count,
            "retry rejected for escalated build"
        );
        Err(CoreError::RegenerateRejected(format!(
            "build {} has failed {} times and is escalated to support",
            job.build_id, job.failure_count
        )))
    }

    fn run_attempt(
        &mut self,
        build_id: &str,
        budget: &AttemptBudget,
        chunks_committed: &mut usize,
    ) -> CoreResult<BuildOutcome> {
        let job = self.store.update_build(build_id, |j| {
            if j.status != BuildStatus::BUILDING {
                j.transition(BuildStatus::BUILDING)?;
            }
            Ok(())
        })?;
        let source = Arc::clone(&self.services.source);
        let mut acc =
            ArchiveAccumulator::open_or_resume(&self.scratch_dir, build_id, job.scratch)?;

        // Scratch storage can be lost between attempts (new worker, wiped disk).
        // Put back committed entries without touching chunk_index.
        let missing: Vec<ArchiveObject> = job
            .committed_objects()
            .iter()
            .filter(|o| !acc.contains(&o.entry_name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            warn!(
                build_id,
                missing = missing.len(),
                "scratch archive lacks committed entries, restoring them"
            );
            let report = acc.append_chunk(&missing, source.as_ref(), budget)?;
            self.store.update_build(build_id, |j| {
                j.scratch = Some(report.checkpoint);
                Ok(())
            })?;
        }

        let first = (job.chunk_index + 1).max(0) as usize;
        for chunk in first..job.chunk_count() {
            let report = acc.append_chunk(job.chunk(chunk), source.as_ref(), budget)?;
            let chunk_index = chunk as i64;
            let updated = self.store.update_build(build_id, |j| {
                j.transition(BuildStatus::BUILDING)?;
                // Never move backwards if a concurrent attempt got further.
                j.chunk_index = j.chunk_index.max(chunk_index);
                j.scratch = Some(report.checkpoint);
                Ok(())
            })?;
            *chunks_committed += 1;
            self.emit(
                "BUILD_CHUNK_COMMITTED",
                &updated,
                serde_json::json!({
                    "chunk_index": chunk_index,
                    "entries_appended": report.appended,
                    "entries_skipped": report.skipped,
                }),
            )?;
            debug!(
                build_id,
                chunk_index,
                appended = report.appended,
                skipped = report.skipped,
                "chunk committed"
            );
        }

        // Phase 2: single durable write, then flip to READY.
        let archive_key = format!("archives/{}/{}.zip", job.tenant_id, build_id);
        let receipt = {
            let mut f = File::open(acc.path())?;
            self.services.durable.put(&archive_key, &mut f)?
        };
        let job = self.store.update_build(build_id, |j| {
            j.transition(BuildStatus::READY)?;
            j.archive_path = Some(receipt.path.clone());
            j.archive_size_bytes = Some(receipt.size_bytes);
            j.archive_sha256 = Some(receipt.sha256.clone());
            j.scratch = None;
            Ok(())
        })?;
        let entries = acc.entry_count();
        if let Err(e) = acc.discard() {
            warn!(build_id, error = %e, "failed to remove scratch archive");
        }
        // READY is persisted at this point; audit failures are logged only.
        if let Err(e) = self.emit(
            "BUILD_READY",
            &job,
            serde_json::json!({
                "archive_path": receipt.path,
                "archive_size_bytes": receipt.size_bytes,
                "archive_sha256": receipt.sha256,
            }),
        ) {
            warn!(build_id, error = %e, "failed to audit ready build");
        }
        info!(
            build_id,
            archive_path = %receipt.path,
            size_bytes = receipt.size_bytes,
            entries,
            chunks_committed = *chunks_committed,
            "build ready"
        );
        Ok(BuildOutcome::ready(&job, *chunks_committed))
    }

    fn handle_failure(
        &mut self,
        build_id: &str,
        err: CoreError,
        chunks_committed: usize,
    ) -> CoreResult<BuildOutcome> {
        let now = now_rfc3339_utc()?;
        let mut reason = FailureReason::UNKNOWN;
        let job = self.store.update_build(build_id, |j| {
            reason = apply_failure(j, &err, &now);
            j.transition(BuildStatus::FAILED)
        })?;
        warn!(
            build_id,
            failure_count = job.failure_count,
            reason = ?reason,
            error = %err,
            "build attempt failed"
        );
        self.emit(
            "BUILD_FAILED",
            &job,
            serde_json::json!({
                "failure_count": job.failure_count,
                "failure_reason": reason,
                "chunk_index": job.chunk_index,
                "error": err.to_string(),
            }),
        )?;

        let decision = self.policy.decide_for(&job);
        if decision.trigger_agent {
            self.trigger_agent(&job, reason)?;
        }
        let ticket_id = if decision.open_ticket {
            self.open_ticket(build_id)?
        } else {
            None
        };

        let job = self.store.load_build(build_id)?;
        Ok(BuildOutcome {
            build_id: build_id.to_string(),
            status: job.status,
            archive_path: None,
            archive_size_bytes: None,
            archive_sha256: None,
            chunks_committed,
            failure_reason: Some(reason),
            decision,
            ticket_id,
            error: Some(err.to_string()),
        })
    }

    // Agent triggering is not deduplicated; every qualifying failure gets a pass.
    fn trigger_agent(&mut self, job: &BuildJob, reason: FailureReason) -> CoreResult<()> {
        let req = AgentRequest {
            source_type: BUILD_SOURCE_TYPE.to_string(),
            source_id: job.build_id.clone(),
            tenant_id: job.tenant_id.clone(),
            reason: format!("{:?}", reason),
            failure_count: u64::from(job.failure_count),
        };
        if let Err(e) = self.services.dispatcher.trigger(&req) {
            // The failure is already recorded; the next attempt decides again.
            error!(build_id = %job.build_id, error = %e, "failed to trigger diagnostic agent");
            return Ok(());
        }
        self.emit(
            "AGENT_TRIGGERED",
            job,
            serde_json::json!({
                "reason": req.reason,
                "failure_count": req.failure_count,
            }),
        )?;
        info!(build_id = %job.build_id, reason = %req.reason, "diagnostic agent triggered");
        Ok(())
    }

    /// Creates the ticket inside the record update so a ticket is only ever
    /// created while the build has none.
    fn open_ticket(&mut self, build_id: &str) -> CoreResult<Option<String>> {
        let ticketing = Arc::clone(&self.services.ticketing);
        let max_attempts = self.cfg.max_attempts;
        let mut created: Option<String> = None;
        let result = self.store.update_build(build_id, |j| {
            if j.escalation_ticket_id.is_some() {
                return Ok(());
            }
            let payload = TicketPayload {
                idempotency_key: format!("{}:{}", BUILD_SOURCE_TYPE, j.build_id),
                source_type: BUILD_SOURCE_TYPE.to_string(),
                source_id: j.build_id.clone(),
                tenant_id: j.tenant_id.clone(),
                title: format!(
                    "Archive build {} failed {} times",
                    j.build_id, j.failure_count
                ),
                diagnostics: serde_json::json!({
                    "request_id": j.request_id,
                    "failure_count": j.failure_count,
                    "failure_reason": j.failure_reason,
                    "last_failed_at": j.last_failed_at,
                    "last_error": j.last_error,
                    "chunk_index": j.chunk_index,
                    "total_objects": j.total_objects(),
                    "max_attempts": max_attempts,
                }),
            };
            let ticket_id = ticketing.create(Severity::Error, &payload)?;
            j.escalation_ticket_id = Some(ticket_id.clone());
            created = Some(ticket_id);
            Ok(())
        });
        let job = match result {
            Ok(job) => job,
            Err(e) => {
                // Left unset so the next failure tries again.
                error!(build_id, error = %e, "failed to open support ticket");
                return Ok(None);
            }
        };
        if let Some(ticket_id) = &created {
            self.emit(
                "TICKET_OPENED",
                &job,
                serde_json::json!({
                    "ticket_id": ticket_id,
                    "severity": Severity::Error,
                }),
            )?;
            warn!(build_id, %ticket_id, "build escalated to support");
        }
        Ok(created)
    }

    fn emit(
        &mut self,
        event_type: &str,
        job: &BuildJob,
        details: serde_json::Value,
    ) -> CoreResult<()> {
        self.audit.append(AuditEvent::system(
            now_rfc3339_utc()?,
            event_type,
            &job.build_id,
            &job.tenant_id,
            details,
        ))?;
        Ok(())
    }
}
