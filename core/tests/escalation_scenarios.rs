mod common;

use archive_core::error::CoreError;
use archive_core::fault::escalation::{EscalationAction, EscalationPolicy};
use archive_core::model::build::{BuildStatus, FailureReason};
use common::{FailMode, Harness};

fn rejections(h: &Harness) -> usize {
    archive_core::audit::log::AuditLog::open_or_create(
        h.dir.path().join("audit").join("builds.ndjson"),
    )
    .unwrap()
    .read_all()
    .unwrap()
    .iter()
    .filter(|e| e.event_type == "BUILD_REGENERATE_REJECTED")
    .count()
}

#[test]
fn three_failures_escalate_to_one_ticket_and_block_regenerate() {
    let h = Harness::new(3, 2);
    let mut c = h.controller();
    let job = c.request("req_1", "t_1", h.objects.clone()).unwrap();
    let first_key = h.objects[0].key.clone();
    h.source.fail_next(
        &first_key,
        &[FailMode::Timeout, FailMode::Read, FailMode::Permission],
    );

    // Attempt 1: timeout goes straight to the agent, no ticket.
    let a1 = c.build(&job.build_id).unwrap();
    let v1 = c.view(&job.build_id).unwrap();
    assert_eq!(a1.status, BuildStatus::FAILED);
    assert_eq!(v1.failure_count, 1);
    assert_eq!(v1.failure_reason, Some(FailureReason::TIMEOUT));
    assert!(v1.last_failed_at.is_some());
    assert_eq!(a1.decision.actions(), vec![EscalationAction::TRIGGER_AGENT]);
    assert_eq!(h.agent.count(), 1);
    assert_eq!(h.tickets.count(), 0);
    assert!(v1.can_regenerate);

    // Attempt 2: second failure of any kind triggers the agent again.
    let a2 = c.build(&job.build_id).unwrap();
    let v2 = c.view(&job.build_id).unwrap();
    assert_eq!(v2.failure_count, 2);
    assert_eq!(v2.failure_reason, Some(FailureReason::S3_READ_ERROR));
    assert!(a2.decision.trigger_agent);
    assert_eq!(h.agent.count(), 2);
    assert_eq!(h.tickets.count(), 0);
    assert!(v2.can_regenerate);
    assert!(!v2.is_escalated);

    // Attempt 3: agent and ticket together.
    let a3 = c.build(&job.build_id).unwrap();
    let v3 = c.view(&job.build_id).unwrap();
    assert_eq!(v3.failure_count, 3);
    assert_eq!(v3.failure_reason, Some(FailureReason::PERMISSION_ERROR));
    assert_eq!(
        a3.decision.actions(),
        vec![EscalationAction::TRIGGER_AGENT, EscalationAction::OPEN_TICKET]
    );
    assert_eq!(h.agent.count(), 3);
    assert_eq!(h.tickets.count(), 1);
    assert_eq!(a3.ticket_id.as_deref(), Some("T-1"));
    assert_eq!(v3.escalation_ticket_id.as_deref(), Some("T-1"));
    assert!(v3.is_escalated);
    assert!(!v3.can_regenerate);

    let (_, payload) = h.tickets.created.lock().unwrap()[0].clone();
    assert_eq!(payload.source_id, job.build_id);
    assert_eq!(payload.tenant_id, "t_1");
    assert_eq!(
        payload.idempotency_key,
        format!("archive_build:{}", job.build_id)
    );
    assert_eq!(
        payload.diagnostics.get("failure_count").and_then(|x| x.as_u64()),
        Some(3)
    );

    // Regenerate is refused with a non-retryable validation error.
    let r = c.regenerate(&job.build_id);
    match r {
        Err(e @ CoreError::RegenerateRejected(_)) => {
            assert!(!e.is_retryable());
            assert!(!e.is_fault());
        }
        other => panic!("expected RegenerateRejected, got {:?}", other),
    }
    assert_eq!(h.store.load_build(&job.build_id).unwrap().failure_count, 3);
}

#[test]
fn repeated_timeouts_escalate_once_then_retries_stop() {
    let h = Harness::new(2, 2);
    let mut c = h.controller();
    let job = c.request("req_1", "t_1", h.objects.clone()).unwrap();
    h.source.fail_next(&h.objects[0].key, &[FailMode::Timeout; 5]);

    for _ in 0..3 {
        c.build(&job.build_id).unwrap();
    }
    assert_eq!(h.agent.count(), 3);
    assert_eq!(h.tickets.count(), 1);

    // Queue redelivery of an escalated build does no work.
    for _ in 0..2 {
        assert!(matches!(
            c.build(&job.build_id),
            Err(CoreError::RegenerateRejected(_))
        ));
    }
    let stored = h.store.load_build(&job.build_id).unwrap();
    assert_eq!(stored.status, BuildStatus::FAILED);
    assert_eq!(stored.failure_count, 3);
    assert_eq!(h.agent.count(), 3);
    assert_eq!(h.tickets.count(), 1);
    assert_eq!(stored.escalation_ticket_id.as_deref(), Some("T-1"));
    assert_eq!(h.source.reads_of(&h.objects[0].key), 3);
    assert_eq!(rejections(&h), 2);
}

#[test]
fn ticket_outage_is_retried_when_the_build_is_next_picked_up() {
    let h = Harness::new(1, 1);
    let mut c = h.controller();
    let job = c.request("req_1", "t_1", h.objects.clone()).unwrap();
    h.source.fail_next(&h.objects[0].key, &[FailMode::Read; 4]);

    c.build(&job.build_id).unwrap();
    c.build(&job.build_id).unwrap();
    *h.tickets.fail.lock().unwrap() = true;
    let third = c.build(&job.build_id).unwrap();
    assert!(third.decision.open_ticket);
    assert!(third.ticket_id.is_none());
    assert!(h
        .store
        .load_build(&job.build_id)
        .unwrap()
        .escalation_ticket_id
        .is_none());

    // Still escalated by count, so no fourth attempt; the missing ticket is opened.
    *h.tickets.fail.lock().unwrap() = false;
    assert!(matches!(
        c.build(&job.build_id),
        Err(CoreError::RegenerateRejected(_))
    ));
    let stored = h.store.load_build(&job.build_id).unwrap();
    assert_eq!(stored.escalation_ticket_id.as_deref(), Some("T-1"));
    assert_eq!(stored.failure_count, 3);
    assert_eq!(h.tickets.count(), 1);
    assert_eq!(h.source.reads_of(&h.objects[0].key), 3);

    assert!(matches!(
        c.regenerate(&job.build_id),
        Err(CoreError::RegenerateRejected(_))
    ));
    assert_eq!(h.tickets.count(), 1);
}

#[test]
fn regenerate_below_threshold_resumes_and_succeeds() {
    let h = Harness::new(4, 2);
    let mut c = h.controller();
    let job = c.request("req_1", "t_1", h.objects.clone()).unwrap();
    h.source.fail_next(&h.objects[3].key, &[FailMode::Read, FailMode::Read]);
    c.build(&job.build_id).unwrap();
    c.build(&job.build_id).unwrap();
    assert!(c.view(&job.build_id).unwrap().can_regenerate);

    let out = c.regenerate(&job.build_id).unwrap();
    assert_eq!(out.status, BuildStatus::READY);
    assert_eq!(out.chunks_committed, 1);
    let stored = h.store.load_build(&job.build_id).unwrap();
    // History is kept by default.
    assert_eq!(stored.failure_count, 2);
    assert_eq!(stored.failure_reason, Some(FailureReason::S3_READ_ERROR));
}

#[test]
fn regenerate_can_reset_failures_when_configured() {
    let mut h = Harness::new(2, 1);
    h.cfg.reset_failures_on_success = true;
    let mut c = h.controller();
    let job = c.request("req_1", "t_1", h.objects.clone()).unwrap();
    h.source.fail_next(&h.objects[1].key, &[FailMode::Read]);
    c.build(&job.build_id).unwrap();

    c.regenerate(&job.build_id).unwrap();
    let stored = h.store.load_build(&job.build_id).unwrap();
    assert_eq!(stored.status, BuildStatus::READY);
    assert_eq!(stored.failure_count, 0);
    assert!(stored.failure_reason.is_none());
    assert!(stored.last_failed_at.is_none());
}

#[test]
fn regenerate_requires_a_failed_build() {
    let h = Harness::new(1, 1);
    let mut c = h.controller();
    let job = c.request("req_1", "t_1", h.objects.clone()).unwrap();
    assert!(matches!(
        c.regenerate(&job.build_id),
        Err(CoreError::InvalidTransition(_))
    ));
}

#[test]
fn policy_thresholds_follow_config() {
    let mut h = Harness::new(1, 1);
    h.cfg.agent_threshold = 1;
    h.cfg.ticket_threshold = 1;
    let policy = EscalationPolicy::from_config(&h.cfg);
    assert_eq!(policy.ticket_threshold, 1);

    let mut c = h.controller();
    let job = c.request("req_1", "t_1", h.objects.clone()).unwrap();
    h.source.fail_next(&h.objects[0].key, &[FailMode::Read]);
    let out = c.build(&job.build_id).unwrap();
    assert!(out.decision.trigger_agent);
    assert!(out.decision.open_ticket);
    assert!(c.view(&job.build_id).unwrap().is_escalated);
}
