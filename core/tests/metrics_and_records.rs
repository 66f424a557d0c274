use archive_core::audit::event::AuditEvent;
use archive_core::audit::log::AuditLog;
use archive_core::error::CoreError;
use archive_core::model::build::{ArchiveObject, BuildJob, BuildStatus, FailureReason};
use archive_core::model::incident::{Incident, IncidentReport, Severity};
use archive_core::reliability::metrics::MetricsAggregator;
use archive_core::storage::records::RecordStore;

fn build(id: &str) -> BuildJob {
    BuildJob::new(
        id.to_string(),
        "req".to_string(),
        "t_1".to_string(),
        vec![ArchiveObject {
            key: "cas/1".to_string(),
            entry_name: "a.jpg".to_string(),
        }],
        50,
        "2026-03-01T00:00:00Z",
    )
    .unwrap()
}

fn incident(id: &str, detected_at: &str) -> Incident {
    Incident::from_report(
        id.to_string(),
        IncidentReport {
            source_type: "asset_pipeline".to_string(),
            source_id: format!("asset_{}", id),
            tenant_id: "t_1".to_string(),
            severity: Severity::Error,
            title: "stuck".to_string(),
            message: "stuck".to_string(),
            retryable: true,
            metadata: serde_json::Map::new(),
        },
        detected_at,
    )
}

#[test]
fn empty_store_reports_perfect_integrity() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::open_or_create(dir.path()).unwrap();
    let m = MetricsAggregator::new(store).snapshot().unwrap();
    assert_eq!(m.reliability_metrics.integrity_rate, 1.0);
    assert_eq!(m.reliability_metrics.mttr_minutes, 0.0);
    assert_eq!(m.reliability_metrics.unresolved_tickets, 0);
}

#[test]
fn metrics_roll_up_builds_and_incidents() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::open_or_create(dir.path()).unwrap();

    // Healthy: never faulted.
    store.insert_build(&build("b_ok")).unwrap();
    // Healthy: faulted once, then ready.
    let mut recovered = build("b_recovered");
    recovered.status = BuildStatus::READY;
    recovered.archive_path = Some("archives/t_1/b_recovered.zip".to_string());
    recovered.failure_count = 1;
    recovered.failure_reason = Some(FailureReason::TIMEOUT);
    recovered.last_failed_at = Some("2026-03-01T00:01:00Z".to_string());
    store.insert_build(&recovered).unwrap();
    // Unhealthy and escalated.
    let mut escalated = build("b_escalated");
    escalated.status = BuildStatus::FAILED;
    escalated.failure_count = 3;
    escalated.failure_reason = Some(FailureReason::S3_READ_ERROR);
    escalated.last_failed_at = Some("2026-03-01T00:02:00Z".to_string());
    escalated.escalation_ticket_id = Some("T-9".to_string());
    store.insert_build(&escalated).unwrap();

    // Auto-resolved after 10 minutes.
    let mut auto = incident("inc_auto", "2026-03-01T10:00:00Z");
    auto.resolve("2026-03-01T10:10:00Z", true).unwrap();
    store.insert_incident(&auto).unwrap();
    // Manually resolved after 30 minutes.
    let mut manual = incident("inc_manual", "2026-03-01T10:00:00Z");
    manual.resolve("2026-03-01T10:30:00Z", false).unwrap();
    store.insert_incident(&manual).unwrap();
    // Open with a ticket.
    let mut open = incident("inc_open", "2026-03-01T11:00:00Z");
    open.ticket_id = Some("T-10".to_string());
    store.insert_incident(&open).unwrap();

    let report = MetricsAggregator::new(store).snapshot().unwrap();
    let m = &report.reliability_metrics;
    assert_eq!(m.monitored_resources, 6);
    assert!((m.integrity_rate - 4.0 / 6.0).abs() < 1e-9);
    assert!((m.mttr_minutes - 20.0).abs() < 1e-9);
    assert!((m.recovery_success_rate - 0.5).abs() < 1e-9);
    assert_eq!(m.unresolved_tickets, 2);
    assert_eq!(m.open_incidents, 1);
    assert_eq!(m.resolved_incidents, 2);
    assert_eq!(m.failed_builds, 1);

    let v = serde_json::to_value(&report).unwrap();
    let inner = v.get("reliability_metrics").unwrap();
    for key in [
        "integrity_rate",
        "mttr_minutes",
        "recovery_success_rate",
        "unresolved_tickets",
    ] {
        assert!(inner.get(key).is_some(), "missing {}", key);
    }
}

#[test]
fn record_updates_are_all_or_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::open_or_create(dir.path()).unwrap();
    store.insert_build(&build("b_1")).unwrap();
    assert!(store.insert_build(&build("b_1")).is_err());

    let r = store.update_build("b_1", |j| {
        j.failure_count = 99;
        Err(CoreError::Infrastructure("boom".to_string()))
    });
    assert!(r.is_err());
    assert_eq!(store.load_build("b_1").unwrap().failure_count, 0);

    let updated = store
        .update_build("b_1", |j| {
            j.chunk_index = 0;
            Ok(())
        })
        .unwrap();
    assert_eq!(store.load_build("b_1").unwrap(), updated);
    assert!(matches!(
        store.load_build("b_nope"),
        Err(CoreError::NotFound(_))
    ));
    assert!(store.load_build("../escape").is_err());
}

#[test]
fn reopened_audit_log_continues_the_hash_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.ndjson");
    let first = {
        let mut log = AuditLog::open_or_create(&path).unwrap();
        log.append(AuditEvent::system(
            "2026-03-01T00:00:00Z".to_string(),
            "AGENT_TRIGGERED",
            "b_1",
            "t_1",
            serde_json::json!({"reason": "TIMEOUT", "failure_count": 1}),
        ))
        .unwrap()
    };

    let mut log = AuditLog::open_or_create(&path).unwrap();
    let second = log
        .append(AuditEvent::system(
            "2026-03-01T00:01:00Z".to_string(),
            "TICKET_OPENED",
            "b_1",
            "t_1",
            serde_json::json!({"ticket_id": "T-1", "severity": "error"}),
        ))
        .unwrap();
    assert_eq!(second.prev_event_hash, first.event_hash);
    assert_eq!(log.read_all().unwrap().len(), 2);
}
