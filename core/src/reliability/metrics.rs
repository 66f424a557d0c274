use crate::error::CoreResult;
use crate::ids::parse_rfc3339;
use crate::model::build::{BuildJob, BuildStatus};
use crate::model::incident::Incident;
use crate::storage::records::RecordStore;
use serde::{Deserialize, Serialize};

/// Operator-facing rollups. Rates are fractions in `[0, 1]`; with nothing to
/// measure, `integrity_rate` is 1 and the other rates are 0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReliabilityMetrics {
    pub integrity_rate: f64,
    pub mttr_minutes: f64,
    pub recovery_success_rate: f64,
    pub unresolved_tickets: usize,
    pub monitored_resources: usize,
    pub open_incidents: usize,
    pub resolved_incidents: usize,
    pub failed_builds: usize,
}

/// Stable envelope: `{"reliability_metrics": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsReport {
    pub reliability_metrics: ReliabilityMetrics,
}

pub struct MetricsAggregator {
    store: RecordStore,
}

impl MetricsAggregator {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    /// Recomputed from persisted records on every call.
    pub fn snapshot(&self) -> CoreResult<MetricsReport> {
        let builds = self.store.list_builds()?;
        let incidents = self.store.list_incidents()?;
        Ok(MetricsReport {
            reliability_metrics: compute(&builds, &incidents)?,
        })
    }
}

pub fn compute(builds: &[BuildJob], incidents: &[Incident]) -> CoreResult<ReliabilityMetrics> {
    let healthy_builds = builds
        .iter()
        .filter(|b| b.status == BuildStatus::READY || b.failure_count == 0)
        .count();
    let resolved: Vec<&Incident> = incidents.iter().filter(|i| !i.is_open()).collect();
    let monitored = builds.len() + incidents.len();
    let integrity_rate = if monitored == 0 {
        1.0
    } else {
        (healthy_builds + resolved.len()) as f64 / monitored as f64
    };

    let mut total_minutes = 0.0;
    for i in &resolved {
        if let Some(resolved_at) = &i.resolved_at {
            let elapsed = parse_rfc3339(resolved_at)? - parse_rfc3339(&i.detected_at)?;
            total_minutes += elapsed.as_seconds_f64() / 60.0;
        }
    }
    let (mttr_minutes, recovery_success_rate) = if resolved.is_empty() {
        (0.0, 0.0)
    } else {
        let auto = resolved.iter().filter(|i| i.auto_resolved).count();
        (
            total_minutes / resolved.len() as f64,
            auto as f64 / resolved.len() as f64,
        )
    };

    // Ticket closure happens externally; a ticketed record counts until it is
    // resolved (incident) or ready (build).
    let unresolved_tickets = incidents
        .iter()
        .filter(|i| i.ticket_id.is_some() && i.is_open())
        .count()
        + builds
            .iter()
            .filter(|b| b.escalation_ticket_id.is_some() && b.status != BuildStatus::READY)
            .count();

    Ok(ReliabilityMetrics {
        integrity_rate,
        mttr_minutes,
        recovery_success_rate,
        unresolved_tickets,
        monitored_resources: monitored,
        open_incidents: incidents.len() - resolved.len(),
        resolved_incidents: resolved.len(),
        failed_builds: builds
            .iter()
            .filter(|b| b.status == BuildStatus::FAILED)
            .count(),
    })
}
