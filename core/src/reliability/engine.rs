use crate::adapters::interface::{TicketPayload, TicketingSystem};
use crate::audit::event::AuditEvent;
use crate::audit::log::AuditLog;
use crate::error::CoreResult;
use crate::fault::escalation::{Escalatable, EscalationPolicy};
use crate::ids::{new_incident_id, now_rfc3339_utc};
use crate::model::incident::{Incident, IncidentReport, Severity};
use crate::reliability::repair::RepairRegistry;
use crate::storage::records::RecordStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoveryOutcome {
    pub incident_id: String,
    pub resolved: bool,
    pub strategy_found: bool,
    pub repair_attempts: u64,
}

/// Incident lifecycle: report, attempt recovery, escalate.
///
/// ```text
/// OPEN --attempt_recovery(ok)--> RESOLVED (auto, terminal)
/// OPEN --attempt_recovery(no)--> OPEN (repair_attempts + 1)
/// OPEN --escalate-------------> OPEN (ticket attached)
/// ```
pub struct ReliabilityEngine {
    store: RecordStore,
    pub audit: AuditLog,
    registry: RepairRegistry,
    policy: EscalationPolicy,
    ticketing: Arc<dyn TicketingSystem>,
}

impl ReliabilityEngine {
    pub fn new(
        store: RecordStore,
        audit: AuditLog,
        registry: RepairRegistry,
        policy: EscalationPolicy,
        ticketing: Arc<dyn TicketingSystem>,
    ) -> Self {
        Self {
            store,
            audit,
            registry,
            policy,
            ticketing,
        }
    }

    pub fn registry_mut(&mut self) -> &mut RepairRegistry {
        &mut self.registry
    }

    /// Records a new open incident. No recovery is attempted here.
    pub fn report(&mut self, report: IncidentReport) -> CoreResult<Incident> {
        report.validate()?;
        let now = now_rfc3339_utc()?;
        let incident = Incident::from_report(new_incident_id(), report, &now);
        self.store.insert_incident(&incident)?;
        self.emit(
            "INCIDENT_REPORTED",
            &incident,
            serde_json::json!({
                "source_type": incident.source_type,
                "source_id": incident.source_id,
                "severity": incident.severity,
                "retryable": incident.retryable,
            }),
        )?;
        info!(
            incident_id = %incident.incident_id,
            source_type = %incident.source_type,
            severity = ?incident.severity,
            "incident reported"
        );
        Ok(incident)
    }

    /// Runs the strategy registered for the incident's source type. The repair
    /// counter moves on every attempt, whatever the result; strategy errors are
    /// counted and then returned, never reported as new incidents.
    pub fn attempt_recovery(&mut self, incident_id: &str) -> CoreResult<RecoveryOutcome> {
        let incident = self.store.load_incident(incident_id)?;
        if !incident.is_open() {
            return Ok(RecoveryOutcome {
                incident_id: incident.incident_id.clone(),
                resolved: true,
                strategy_found: self.registry.get(&incident.source_type).is_some(),
                repair_attempts: incident.repair_attempts(),
            });
        }

        let strategy = self.registry.get(&incident.source_type);
        let strategy_found = strategy.is_some();
        let attempt = match strategy {
            Some(s) => s.attempt(&incident),
            None => Ok(false),
        };
        let resolved = matches!(attempt, Ok(true));

        let now = now_rfc3339_utc()?;
        let updated = self.store.update_incident(incident_id, |i| {
            if !i.is_open() {
                return Ok(());
            }
            i.record_repair_attempt();
            if resolved {
                i.resolve(&now, true)?;
            }
            Ok(())
        })?;
        let repair_attempts = updated.repair_attempts();
        self.emit(
            "INCIDENT_REPAIR_ATTEMPTED",
            &updated,
            serde_json::json!({
                "strategy_found": strategy_found,
                "resolved": resolved,
                "repair_attempts": repair_attempts,
            }),
        )?;

        if let Err(e) = attempt {
            error!(incident_id, error = %e, repair_attempts, "repair strategy failed");
            return Err(e);
        }
        if resolved {
            self.emit(
                "INCIDENT_RESOLVED",
                &updated,
                serde_json::json!({ "auto_resolved": true }),
            )?;
            info!(incident_id, repair_attempts, "incident auto-resolved");
        } else if !strategy_found {
            warn!(
                incident_id,
                source_type = %updated.source_type,
                registered = ?self.registry.source_types(),
                "no repair strategy registered"
            );
        }
        Ok(RecoveryOutcome {
            incident_id: updated.incident_id.clone(),
            resolved: !updated.is_open(),
            strategy_found,
            repair_attempts,
        })
    }

    /// Open, at the ticket threshold, and not yet ticketed.
    pub fn should_create_ticket(&self, incident: &Incident) -> bool {
        incident.is_open() && self.policy.ticket_due(&incident.escalation_inputs())
    }

    /// Opens the incident's ticket when the policy calls for one and returns its
    /// id. Returns `None` without side effects otherwise.
    pub fn escalate(&mut self, incident_id: &str) -> CoreResult<Option<String>> {
        let incident = self.store.load_incident(incident_id)?;
        if !incident.is_open() || !self.policy.decide_for(&incident).open_ticket {
            return Ok(None);
        }

        let ticketing = Arc::clone(&self.ticketing);
        let policy = self.policy;
        let mut created: Option<String> = None;
        let updated = self.store.update_incident(incident_id, |i| {
            if !i.is_open() || !policy.decide_for(&*i).open_ticket {
                return Ok(());
            }
            let severity = ticket_severity(i.severity);
            let payload = TicketPayload {
                idempotency_key: format!("incident:{}", i.incident_id),
                source_type: i.source_type.clone(),
                source_id: i.source_id.clone(),
                tenant_id: i.tenant_id.clone(),
                title: i.title.clone(),
                diagnostics: serde_json::json!({
                    "incident_id": i.incident_id,
                    "message": i.message,
                    "severity": i.severity,
                    "retryable": i.retryable,
                    "detected_at": i.detected_at,
                    "metadata": i.metadata,
                }),
            };
            let ticket_id = ticketing.create(severity, &payload)?;
            i.ticket_id = Some(ticket_id.clone());
            created = Some(ticket_id);
            Ok(())
        })?;

        if let Some(ticket_id) = &created {
            self.emit(
                "INCIDENT_ESCALATED",
                &updated,
                serde_json::json!({
                    "ticket_id": ticket_id,
                    "repair_attempts": updated.repair_attempts(),
                }),
            )?;
            warn!(incident_id, %ticket_id, "incident escalated to support");
        }
        Ok(created)
    }

    pub fn load(&self, incident_id: &str) -> CoreResult<Incident> {
        self.store.load_incident(incident_id)
    }

    fn emit(
        &mut self,
        event_type: &str,
        incident: &Incident,
        details: serde_json::Value,
    ) -> CoreResult<()> {
        self.audit.append(AuditEvent::system(
            now_rfc3339_utc()?,
            event_type,
            &incident.incident_id,
            &incident.tenant_id,
            details,
        ))?;
        Ok(())
    }
}

// Tickets are never filed below error severity.
fn ticket_severity(s: Severity) -> Severity {
    s.max(Severity::Error)
}
