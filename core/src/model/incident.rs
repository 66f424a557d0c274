use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const REPAIR_ATTEMPTS_KEY: &str = "repair_attempts";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Payload accepted by `ReliabilityEngine::report`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentReport {
    pub source_type: String,
    pub source_id: String,
    pub tenant_id: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl IncidentReport {
    pub fn validate(&self) -> CoreResult<()> {
        for (field, value) in [
            ("source_type", &self.source_type),
            ("source_id", &self.source_id),
            ("tenant_id", &self.tenant_id),
            ("title", &self.title),
            ("message", &self.message),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::InvalidInput(format!(
                    "incident report missing {}",
                    field
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    pub incident_id: String,
    pub source_type: String,
    pub source_id: String,
    pub tenant_id: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub retryable: bool,
    pub detected_at: String,
    pub resolved_at: Option<String>,
    pub auto_resolved: bool,
    pub metadata: Map<String, Value>,
    pub ticket_id: Option<String>,
}

impl Incident {
    pub fn from_report(incident_id: String, report: IncidentReport, now: &str) -> Self {
        // The counter belongs to recovery; a reporter cannot seed it.
        let mut metadata = report.metadata;
        metadata.insert(REPAIR_ATTEMPTS_KEY.to_string(), Value::from(0u64));
        Self {
            incident_id,
            source_type: report.source_type,
            source_id: report.source_id,
            tenant_id: report.tenant_id,
            severity: report.severity,
            title: report.title,
            message: report.message,
            retryable: report.retryable,
            detected_at: now.to_string(),
            resolved_at: None,
            auto_resolved: false,
            metadata,
            ticket_id: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }

    pub fn repair_attempts(&self) -> u64 {
        self.metadata
            .get(REPAIR_ATTEMPTS_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    pub fn record_repair_attempt(&mut self) -> u64 {
        let next = self.repair_attempts() + 1;
        self.metadata
            .insert(REPAIR_ATTEMPTS_KEY.to_string(), Value::from(next));
        next
    }

    pub fn resolve(&mut self, now: &str, auto: bool) -> CoreResult<()> {
        if !self.is_open() {
            return Err(CoreError::InvalidTransition(format!(
                "incident {} is already resolved",
                self.incident_id
            )));
        }
        self.resolved_at = Some(now.to_string());
        self.auto_resolved = auto;
        Ok(())
    }

    pub fn view(&self) -> IncidentView {
        IncidentView {
            incident: self.clone(),
            open: self.is_open(),
            resolved: !self.is_open(),
            repair_attempts: self.repair_attempts(),
        }
    }
}

/// Operator surface: the incident plus its derived flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncidentView {
    #[serde(flatten)]
    pub incident: Incident,
    pub open: bool,
    pub resolved: bool,
    pub repair_attempts: u64,
}
