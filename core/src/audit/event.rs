use crate::audit::canonical;
use crate::error::{CoreError, CoreResult};
use crate::ids::sha256_hex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    System,
    Operator,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEvent {
    pub ts_utc: String, // RFC3339 UTC string
    pub event_type: String,
    pub subject_id: String, // build_id or incident_id
    pub tenant_id: String,
    pub actor: Actor,
    pub details: serde_json::Value,
    pub prev_event_hash: String, // hex 64
    pub event_hash: String,      // hex 64
}

impl AuditEvent {
    pub fn system(
        ts_utc: String,
        event_type: &str,
        subject_id: &str,
        tenant_id: &str,
        details: serde_json::Value,
    ) -> Self {
        Self {
            ts_utc,
            event_type: event_type.to_string(),
            subject_id: subject_id.to_string(),
            tenant_id: tenant_id.to_string(),
            actor: Actor::System,
            details,
            prev_event_hash: String::new(),
            event_hash: String::new(),
        }
    }
}

pub const ZERO_HASH_64: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// event_hash = SHA-256 over the canonical envelope with event_hash zeroed.
pub fn compute_event_hash(event: &AuditEvent) -> CoreResult<String> {
    let mut e = event.clone();
    e.event_hash = ZERO_HASH_64.to_string();
    Ok(sha256_hex(&canonical::to_canonical_bytes(&e)?))
}

pub fn finalize_event(mut event: AuditEvent) -> CoreResult<AuditEvent> {
    if event.prev_event_hash.len() != 64
        || !event.prev_event_hash.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(CoreError::InvalidInput(
            "prev_event_hash must be 64 hex chars".to_string(),
        ));
    }
    validate_event_taxonomy(&event)?;
    event.event_hash = compute_event_hash(&event)?;
    Ok(event)
}

fn validate_event_taxonomy(event: &AuditEvent) -> CoreResult<()> {
    let required = required_detail_keys(&event.event_type).ok_or_else(|| {
        CoreError::InvalidInput(format!("unknown event_type {}", event.event_type))
    })?;
    for k in required {
        if event.details.get(k).is_none() {
            return Err(CoreError::InvalidInput(format!(
                "event {} missing details.{}",
                event.event_type, k
            )));
        }
    }
    Ok(())
}

fn required_detail_keys(event_type: &str) -> Option<&'static [&'static str]> {
    let keys: &'static [&'static str] = match event_type {
        "BUILD_REQUESTED" => &["request_id", "total_objects", "chunk_size"],
        "BUILD_CHUNK_COMMITTED" => &["chunk_index", "entries_appended", "entries_skipped"],
        "BUILD_READY" => &["archive_path", "archive_size_bytes", "archive_sha256"],
        "BUILD_FAILED" => &["failure_count", "failure_reason", "chunk_index", "error"],
        "BUILD_REGENERATE_REJECTED" => &["failure_count", "escalation_ticket_id"],
        "AGENT_TRIGGERED" => &["reason", "failure_count"],
        "TICKET_OPENED" => &["ticket_id", "severity"],
        "INCIDENT_REPORTED" => &["source_type", "source_id", "severity", "retryable"],
        "INCIDENT_REPAIR_ATTEMPTED" => &["strategy_found", "resolved", "repair_attempts"],
        "INCIDENT_RESOLVED" => &["auto_resolved"],
        "INCIDENT_ESCALATED" => &["ticket_id", "repair_attempts"],
        _ => return None,
    };
    Some(keys)
}
