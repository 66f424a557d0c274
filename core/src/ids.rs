use crate::error::{CoreError, CoreResult};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use ulid::Ulid;

pub fn new_build_id() -> String {
    format!("b_{}", Ulid::new())
}

pub fn new_incident_id() -> String {
    format!("inc_{}", Ulid::new())
}

/// Record ids double as file names in the record store and scratch dir.
pub fn validate_record_id(id: &str) -> CoreResult<()> {
    if id.is_empty()
        || id.len() > 128
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CoreError::InvalidInput(format!(
            "record id must be 1-128 chars of [A-Za-z0-9_-], got {:?}",
            id
        )));
    }
    Ok(())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

pub fn now_rfc3339_utc() -> CoreResult<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| CoreError::Infrastructure(format!("failed to format timestamp: {}", e)))
}

pub fn parse_rfc3339(ts: &str) -> CoreResult<OffsetDateTime> {
    OffsetDateTime::parse(ts, &Rfc3339)
        .map_err(|e| CoreError::InvalidInput(format!("bad RFC 3339 timestamp {:?}: {}", ts, e)))
}
