use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_CHUNK_SIZE: usize = 50;
pub const DEFAULT_AGENT_THRESHOLD: u32 = 2;
pub const DEFAULT_TICKET_THRESHOLD: u32 = 3;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Tunables for the archive builder and the reliability engine.
///
/// Loaded from a JSON file; every field is optional and falls back to the
/// defaults above.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReliabilityConfig {
    pub chunk_size: usize,
    pub agent_threshold: u32,
    pub ticket_threshold: u32,
    /// Bound enforced by the external queue; recorded here so tickets can
    /// carry it as diagnostic context.
    pub max_attempts: u32,
    pub attempt_budget_secs: Option<u64>,
    pub reset_failures_on_success: bool,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            agent_threshold: DEFAULT_AGENT_THRESHOLD,
            ticket_threshold: DEFAULT_TICKET_THRESHOLD,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_budget_secs: None,
            reset_failures_on_success: false,
        }
    }
}

impl ReliabilityConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let bytes = fs::read(path.as_ref())?;
        let cfg: ReliabilityConfig = serde_json::from_slice(&bytes)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// `ARCHIVE_CHUNK_SIZE` and `ARCHIVE_ATTEMPT_BUDGET_SECS` win over file values.
    pub fn apply_env_overrides(mut self) -> CoreResult<Self> {
        if let Ok(v) = std::env::var("ARCHIVE_CHUNK_SIZE") {
            self.chunk_size = v.trim().parse().map_err(|_| {
                CoreError::InvalidInput(format!("ARCHIVE_CHUNK_SIZE is not a number: {}", v))
            })?;
        }
        if let Ok(v) = std::env::var("ARCHIVE_ATTEMPT_BUDGET_SECS") {
            let secs: u64 = v.trim().parse().map_err(|_| {
                CoreError::InvalidInput(format!(
                    "ARCHIVE_ATTEMPT_BUDGET_SECS is not a number: {}",
                    v
                ))
            })?;
            self.attempt_budget_secs = Some(secs);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.chunk_size == 0 {
            return Err(CoreError::InvalidInput(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if self.agent_threshold == 0 || self.ticket_threshold == 0 {
            return Err(CoreError::InvalidInput(
                "escalation thresholds must be at least 1".to_string(),
            ));
        }
        if self.agent_threshold > self.ticket_threshold {
            return Err(CoreError::InvalidInput(format!(
                "agent_threshold ({}) must not exceed ticket_threshold ({})",
                self.agent_threshold, self.ticket_threshold
            )));
        }
        Ok(())
    }
}
