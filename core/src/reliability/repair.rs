use crate::error::CoreResult;
use crate::model::incident::Incident;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub const ASSET_PIPELINE_SOURCE: &str = "asset_pipeline";

/// Source-type-specific automated repair.
///
/// `Ok(false)` covers both "not fixed yet" and "not applicable"; `Err` is
/// reserved for infrastructure faults.
pub trait RepairStrategy: Send + Sync {
    fn attempt(&self, incident: &Incident) -> CoreResult<bool>;
}

#[derive(Default)]
pub struct RepairRegistry {
    strategies: BTreeMap<String, Box<dyn RepairStrategy>>,
}

impl RepairRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in strategies wired to `monitor`.
    pub fn with_defaults(monitor: Arc<dyn ResourceMonitor>) -> Self {
        let mut r = Self::new();
        r.register(ASSET_PIPELINE_SOURCE, Box::new(StuckAssetRepair::new(monitor)));
        r
    }

    /// Replaces any strategy already registered for `source_type`.
    pub fn register(&mut self, source_type: &str, strategy: Box<dyn RepairStrategy>) {
        self.strategies.insert(source_type.to_string(), strategy);
    }

    pub fn get(&self, source_type: &str) -> Option<&dyn RepairStrategy> {
        self.strategies.get(source_type).map(|s| s.as_ref())
    }

    pub fn source_types(&self) -> Vec<String> {
        self.strategies.keys().cloned().collect()
    }
}

/// Downstream completion signals for an asset moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CompletionSignals {
    pub thumbnails_done: bool,
    pub metadata_extracted: bool,
    pub pipeline_completed_at: Option<String>,
}

impl CompletionSignals {
    pub fn all_done(&self) -> bool {
        self.thumbnails_done && self.metadata_extracted && self.pipeline_completed_at.is_some()
    }
}

/// Read/advance access to pipeline resources, owned by the asset catalogue.
pub trait ResourceMonitor: Send + Sync {
    /// `None` when the resource no longer exists.
    fn completion_signals(&self, source_id: &str) -> CoreResult<Option<CompletionSignals>>;
    /// Moves a stuck resource to its completed state.
    fn advance(&self, source_id: &str) -> CoreResult<()>;
}

/// An asset stuck mid-pipeline whose downstream work actually finished is
/// moved forward; anything still incomplete is left alone.
pub struct StuckAssetRepair {
    monitor: Arc<dyn ResourceMonitor>,
}

impl StuckAssetRepair {
    pub fn new(monitor: Arc<dyn ResourceMonitor>) -> Self {
        Self { monitor }
    }
}

impl RepairStrategy for StuckAssetRepair {
    fn attempt(&self, incident: &Incident) -> CoreResult<bool> {
        let signals = match self.monitor.completion_signals(&incident.source_id)? {
            Some(s) => s,
            None => {
                debug!(source_id = %incident.source_id, "asset gone, nothing to repair");
                return Ok(false);
            }
        };
        if !signals.all_done() {
            debug!(source_id = %incident.source_id, ?signals, "asset still incomplete");
            return Ok(false);
        }
        self.monitor.advance(&incident.source_id)?;
        Ok(true)
    }
}
