use crate::error::CoreResult;
use crate::model::incident::Severity;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Addressable read access to stored objects.
///
/// Implementations must keep read failures (`CoreError::SourceRead`) apart from
/// permission failures (`CoreError::PermissionDenied`) so they classify correctly.
pub trait ObjectSource: Send + Sync {
    fn exists(&self, key: &str) -> CoreResult<bool>;
    fn get_bytes(&self, key: &str) -> CoreResult<Box<dyn Read + '_>>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PutReceipt {
    pub path: String,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Where finished archives land. A put is the externally visible commit of a build.
pub trait DurableStore: Send + Sync {
    fn put(&self, path: &str, body: &mut dyn Read) -> CoreResult<PutReceipt>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketPayload {
    /// Stable per escalated record. A ticketing system that has already seen
    /// the key returns the existing ticket instead of opening another.
    pub idempotency_key: String,
    pub source_type: String,
    pub source_id: String,
    pub tenant_id: String,
    pub title: String,
    pub diagnostics: serde_json::Value,
}

pub trait TicketingSystem: Send + Sync {
    /// Returns the external ticket id.
    fn create(&self, severity: Severity, payload: &TicketPayload) -> CoreResult<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRequest {
    pub source_type: String,
    pub source_id: String,
    pub tenant_id: String,
    pub reason: String,
    pub failure_count: u64,
}

/// Enqueues an automated diagnostic/retry pass. Delivery and retry bounds
/// belong to the queue behind it.
pub trait AgentDispatcher: Send + Sync {
    fn trigger(&self, req: &AgentRequest) -> CoreResult<()>;
}
