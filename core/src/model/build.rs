use crate::config::DEFAULT_TICKET_THRESHOLD;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BuildStatus {
    NONE,
    BUILDING,
    READY,
    FAILED,
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FailureReason {
    TIMEOUT,
    DISK_FULL,
    S3_READ_ERROR,
    PERMISSION_ERROR,
    UNKNOWN,
}

/// Length and entry count of the scratch archive as of the last committed chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ScratchCheckpoint {
    pub bytes: u64,
    pub entries: usize,
}

/// One stored object and the name it gets inside the archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveObject {
    pub key: String,
    pub entry_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildJob {
    pub build_id: String,
    pub request_id: String,
    pub tenant_id: String,
    pub status: BuildStatus,
    /// Last fully committed chunk, -1 when nothing is committed yet.
    pub chunk_index: i64,
    /// Scratch archive state matching `chunk_index`; a torn scratch file is
    /// rolled back to it on resume.
    #[serde(default)]
    pub scratch: Option<ScratchCheckpoint>,
    /// Fixed at request time so `chunk_index` keeps its meaning across attempts.
    pub chunk_size: usize,
    pub objects: Vec<ArchiveObject>,
    pub archive_path: Option<String>,
    pub archive_size_bytes: Option<u64>,
    pub archive_sha256: Option<String>,
    pub failure_count: u32,
    pub failure_reason: Option<FailureReason>,
    pub last_failed_at: Option<String>,
    pub last_error: Option<String>,
    pub escalation_ticket_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl BuildJob {
    pub fn new(
        build_id: String,
        request_id: String,
        tenant_id: String,
        objects: Vec<ArchiveObject>,
        chunk_size: usize,
        now: &str,
    ) -> CoreResult<Self> {
        if chunk_size == 0 {
            return Err(CoreError::InvalidInput(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if objects.is_empty() {
            return Err(CoreError::EmptyBuild(build_id));
        }
        validate_objects(&objects)?;
        Ok(Self {
            build_id,
            request_id,
            tenant_id,
            status: BuildStatus::NONE,
            chunk_index: -1,
            scratch: None,
            chunk_size,
            objects,
            archive_path: None,
            archive_size_bytes: None,
            archive_sha256: None,
            failure_count: 0,
            failure_reason: None,
            last_failed_at: None,
            last_error: None,
            escalation_ticket_id: None,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        })
    }

    pub fn total_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.objects.len().div_ceil(self.chunk_size)
    }

    pub fn chunk(&self, index: usize) -> &[ArchiveObject] {
        let start = (index * self.chunk_size).min(self.objects.len());
        let end = (start + self.chunk_size).min(self.objects.len());
        &self.objects[start..end]
    }

    /// Objects covered by committed chunks.
    pub fn committed_objects(&self) -> &[ArchiveObject] {
        let committed = ((self.chunk_index + 1).max(0) as usize) * self.chunk_size;
        &self.objects[..committed.min(self.objects.len())]
    }

    pub fn can_regenerate(&self) -> bool {
        self.can_regenerate_with(DEFAULT_TICKET_THRESHOLD)
    }

    pub fn can_regenerate_with(&self, ticket_threshold: u32) -> bool {
        self.failure_count < ticket_threshold && self.escalation_ticket_id.is_none()
    }

    pub fn is_escalated(&self) -> bool {
        self.is_escalated_with(DEFAULT_TICKET_THRESHOLD)
    }

    pub fn is_escalated_with(&self, ticket_threshold: u32) -> bool {
        self.failure_count >= ticket_threshold
    }

    pub fn transition(&mut self, to: BuildStatus) -> CoreResult<()> {
        if !valid_transition(self.status, to) {
            return Err(CoreError::InvalidTransition(format!(
                "build {} {:?} -> {:?}",
                self.build_id, self.status, to
            )));
        }
        self.status = to;
        Ok(())
    }

    pub fn view(&self, ticket_threshold: u32) -> BuildView {
        BuildView {
            build_id: self.build_id.clone(),
            tenant_id: self.tenant_id.clone(),
            status: self.status,
            chunk_index: self.chunk_index,
            total_objects: self.total_objects(),
            archive_path: self.archive_path.clone(),
            archive_size_bytes: self.archive_size_bytes,
            failure_count: self.failure_count,
            failure_reason: self.failure_reason,
            last_failed_at: self.last_failed_at.clone(),
            escalation_ticket_id: self.escalation_ticket_id.clone(),
            can_regenerate: self.can_regenerate_with(ticket_threshold),
            is_escalated: self.is_escalated_with(ticket_threshold),
        }
    }
}

/// Read-only operator surface for a build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildView {
    pub build_id: String,
    pub tenant_id: String,
    pub status: BuildStatus,
    pub chunk_index: i64,
    pub total_objects: usize,
    pub archive_path: Option<String>,
    pub archive_size_bytes: Option<u64>,
    pub failure_count: u32,
    pub failure_reason: Option<FailureReason>,
    pub last_failed_at: Option<String>,
    pub escalation_ticket_id: Option<String>,
    pub can_regenerate: bool,
    pub is_escalated: bool,
}

fn validate_objects(objects: &[ArchiveObject]) -> CoreResult<()> {
    let mut seen = BTreeSet::new();
    for o in objects {
        if o.key.trim().is_empty() {
            return Err(CoreError::InvalidInput("object key is empty".to_string()));
        }
        let name = o.entry_name.as_str();
        if name.is_empty()
            || name.starts_with('/')
            || name.contains('\\')
            || name.split('/').any(|seg| seg == "..")
        {
            return Err(CoreError::InvalidInput(format!(
                "unsafe archive entry name {:?}",
                name
            )));
        }
        if !seen.insert(name) {
            return Err(CoreError::InvalidInput(format!(
                "duplicate archive entry name {:?}",
                name
            )));
        }
    }
    Ok(())
}

fn valid_transition(from: BuildStatus, to: BuildStatus) -> bool {
    use BuildStatus::*;
    matches!(
        (from, to),
        (NONE, BUILDING)
            | (FAILED, BUILDING)
            | (BUILDING, BUILDING)
            | (BUILDING, READY)
            | (NONE, FAILED)
            | (BUILDING, FAILED)
            | (FAILED, FAILED)
            | (FAILED, NONE)
    )
}
