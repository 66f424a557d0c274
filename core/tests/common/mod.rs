#![allow(dead_code)]

use archive_core::adapters::fs::FsDurableStore;
use archive_core::adapters::interface::{
    AgentDispatcher, AgentRequest, ObjectSource, TicketPayload, TicketingSystem,
};
use archive_core::archive::controller::{BuildController, BuildServices};
use archive_core::audit::log::AuditLog;
use archive_core::config::ReliabilityConfig;
use archive_core::error::{CoreError, CoreResult};
use archive_core::model::build::ArchiveObject;
use archive_core::model::incident::Severity;
use archive_core::storage::records::RecordStore;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    Timeout,
    Read,
    Permission,
    DiskFull,
}

impl FailMode {
    fn to_error(self, key: &str) -> CoreError {
        match self {
            FailMode::Timeout => CoreError::Timeout("attempt budget of 300s exhausted".to_string()),
            FailMode::Read => CoreError::SourceRead {
                key: key.to_string(),
                message: "connection reset by peer".to_string(),
            },
            FailMode::Permission => CoreError::PermissionDenied(format!("reading object {}", key)),
            FailMode::DiskFull => CoreError::Io(std::io::Error::from_raw_os_error(28)),
        }
    }
}

/// In-memory object source with scripted failures.
#[derive(Default)]
pub struct MemSource {
    objects: HashMap<String, Vec<u8>>,
    failures: Mutex<HashMap<String, Vec<FailMode>>>,
    reads: Mutex<HashMap<String, usize>>,
}

impl MemSource {
    pub fn with_objects(n: usize) -> (Self, Vec<ArchiveObject>) {
        let mut objects = HashMap::new();
        let mut list = Vec::with_capacity(n);
        for i in 0..n {
            let key = format!("cas/{:04}", i);
            objects.insert(key.clone(), format!("payload-{}", i).into_bytes());
            list.push(ArchiveObject {
                key,
                entry_name: format!("photos/img_{:04}.jpg", i),
            });
        }
        (
            Self {
                objects,
                ..Self::default()
            },
            list,
        )
    }

    /// The next reads of `key` fail with `modes`, in order.
    pub fn fail_next(&self, key: &str, modes: &[FailMode]) {
        self.failures
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .extend_from_slice(modes);
    }

    pub fn reads_of(&self, key: &str) -> usize {
        self.reads.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

impl ObjectSource for MemSource {
    fn exists(&self, key: &str) -> CoreResult<bool> {
        Ok(self.objects.contains_key(key))
    }

    fn get_bytes(&self, key: &str) -> CoreResult<Box<dyn Read + '_>> {
        if let Some(modes) = self.failures.lock().unwrap().get_mut(key) {
            if !modes.is_empty() {
                let mode = modes.remove(0);
                return Err(mode.to_error(key));
            }
        }
        *self.reads.lock().unwrap().entry(key.to_string()).or_default() += 1;
        let bytes = self.objects.get(key).ok_or_else(|| CoreError::SourceRead {
            key: key.to_string(),
            message: "no such key".to_string(),
        })?;
        Ok(Box::new(Cursor::new(bytes.clone())))
    }
}

#[derive(Default)]
pub struct RecordingTickets {
    pub created: Mutex<Vec<(Severity, TicketPayload)>>,
    pub fail: Mutex<bool>,
}

impl RecordingTickets {
    pub fn count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

impl TicketingSystem for RecordingTickets {
    fn create(&self, severity: Severity, payload: &TicketPayload) -> CoreResult<String> {
        if *self.fail.lock().unwrap() {
            return Err(CoreError::Infrastructure("ticketing unavailable".to_string()));
        }
        let mut created = self.created.lock().unwrap();
        created.push((severity, payload.clone()));
        Ok(format!("T-{}", created.len()))
    }
}

#[derive(Default)]
pub struct RecordingAgent {
    pub requests: Mutex<Vec<AgentRequest>>,
}

impl RecordingAgent {
    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl AgentDispatcher for RecordingAgent {
    fn trigger(&self, req: &AgentRequest) -> CoreResult<()> {
        self.requests.lock().unwrap().push(req.clone());
        Ok(())
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub source: Arc<MemSource>,
    pub tickets: Arc<RecordingTickets>,
    pub agent: Arc<RecordingAgent>,
    pub store: RecordStore,
    pub objects: Vec<ArchiveObject>,
    pub cfg: ReliabilityConfig,
}

impl Harness {
    pub fn new(n: usize, chunk_size: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let (source, objects) = MemSource::with_objects(n);
        let store = RecordStore::open_or_create(dir.path().join("state")).unwrap();
        Self {
            dir,
            source: Arc::new(source),
            tickets: Arc::new(RecordingTickets::default()),
            agent: Arc::new(RecordingAgent::default()),
            store,
            objects,
            cfg: ReliabilityConfig {
                chunk_size,
                ..ReliabilityConfig::default()
            },
        }
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    pub fn durable_dir(&self) -> PathBuf {
        self.dir.path().join("durable")
    }

    /// A fresh controller over the same state, as a new worker would build one.
    pub fn controller(&self) -> BuildController {
        let audit = AuditLog::open_or_create(self.dir.path().join("audit").join("builds.ndjson"))
            .unwrap();
        BuildController::new(
            self.cfg.clone(),
            self.store.clone(),
            audit,
            self.scratch_dir(),
            BuildServices {
                source: self.source.clone(),
                durable: Arc::new(FsDurableStore::new(self.durable_dir())),
                ticketing: self.tickets.clone(),
                dispatcher: self.agent.clone(),
            },
        )
        .unwrap()
    }

    pub fn archive_entries(&self, archive_path: &str) -> Vec<String> {
        let f = std::fs::File::open(self.durable_dir().join(archive_path)).unwrap();
        let za = zip::ZipArchive::new(f).unwrap();
        za.file_names().map(str::to_string).collect()
    }
}
