use crate::error::{CoreError, CoreResult};
use crate::ids::{now_rfc3339_utc, validate_record_id};
use crate::model::build::BuildJob;
use crate::model::incident::Incident;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const BUILDS_DIR: &str = "builds";
const INCIDENTS_DIR: &str = "incidents";

/// Directory-backed store for build and incident records.
///
/// Layout:
/// - `builds/<build_id>.json`
/// - `incidents/<incident_id>.json`
///
/// Every mutation is one read-modify-write under the store lock, written to a
/// temp file and renamed into place. Clones share the lock.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl RecordStore {
    pub fn open_or_create(root: impl AsRef<Path>) -> CoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(BUILDS_DIR))?;
        fs::create_dir_all(root.join(INCIDENTS_DIR))?;
        Ok(Self {
            root,
            lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn insert_build(&self, job: &BuildJob) -> CoreResult<()> {
        let _g = self.guard()?;
        self.insert_record(BUILDS_DIR, &job.build_id, job)
    }

    pub fn load_build(&self, build_id: &str) -> CoreResult<BuildJob> {
        self.load_record(BUILDS_DIR, build_id)
    }

    /// Applies `f` to the current record and persists the result. Nothing is
    /// written when `f` fails. `updated_at` is stamped on every write.
    pub fn update_build<F>(&self, build_id: &str, f: F) -> CoreResult<BuildJob>
    where
        F: FnOnce(&mut BuildJob) -> CoreResult<()>,
    {
        let _g = self.guard()?;
        let mut job: BuildJob = self.load_record(BUILDS_DIR, build_id)?;
        f(&mut job)?;
        job.updated_at = now_rfc3339_utc()?;
        self.write_record(BUILDS_DIR, build_id, &job)?;
        Ok(job)
    }

    pub fn list_builds(&self) -> CoreResult<Vec<BuildJob>> {
        self.list_records(BUILDS_DIR)
    }

    pub fn insert_incident(&self, incident: &Incident) -> CoreResult<()> {
        let _g = self.guard()?;
        self.insert_record(INCIDENTS_DIR, &incident.incident_id, incident)
    }

    pub fn load_incident(&self, incident_id: &str) -> CoreResult<Incident> {
        self.load_record(INCIDENTS_DIR, incident_id)
    }

    pub fn update_incident<F>(&self, incident_id: &str, f: F) -> CoreResult<Incident>
    where
        F: FnOnce(&mut Incident) -> CoreResult<()>,
    {
        let _g = self.guard()?;
        let mut incident: Incident = self.load_record(INCIDENTS_DIR, incident_id)?;
        f(&mut incident)?;
        self.write_record(INCIDENTS_DIR, incident_id, &incident)?;
        Ok(incident)
    }

    pub fn list_incidents(&self) -> CoreResult<Vec<Incident>> {
        self.list_records(INCIDENTS_DIR)
    }

    fn guard(&self) -> CoreResult<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| CoreError::Infrastructure("record store lock poisoned".to_string()))
    }

    fn record_path(&self, dir: &str, id: &str) -> CoreResult<PathBuf> {
        validate_record_id(id)?;
        Ok(self.root.join(dir).join(format!("{}.json", id)))
    }

    fn insert_record<T: Serialize>(&self, dir: &str, id: &str, value: &T) -> CoreResult<()> {
        if self.record_path(dir, id)?.exists() {
            return Err(CoreError::InvalidInput(format!(
                "{} record {} already exists",
                dir, id
            )));
        }
        self.write_record(dir, id, value)
    }

    fn load_record<T: DeserializeOwned>(&self, dir: &str, id: &str) -> CoreResult<T> {
        let path = self.record_path(dir, id)?;
        if !path.exists() {
            return Err(CoreError::NotFound(format!("{} record {}", dir, id)));
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_record<T: Serialize>(&self, dir: &str, id: &str, value: &T) -> CoreResult<()> {
        let path = self.record_path(dir, id)?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut f = File::create(&tmp)?;
            f.write_all(&serde_json::to_vec_pretty(value)?)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn list_records<T: DeserializeOwned>(&self, dir: &str) -> CoreResult<Vec<T>> {
        let mut paths = Vec::new();
        for ent in fs::read_dir(self.root.join(dir))? {
            let p = ent?.path();
            if p.extension().and_then(|x| x.to_str()) == Some("json") {
                paths.push(p);
            }
        }
        paths.sort();
        let mut out = Vec::with_capacity(paths.len());
        for p in paths {
            out.push(serde_json::from_slice(&fs::read(p)?)?);
        }
        Ok(out)
    }
}
