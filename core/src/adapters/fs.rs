use crate::adapters::interface::{
    AgentDispatcher, AgentRequest, DurableStore, ObjectSource, PutReceipt, TicketPayload,
    TicketingSystem,
};
use crate::error::{CoreError, CoreResult};
use crate::ids::{now_rfc3339_utc, sha256_hex};
use crate::model::incident::Severity;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use ulid::Ulid;

fn resolve_under(root: &Path, rel: &str) -> CoreResult<PathBuf> {
    let p = Path::new(rel);
    if rel.is_empty()
        || !p
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(CoreError::InvalidInput(format!(
            "path must be relative without '..': {:?}",
            rel
        )));
    }
    Ok(root.join(p))
}

/// Object source over a local directory; keys are relative paths.
pub struct FsObjectSource {
    root: PathBuf,
}

impl FsObjectSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl ObjectSource for FsObjectSource {
    fn exists(&self, key: &str) -> CoreResult<bool> {
        Ok(resolve_under(&self.root, key)?.is_file())
    }

    fn get_bytes(&self, key: &str) -> CoreResult<Box<dyn Read + '_>> {
        let path = resolve_under(&self.root, key)?;
        match File::open(&path) {
            Ok(f) => Ok(Box::new(BufReader::new(f))),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(
                CoreError::PermissionDenied(format!("reading object {}", key)),
            ),
            Err(e) => Err(CoreError::SourceRead {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Durable store over a local directory. Writes go to a temp file and are
/// renamed into place once complete.
pub struct FsDurableStore {
    root: PathBuf,
}

impl FsDurableStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl DurableStore for FsDurableStore {
    fn put(&self, path: &str, body: &mut dyn Read) -> CoreResult<PutReceipt> {
        let dest = resolve_under(&self.root, path)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = dest.with_extension("partial");
        let mut out = File::create(&tmp)?;
        let mut h = Sha256::new();
        let mut size: u64 = 0;
        let mut buf = [0u8; 8192];
        loop {
            let n = body.read(&mut buf)?;
            if n == 0 {
                break;
            }
            h.update(&buf[..n]);
            out.write_all(&buf[..n])?;
            size += n as u64;
        }
        out.sync_all()?;
        drop(out);
        fs::rename(&tmp, &dest)?;
        debug!(path, size, "durable put completed");
        Ok(PutReceipt {
            path: path.to_string(),
            size_bytes: size,
            sha256: hex::encode(h.finalize()),
        })
    }
}

/// Ticketing outbox: each ticket is a JSON file picked up by the external
/// support system.
pub struct FsTicketOutbox {
    dir: PathBuf,
}

impl FsTicketOutbox {
    pub fn open_or_create(dir: impl AsRef<Path>) -> CoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join("keys"))?;
        Ok(Self { dir })
    }

    fn key_path(&self, idempotency_key: &str) -> PathBuf {
        self.dir
            .join("keys")
            .join(sha256_hex(idempotency_key.as_bytes()))
    }
}

impl TicketingSystem for FsTicketOutbox {
    fn create(&self, severity: Severity, payload: &TicketPayload) -> CoreResult<String> {
        let key_path = self.key_path(&payload.idempotency_key);
        if key_path.is_file() {
            let ticket_id = fs::read_to_string(&key_path)?.trim().to_string();
            debug!(%ticket_id, key = %payload.idempotency_key, "ticket already in outbox");
            return Ok(ticket_id);
        }

        let ticket_id = format!("tkt_{}", Ulid::new());
        let doc = serde_json::json!({
            "ticket_id": ticket_id,
            "severity": severity,
            "created_at": now_rfc3339_utc()?,
            "payload": payload,
        });
        fs::write(
            self.dir.join(format!("{}.json", ticket_id)),
            serde_json::to_vec_pretty(&doc)?,
        )?;
        fs::write(&key_path, &ticket_id)?;
        info!(%ticket_id, source_id = %payload.source_id, "ticket written to outbox");
        Ok(ticket_id)
    }
}

/// Agent outbox: one JSON file per diagnostic request.
pub struct FsAgentOutbox {
    dir: PathBuf,
}

impl FsAgentOutbox {
    pub fn open_or_create(dir: impl AsRef<Path>) -> CoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl AgentDispatcher for FsAgentOutbox {
    fn trigger(&self, req: &AgentRequest) -> CoreResult<()> {
        let path = self.dir.join(format!("agent_{}.json", Ulid::new()));
        fs::write(path, serde_json::to_vec_pretty(req)?)?;
        Ok(())
    }
}
