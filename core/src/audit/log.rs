use crate::audit::event::{finalize_event, AuditEvent, ZERO_HASH_64};
use crate::error::{CoreError, CoreResult};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only NDJSON audit trail shared by builds and incidents. Every event
/// carries the hash of the one before it.
pub struct AuditLog {
    path: PathBuf,
    last_hash: String,
}

impl AuditLog {
    /// Opens the trail at `path`, creating it if needed. Existing events must
    /// link up; appends continue from the last one.
    pub fn open_or_create(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        let last_hash = chain_head(&read_events(&path)?)?;
        Ok(Self { path, last_hash })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, mut event: AuditEvent) -> CoreResult<AuditEvent> {
        event.prev_event_hash = self.last_hash.clone();
        let event = finalize_event(event)?;
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        // No `create`: a trail removed underneath us is an error, not a new chain.
        let mut f = OpenOptions::new().append(true).open(&self.path)?;
        f.write_all(&line)?;
        self.last_hash = event.event_hash.clone();
        Ok(event)
    }

    /// All events in append order.
    pub fn read_all(&self) -> CoreResult<Vec<AuditEvent>> {
        read_events(&self.path)
    }
}

fn read_events(path: &Path) -> CoreResult<Vec<AuditEvent>> {
    let text = fs::read_to_string(path)?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| Ok(serde_json::from_str(l)?))
        .collect()
}

/// Hash the next event links to.
fn chain_head(events: &[AuditEvent]) -> CoreResult<String> {
    let mut head = ZERO_HASH_64;
    for (n, e) in events.iter().enumerate() {
        if e.prev_event_hash != head {
            return Err(CoreError::InvalidInput(format!(
                "audit trail broken at event {} ({})",
                n + 1,
                e.event_type
            )));
        }
        head = e.event_hash.as_str();
    }
    Ok(head.to_string())
}
