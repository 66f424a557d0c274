use crate::adapters::interface::ObjectSource;
use crate::archive::budget::AttemptBudget;
use crate::error::{CoreError, CoreResult};
use crate::ids::validate_record_id;
use crate::model::build::{ArchiveObject, ScratchCheckpoint};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::{CompressionMethod, ZipArchive};

// Tags mid-stream read errors with the object key so they classify as
// source reads rather than scratch writes.
struct KeyedReader<'a, R> {
    key: &'a str,
    inner: R,
}

impl<R: Read> Read for KeyedReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|e| {
            io::Error::new(e.kind(), format!("failed to read object {}: {}", self.key, e))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkReport {
    pub appended: usize,
    pub skipped: usize,
    /// Scratch state after the chunk; persist it together with `chunk_index`.
    pub checkpoint: ScratchCheckpoint,
}

/// Scratch archive for one build, keyed by build id.
///
/// Chunks are appended in place. Before an append, everything from the start
/// of the central directory to EOF is saved to `<build_id>.zip.tail`. A failed
/// append is undone by truncating back to the directory start and writing the
/// saved tail, which restores the committed archive byte for byte; entry data
/// is never copied. Entries already present by name are skipped, so replaying
/// a chunk after a lost progress write is harmless.
pub struct ArchiveAccumulator {
    path: PathBuf,
    tail_path: PathBuf,
    entries: BTreeSet<String>,
    len: u64,
}

impl ArchiveAccumulator {
    /// Opens the scratch archive for `build_id`. A file that grew past
    /// `committed` is rolled back to it; an unreadable one is dropped.
    pub fn open_or_resume(
        scratch_dir: &Path,
        build_id: &str,
        committed: Option<ScratchCheckpoint>,
    ) -> CoreResult<Self> {
        validate_record_id(build_id)?;
        fs::create_dir_all(scratch_dir)?;
        let mut acc = Self {
            path: scratch_dir.join(format!("{}.zip", build_id)),
            tail_path: scratch_dir.join(format!("{}.zip.tail", build_id)),
            entries: BTreeSet::new(),
            len: 0,
        };
        if !acc.path.exists() {
            debug!(build_id, "no scratch archive yet");
            return Ok(acc);
        }

        if let Some(cp) = committed {
            let found = fs::metadata(&acc.path)?.len();
            if found != cp.bytes {
                match fs::read(&acc.tail_path) {
                    Ok(tail) if tail.len() as u64 <= cp.bytes => {
                        warn!(
                            build_id,
                            found,
                            committed = cp.bytes,
                            "scratch archive moved past its checkpoint, rolling back"
                        );
                        restore_tail(&acc.path, cp.bytes - tail.len() as u64, &tail)?;
                    }
                    _ => warn!(
                        build_id,
                        found,
                        committed = cp.bytes,
                        "no usable tail for scratch archive"
                    ),
                }
            }
        }

        match ZipArchive::new(File::open(&acc.path)?) {
            Ok(za) => {
                acc.entries.extend(za.file_names().map(str::to_string));
                acc.len = fs::metadata(&acc.path)?.len();
                if let Some(cp) = committed {
                    if cp.entries != acc.entries.len() {
                        warn!(
                            build_id,
                            found = acc.entries.len(),
                            committed = cp.entries,
                            "scratch entry count differs from checkpoint"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(build_id, error = %e, "scratch archive unreadable, starting over");
                acc.remove_files()?;
            }
        }
        debug!(build_id, entries = acc.entries.len(), bytes = acc.len, "scratch archive opened");
        Ok(acc)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, entry_name: &str) -> bool {
        self.entries.contains(entry_name)
    }

    pub fn checkpoint(&self) -> ScratchCheckpoint {
        ScratchCheckpoint {
            bytes: self.len,
            entries: self.entries.len(),
        }
    }

    pub fn append_chunk(
        &mut self,
        objects: &[ArchiveObject],
        source: &dyn ObjectSource,
        budget: &AttemptBudget,
    ) -> CoreResult<ChunkReport> {
        let pending: Vec<&ArchiveObject> = objects
            .iter()
            .filter(|o| !self.entries.contains(&o.entry_name))
            .collect();
        let skipped = objects.len() - pending.len();
        if pending.is_empty() {
            return Ok(ChunkReport {
                appended: 0,
                skipped,
                checkpoint: self.checkpoint(),
            });
        }

        let saved = if self.path.exists() {
            Some(self.save_tail()?)
        } else {
            None
        };
        match self.append_in_place(&pending, source, budget) {
            Ok(len) => {
                self.len = len;
                self.entries
                    .extend(pending.iter().map(|o| o.entry_name.clone()));
                Ok(ChunkReport {
                    appended: pending.len(),
                    skipped,
                    checkpoint: self.checkpoint(),
                })
            }
            Err(e) => {
                if let Err(rb) = self.roll_back(saved) {
                    // Left torn; the next open rolls back from the tail file.
                    error!(path = %self.path.display(), error = %rb, "scratch rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Removes the scratch files once the archive is durably stored.
    pub fn discard(self) -> CoreResult<()> {
        self.remove_files()
    }

    fn append_in_place(
        &self,
        pending: &[&ArchiveObject],
        source: &dyn ObjectSource,
        budget: &AttemptBudget,
    ) -> CoreResult<u64> {
        let mut zw = if self.path.exists() {
            let f = OpenOptions::new().read(true).write(true).open(&self.path)?;
            ZipWriter::new_append(f)?
        } else {
            ZipWriter::new(File::create(&self.path)?)
        };

        // Fixed timestamp keeps the bytes independent of when a chunk ran.
        let fixed_time = zip::DateTime::from_date_and_time(1980, 1, 1, 0, 0, 0)
            .map_err(|_| CoreError::Zip("failed to create fixed zip datetime".to_string()))?;
        let opts = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(6))
            .last_modified_time(fixed_time)
            .unix_permissions(0o644)
            .large_file(true);

        for obj in pending {
            budget.check()?;
            let mut body = KeyedReader {
                key: &obj.key,
                inner: source.get_bytes(&obj.key)?,
            };
            zw.start_file(obj.entry_name.as_str(), opts)?;
            io::copy(&mut body, &mut zw)?;
        }
        let f = zw.finish()?;
        f.sync_all()?;
        Ok(f.metadata()?.len())
    }

    fn save_tail(&self) -> CoreResult<(u64, Vec<u8>)> {
        let mut f = File::open(&self.path)?;
        let dir_start = ZipArchive::new(&mut f)?.central_directory_start();
        f.seek(SeekFrom::Start(dir_start))?;
        let mut tail = Vec::new();
        f.read_to_end(&mut tail)?;

        let tmp = self.tail_path.with_extension("tail.partial");
        {
            let mut out = File::create(&tmp)?;
            out.write_all(&tail)?;
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.tail_path)?;
        Ok((dir_start, tail))
    }

    fn roll_back(&self, saved: Option<(u64, Vec<u8>)>) -> CoreResult<()> {
        match saved {
            Some((dir_start, tail)) => restore_tail(&self.path, dir_start, &tail),
            None if self.path.exists() => Ok(fs::remove_file(&self.path)?),
            None => Ok(()),
        }
    }

    fn remove_files(&self) -> CoreResult<()> {
        for p in [&self.path, &self.tail_path] {
            if p.exists() {
                fs::remove_file(p)?;
            }
        }
        Ok(())
    }
}

fn restore_tail(path: &Path, dir_start: u64, tail: &[u8]) -> CoreResult<()> {
    let mut f = OpenOptions::new().write(true).open(path)?;
    f.set_len(dir_start)?;
    f.seek(SeekFrom::Start(dir_start))?;
    f.write_all(tail)?;
    f.sync_all()?;
    Ok(())
}
