//! On-disk layout of an index root.
//!
//! ```text
//! <root>/CURRENT             name of the published generation
//! <root>/WRITER.lock         present while a process is building a generation
//! <root>/gen-<timestamp>/    chunks.jsonl, keyword/, vectors.bin, manifest.json
//! ```
//!
//! Writers build a complete generation next to the published one and flip
//! `CURRENT` with a rename, so readers only ever open finished generations.
//! The previously published generation is kept for readers that opened it
//! before the flip; anything older is pruned. Only the holder of the writer
//! lock stages, publishes or prunes.

use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const CURRENT_FILE: &str = "CURRENT";
pub const WRITER_LOCK_FILE: &str = "WRITER.lock";
pub const CHUNK_LOG_FILE: &str = "chunks.jsonl";
pub const KEYWORD_DIR: &str = "keyword";
pub const VECTORS_FILE: &str = "vectors.bin";
pub const MANIFEST_FILE: &str = "manifest.json";
const GENERATION_PREFIX: &str = "gen-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    name: String,
    dir: PathBuf,
}

impl Generation {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn chunk_log(&self) -> PathBuf {
        self.dir.join(CHUNK_LOG_FILE)
    }

    pub fn keyword_dir(&self) -> PathBuf {
        self.dir.join(KEYWORD_DIR)
    }

    pub fn vectors(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    pub fn manifest(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }
}

/// Exclusive writer lock on an index root, released on drop.
///
/// Advisory: it only excludes other writers that also take it. A lock file
/// left behind by a killed process must be removed by hand.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("could not release writer lock {}: {e}", self.path.display());
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexLayout {
    root: PathBuf,
}

impl IndexLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .map_err(|e| Error::io(format!("create {}", self.root.display()), e))
    }

    fn generation(&self, name: &str) -> Generation {
        Generation { name: name.to_string(), dir: self.root.join(name) }
    }

    /// Take the writer lock, failing with [`Error::JobInFlight`] when another
    /// writer holds it.
    pub fn lock_writer(&self) -> Result<WriterLock> {
        self.ensure_root()?;
        let path = self.root.join(WRITER_LOCK_FILE);
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut f) => {
                let owner =
                    format!("pid {} since {}\n", std::process::id(), Utc::now().to_rfc3339());
                if let Err(e) = f.write_all(owner.as_bytes()) {
                    warn!("could not record lock owner in {}: {e}", path.display());
                }
                debug!("took writer lock {}", path.display());
                Ok(WriterLock { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let owner = fs::read_to_string(&path).unwrap_or_default();
                Err(Error::JobInFlight(format!(
                    "{} is held ({}); remove it if no other writer is running",
                    path.display(),
                    owner.trim()
                )))
            }
            Err(e) => Err(Error::io(format!("create {}", path.display()), e)),
        }
    }

    /// The published generation, if any.
    pub fn current(&self) -> Result<Option<Generation>> {
        let pointer = self.root.join(CURRENT_FILE);
        let name = match fs::read_to_string(&pointer) {
            Ok(s) => s.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(format!("read {}", pointer.display()), e)),
        };
        if name.is_empty() {
            return Ok(None);
        }
        let generation = self.generation(&name);
        if !generation.dir.is_dir() {
            warn!("{} points at missing generation {}", pointer.display(), name);
            return Ok(None);
        }
        Ok(Some(generation))
    }

    /// Create an empty, unpublished generation directory.
    pub fn stage(&self) -> Result<Generation> {
        self.ensure_root()?;
        let base = format!("{GENERATION_PREFIX}{}", Utc::now().format("%Y%m%dT%H%M%S%3f"));
        let mut name = base.clone();
        let mut n = 1;
        while self.root.join(&name).exists() {
            name = format!("{base}-{n}");
            n += 1;
        }
        let generation = self.generation(&name);
        fs::create_dir_all(&generation.dir)
            .map_err(|e| Error::io(format!("create {}", generation.dir.display()), e))?;
        debug!("staged generation {}", generation.name);
        Ok(generation)
    }

    /// Stage a new generation holding a copy of `from`.
    pub fn stage_copy(&self, from: &Generation) -> Result<Generation> {
        let to = self.stage()?;
        for entry in walkdir::WalkDir::new(&from.dir).into_iter().filter_map(|e| e.ok()) {
            let rel = match entry.path().strip_prefix(&from.dir) {
                Ok(rel) if !rel.as_os_str().is_empty() => rel,
                _ => continue,
            };
            let target = to.dir.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)
                    .map_err(|e| Error::io(format!("create {}", target.display()), e))?;
            } else if entry.file_type().is_file() && !is_lock_file(entry.path()) {
                fs::copy(entry.path(), &target)
                    .map_err(|e| Error::io(format!("copy {}", entry.path().display()), e))?;
            }
        }
        Ok(to)
    }

    /// Atomically make `generation` the one readers open, then prune old ones.
    pub fn publish(&self, generation: &Generation) -> Result<()> {
        let previous = self.current()?;
        let tmp = self.root.join(format!("{CURRENT_FILE}.tmp"));
        {
            let mut f = fs::File::create(&tmp)
                .map_err(|e| Error::io(format!("create {}", tmp.display()), e))?;
            f.write_all(generation.name.as_bytes())
                .and_then(|()| f.sync_all())
                .map_err(|e| Error::io(format!("write {}", tmp.display()), e))?;
        }
        let pointer = self.root.join(CURRENT_FILE);
        fs::rename(&tmp, &pointer)
            .map_err(|e| Error::io(format!("rename to {}", pointer.display()), e))?;
        debug!("published generation {}", generation.name);

        let mut keep = vec![generation.name.clone()];
        if let Some(prev) = previous {
            keep.push(prev.name);
        }
        self.prune(&keep);
        Ok(())
    }

    /// Remove an unpublished generation after a failed build.
    pub fn discard(&self, generation: &Generation) {
        if let Err(e) = fs::remove_dir_all(&generation.dir) {
            warn!("could not remove staged generation {}: {e}", generation.dir.display());
        }
    }

    fn prune(&self, keep: &[String]) {
        let Ok(entries) = fs::read_dir(&self.root) else { return };
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(GENERATION_PREFIX) || keep.contains(&name) {
                continue;
            }
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => debug!("pruned generation {name}"),
                Err(e) => warn!("could not prune generation {name}: {e}"),
            }
        }
    }
}

/// Tantivy writer locks are process-local and never copied between generations.
fn is_lock_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "lock")
}
