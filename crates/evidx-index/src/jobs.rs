//! Single-slot background index jobs.
//!
//! At most one rebuild or update runs at a time; submitting while a job is
//! running fails with [`Error::JobInFlight`]. The status of the last job is
//! kept until the next submission replaces it.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info};

use evidx_core::error::{Error, Result};
use evidx_core::manifest::{now_iso, IndexManifest};

use crate::indexer::Indexer;
use crate::source::DocumentSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Rebuild,
    Update,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rebuild => "rebuild",
            Self::Update => "update",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: u64,
    pub kind: JobKind,
    pub state: JobState,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub manifest: Option<IndexManifest>,
    pub error: Option<String>,
}

pub struct IndexJobs<S: DocumentSource + 'static> {
    indexer: Arc<Indexer<S>>,
    slot: Arc<Mutex<Option<JobStatus>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl<S: DocumentSource + 'static> IndexJobs<S> {
    pub fn new(indexer: Arc<Indexer<S>>) -> Self {
        Self {
            indexer,
            slot: Arc::new(Mutex::new(None)),
            handle: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start `kind` on a background thread and return its id.
    pub fn submit(&self, kind: JobKind) -> Result<u64> {
        let mut slot = self.slot.lock();
        if let Some(running) = slot.as_ref().filter(|s| s.state == JobState::Running) {
            let detail = format!("{} job {} is still running", running.kind, running.id);
            return Err(Error::JobInFlight(detail));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *slot = Some(JobStatus {
            id,
            kind,
            state: JobState::Running,
            started_at: now_iso(),
            finished_at: None,
            manifest: None,
            error: None,
        });
        drop(slot);

        let indexer = Arc::clone(&self.indexer);
        let status = Arc::clone(&self.slot);
        let spawned = std::thread::Builder::new().name(format!("evidx-{kind}-{id}")).spawn(move || {
            info!("{kind} job {id} started");
            let result = panic::catch_unwind(AssertUnwindSafe(|| match kind {
                JobKind::Rebuild => indexer.rebuild(),
                JobKind::Update => indexer.update(),
            }))
            .unwrap_or_else(|payload| {
                Err(Error::Operation(format!("index job panicked: {}", panic_message(&*payload))))
            });
            let mut slot = status.lock();
            if let Some(s) = slot.as_mut().filter(|s| s.id == id) {
                s.finished_at = Some(now_iso());
                match result {
                    Ok(manifest) => {
                        info!("{kind} job {id} succeeded ({} chunks)", manifest.chunks);
                        s.state = JobState::Succeeded;
                        s.manifest = Some(manifest);
                    }
                    Err(e) => {
                        error!("{kind} job {id} failed: {e}");
                        s.state = JobState::Failed;
                        s.error = Some(e.to_string());
                    }
                }
            }
        });
        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(id)
            }
            Err(e) => {
                let mut slot = self.slot.lock();
                if let Some(s) = slot.as_mut() {
                    s.state = JobState::Failed;
                    s.finished_at = Some(now_iso());
                    s.error = Some(e.to_string());
                }
                Err(Error::io("spawn index job", e))
            }
        }
    }

    pub fn status(&self) -> Option<JobStatus> {
        self.slot.lock().clone()
    }

    /// Block until the current job (if any) finishes and return its status.
    pub fn wait(&self) -> Option<JobStatus> {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                let mut slot = self.slot.lock();
                if let Some(s) = slot.as_mut().filter(|s| s.state == JobState::Running) {
                    s.state = JobState::Failed;
                    s.finished_at = Some(now_iso());
                    s.error = Some("index job panicked".to_string());
                }
            }
        }
        self.status()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
