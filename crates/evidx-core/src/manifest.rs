//! Bookkeeping record of what a generation contains.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

pub const MANIFEST_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    pub embedding_model: String,
    pub chunks: usize,
    #[serde(default)]
    pub indexed_runs: BTreeSet<String>,
    #[serde(default)]
    pub kb_indexed_at: Option<String>,
    /// Chunks discarded because they carried no run id or file path.
    #[serde(default)]
    pub dropped_chunks: usize,
}

fn default_format_version() -> u32 {
    MANIFEST_FORMAT_VERSION
}

impl IndexManifest {
    pub fn new(embedding_model: impl Into<String>) -> Self {
        let now = now_iso();
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            created_at: now.clone(),
            updated_at: now,
            embedding_model: embedding_model.into(),
            chunks: 0,
            indexed_runs: BTreeSet::new(),
            kb_indexed_at: None,
            dropped_chunks: 0,
        }
    }

    /// Load a manifest; a missing file means "never built".
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(format!("read {}", path.display()), e)),
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|source| Error::Serialization {
                context: format!("parse {}", path.display()),
                source,
            })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|source| Error::Serialization {
                context: "serialize manifest".into(),
                source,
            })?;
        fs::write(path, json).map_err(|e| Error::io(format!("write {}", path.display()), e))
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
