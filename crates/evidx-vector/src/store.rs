use std::cmp::Ordering;
use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, info};

use evidx_core::error::{Error, Result};
use evidx_core::traits::l2_normalize;
use evidx_core::types::ScoredId;

use crate::codec;

/// Row-major matrix of embeddings keyed by chunk id.
///
/// An empty index has no model or width; the first `add` fixes both.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    model: String,
    dim: usize,
    ids: Vec<String>,
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `path`; a missing file is an empty index.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no vector file at {}, starting empty", path.display());
                return Ok(Self::new());
            }
            Err(e) => return Err(Error::io(format!("reading {}", path.display()), e)),
        };
        let decoded = codec::decode(&bytes)?;
        info!(
            "loaded {} vectors (dim {}, model {}) from {}",
            decoded.ids.len(),
            decoded.dim,
            decoded.model,
            path.display()
        );
        Ok(Self { model: decoded.model, dim: decoded.dim, ids: decoded.ids, data: decoded.data })
    }

    /// Write atomically: temp file in the target directory, then rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = codec::encode(&self.model, self.dim, &self.ids, &self.data)?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| Error::io(format!("creating {}", dir.display()), e))?;
        let mut tmp =
            NamedTempFile::new_in(dir).map_err(|e| Error::io("creating temp vector file", e))?;
        tmp.write_all(&bytes).map_err(|e| Error::io("writing temp vector file", e))?;
        tmp.as_file().sync_all().map_err(|e| Error::io("syncing temp vector file", e))?;
        tmp.persist(path)
            .map_err(|e| Error::io(format!("renaming into {}", path.display()), e.error))?;
        debug!("saved {} vectors to {}", self.ids.len(), path.display());
        Ok(())
    }

    /// Append rows, L2-normalizing each one so search scores are cosines.
    /// Validation happens before any mutation.
    pub fn add(&mut self, ids: &[String], vectors: &[Vec<f32>], model: &str) -> Result<()> {
        if ids.len() != vectors.len() {
            let detail = format!("{} ids for {} vectors", ids.len(), vectors.len());
            return Err(Error::Operation(detail));
        }
        let Some(first) = vectors.first() else { return Ok(()) };
        let width = if self.is_empty() { first.len() } else { self.dim };
        if width == 0 {
            return Err(Error::DimensionMismatch { expected: 1, actual: 0 });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != width) {
            return Err(Error::DimensionMismatch { expected: width, actual: bad.len() });
        }
        if !self.is_empty() && self.model != model {
            return Err(Error::ModelMismatch {
                expected: self.model.clone(),
                actual: model.to_string(),
            });
        }
        if self.is_empty() {
            self.model = model.to_string();
            self.dim = width;
        }
        self.ids.extend_from_slice(ids);
        self.data.reserve(vectors.len() * width);
        for v in vectors {
            let start = self.data.len();
            self.data.extend_from_slice(v);
            l2_normalize(&mut self.data[start..]);
        }
        Ok(())
    }

    /// Exact top-k by dot product against the L2-normalized query.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredId>> {
        if self.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: query.len() });
        }
        let mut q = query.to_vec();
        l2_normalize(&mut q);
        if self.dim == 0 {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(i, row)| (i, row.iter().zip(&q).map(|(a, b)| a * b).sum()))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));
        scored.truncate(top_k);
        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredId { chunk_id: self.ids[i].clone(), score })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}
