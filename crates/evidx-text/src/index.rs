use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy};
use tracing::debug;

use evidx_core::error::{Error, Result};
use evidx_core::types::Chunk;

use crate::tantivy_utils::{build_schema, keyword_err, register_tokenizer, KeywordFields};

const WRITER_MEMORY_BUDGET: usize = 50_000_000;

/// One row of the keyword index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordRow {
    pub doc_id: String,
    pub chunk_id: String,
    pub title: String,
    pub text: String,
    pub source_type: String,
    pub updated_at: String,
}

impl From<&Chunk> for KeywordRow {
    fn from(c: &Chunk) -> Self {
        Self {
            doc_id: c.doc_id.clone(),
            chunk_id: c.chunk_id.clone(),
            title: c.title.clone(),
            text: c.text.clone(),
            source_type: c.source_type.to_string(),
            updated_at: c.updated_at.clone(),
        }
    }
}

/// BM25 full-text index over chunk text, backed by a tantivy directory.
///
/// The index and reader are held for the life of the value; the writer is
/// created on the first write and kept until [`KeywordIndex::close`].
pub struct KeywordIndex {
    dir: PathBuf,
    pub(crate) index: Index,
    pub(crate) reader: IndexReader,
    pub(crate) fields: KeywordFields,
    writer: Mutex<Option<IndexWriter>>,
}

impl KeywordIndex {
    /// Open the index in `dir`, creating an empty one if none exists.
    pub fn initialize(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::io(format!("create {}", dir.display()), e))?;
        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir).map_err(keyword_err)?
        } else {
            Index::create_in_dir(dir, build_schema()).map_err(keyword_err)?
        };
        Self::from_index(dir, index)
    }

    /// Open an existing index read-only; fails if `dir` holds no index.
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.join("meta.json").exists() {
            return Err(Error::IndexUnavailable(dir.to_path_buf()));
        }
        let index = Index::open_in_dir(dir).map_err(keyword_err)?;
        Self::from_index(dir, index)
    }

    fn from_index(dir: &Path, index: Index) -> Result<Self> {
        register_tokenizer(&index);
        let fields = KeywordFields::resolve(&index.schema())?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(keyword_err)?;
        Ok(Self { dir: dir.to_path_buf(), index, reader, fields, writer: Mutex::new(None) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn with_writer<T>(
        &self,
        f: impl FnOnce(&mut IndexWriter, &KeywordFields) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.writer.lock();
        if guard.is_none() {
            *guard = Some(self.index.writer(WRITER_MEMORY_BUDGET).map_err(keyword_err)?);
        }
        let writer = guard
            .as_mut()
            .ok_or_else(|| Error::KeywordIndex("writer unavailable".into()))?;
        let out = f(writer, &self.fields)?;
        writer.commit().map_err(keyword_err)?;
        self.reader.reload().map_err(keyword_err)?;
        Ok(out)
    }

    /// Remove every row.
    pub fn clear(&self) -> Result<()> {
        self.with_writer(|writer, _| {
            writer.delete_all_documents().map_err(keyword_err)?;
            Ok(())
        })
    }

    pub fn add_documents(&self, rows: &[KeywordRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let added = self.with_writer(|writer, f| {
            for row in rows {
                writer
                    .add_document(doc!(
                        f.doc_id => row.doc_id.clone(),
                        f.chunk_id => row.chunk_id.clone(),
                        f.title => row.title.clone(),
                        f.text => row.text.clone(),
                        f.source_type => row.source_type.clone(),
                        f.updated_at => row.updated_at.clone(),
                    ))
                    .map_err(keyword_err)?;
            }
            Ok(rows.len())
        })?;
        debug!("keyword index {}: added {} rows", self.dir.display(), added);
        Ok(added)
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Release the writer and its directory lock.
    pub fn close(&self) {
        self.writer.lock().take();
    }
}
