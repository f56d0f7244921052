//! Full and incremental index builds.
//!
//! Every build writes a complete generation (chunk log, keyword index,
//! vector file, manifest) under a fresh directory and publishes it by
//! flipping `CURRENT`. A failed build leaves the published generation
//! untouched.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use evidx_core::chunk_log::{append_chunks, read_chunk_ids};
use evidx_core::chunker::{chunk_document, ChunkingConfig};
use evidx_core::error::{Error, Result};
use evidx_core::layout::{Generation, IndexLayout};
use evidx_core::manifest::{now_iso, IndexManifest};
use evidx_core::traits::EmbeddingProvider;
use evidx_core::types::{Chunk, SourceDocument};
use evidx_text::{KeywordIndex, KeywordRow};
use evidx_vector::VectorIndex;

use crate::source::DocumentSource;

const EMBED_BATCH: usize = 64;
const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}";

/// Published generation and what it holds.
#[derive(Debug, Clone)]
pub struct IndexStatus {
    pub generation: String,
    pub manifest: IndexManifest,
}

/// Chunks ready to persist plus bookkeeping from the chunking pass.
#[derive(Debug, Default)]
struct Prepared {
    chunks: Vec<Chunk>,
    dropped: usize,
    duplicates: usize,
}

pub struct Indexer<S: DocumentSource> {
    layout: IndexLayout,
    source: S,
    embedder: Arc<dyn EmbeddingProvider>,
    chunking: ChunkingConfig,
    write_lock: Mutex<()>,
    show_progress: bool,
}

impl<S: DocumentSource> Indexer<S> {
    pub fn new(
        layout: IndexLayout,
        source: S,
        embedder: Arc<dyn EmbeddingProvider>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            layout,
            source,
            embedder,
            chunking,
            write_lock: Mutex::new(()),
            show_progress: false,
        }
    }

    /// Draw an embedding progress bar on stderr.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    pub fn status(&self) -> Result<Option<IndexStatus>> {
        let Some(generation) = self.layout.current()? else { return Ok(None) };
        Ok(IndexManifest::load(&generation.manifest())?
            .map(|manifest| IndexStatus { generation: generation.name().to_string(), manifest }))
    }

    /// Re-index every document from scratch.
    pub fn rebuild(&self) -> Result<IndexManifest> {
        let _guard = self.write_lock.lock();
        let _writer = self.layout.lock_writer()?;
        self.rebuild_locked()
    }

    /// Index runs not yet in the manifest and, if the knowledge base changed,
    /// its current notes. Returns the manifest unchanged when there is nothing
    /// new.
    pub fn update(&self) -> Result<IndexManifest> {
        let _guard = self.write_lock.lock();
        let _writer = self.layout.lock_writer()?;
        let Some(current) = self.layout.current()? else {
            info!("no published index, rebuilding");
            return self.rebuild_locked();
        };
        let manifest = match IndexManifest::load(&current.manifest()) {
            Ok(Some(m)) => m,
            Ok(None) => {
                warn!("generation {} has no manifest, rebuilding", current.name());
                return self.rebuild_locked();
            }
            Err(e) => {
                warn!("unreadable manifest in {} ({e}), rebuilding", current.name());
                return self.rebuild_locked();
            }
        };
        if manifest.embedding_model != self.embedder.model_name() {
            warn!(
                "index was built with '{}' but the provider is '{}', rebuilding",
                manifest.embedding_model,
                self.embedder.model_name()
            );
            return self.rebuild_locked();
        }

        let new_runs: Vec<String> = self
            .source
            .run_ids()?
            .into_iter()
            .filter(|id| !manifest.indexed_runs.contains(id))
            .collect();
        let kb_updated_at = self.source.kb_updated_at()?;
        let kb_changed = kb_updated_at != manifest.kb_indexed_at;
        if new_runs.is_empty() && !kb_changed {
            info!("index is up to date ({} chunks)", manifest.chunks);
            return Ok(manifest);
        }
        info!("update: {} new runs, knowledge base changed: {kb_changed}", new_runs.len());

        let mut docs = Vec::new();
        if kb_changed {
            docs.extend(self.source.load_kb()?);
        }
        let loaded_runs = self.load_runs(&new_runs, &mut docs);

        let existing = read_chunk_ids(&current.chunk_log())?;
        let prepared = self.prepare(&docs, &existing);
        let vectors = self.embed(&prepared.chunks)?;

        let mut next = manifest;
        next.indexed_runs.extend(loaded_runs);
        if kb_changed {
            next.kb_indexed_at = kb_updated_at;
        }
        next.chunks += prepared.chunks.len();
        next.dropped_chunks += prepared.dropped;
        next.updated_at = now_iso();

        let stage = self.layout.stage_copy(&current)?;
        self.write_and_publish(&stage, &prepared.chunks, &vectors, &next)?;
        info!(
            "update published {}: +{} chunks ({} duplicates, {} dropped)",
            stage.name(),
            prepared.chunks.len(),
            prepared.duplicates,
            prepared.dropped
        );
        Ok(next)
    }

    fn rebuild_locked(&self) -> Result<IndexManifest> {
        let started = Instant::now();
        let run_ids = self.source.run_ids()?;
        let kb_updated_at = self.source.kb_updated_at()?;
        let mut docs = self.source.load_kb()?;
        let loaded_runs = self.load_runs(&run_ids, &mut docs);

        let prepared = self.prepare(&docs, &HashSet::new());
        let vectors = self.embed(&prepared.chunks)?;

        let mut manifest = IndexManifest::new(self.embedder.model_name());
        manifest.chunks = prepared.chunks.len();
        manifest.indexed_runs = loaded_runs;
        manifest.kb_indexed_at = kb_updated_at;
        manifest.dropped_chunks = prepared.dropped;

        let stage = self.layout.stage()?;
        self.write_and_publish(&stage, &prepared.chunks, &vectors, &manifest)?;
        info!(
            "rebuild published {}: {} documents, {} chunks, {} dropped in {:?}",
            stage.name(),
            docs.len(),
            manifest.chunks,
            manifest.dropped_chunks,
            started.elapsed()
        );
        Ok(manifest)
    }

    /// Load each run, skipping those that fail. Returns the ids that loaded.
    fn load_runs(&self, run_ids: &[String], docs: &mut Vec<SourceDocument>) -> BTreeSet<String> {
        let mut loaded = BTreeSet::new();
        for run_id in run_ids {
            match self.source.load_run(run_id) {
                Ok(run_docs) => {
                    docs.extend(run_docs);
                    loaded.insert(run_id.clone());
                }
                Err(e) => warn!("skipping run {run_id}: {e}"),
            }
        }
        loaded
    }

    fn prepare(&self, docs: &[SourceDocument], existing: &HashSet<String>) -> Prepared {
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Prepared::default();
        for doc in docs {
            for chunk in chunk_document(doc, &self.chunking) {
                if !chunk.is_attributable() {
                    debug!("{}", Error::ProvenanceViolation(chunk.chunk_id.clone()));
                    out.dropped += 1;
                    continue;
                }
                if existing.contains(&chunk.chunk_id) || !seen.insert(chunk.chunk_id.clone()) {
                    out.duplicates += 1;
                    continue;
                }
                out.chunks.push(chunk);
            }
        }
        if out.dropped > 0 {
            warn!("dropped {} chunks without run id or file path", out.dropped);
        }
        out
    }

    fn embed(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let pb = if self.show_progress {
            ProgressBar::new(chunks.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template(PROGRESS_TEMPLATE)
                .map(|s| s.progress_chars("#>-"))
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.set_message("embedding");
        let model = self.embedder.model_name().to_string();
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = self.embedder.embed(&texts)?;
            if embeddings.vectors.len() != texts.len() {
                return Err(Error::EmbeddingBackend(format!(
                    "provider returned {} vectors for {} texts",
                    embeddings.vectors.len(),
                    texts.len()
                )));
            }
            if embeddings.model != model {
                return Err(Error::ModelMismatch { expected: model, actual: embeddings.model });
            }
            vectors.extend(embeddings.vectors);
            pb.inc(batch.len() as u64);
        }
        pb.finish_and_clear();
        Ok(vectors)
    }

    fn write_and_publish(
        &self,
        stage: &Generation,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        manifest: &IndexManifest,
    ) -> Result<()> {
        let result = self
            .write_generation(stage, chunks, vectors, manifest)
            .and_then(|()| self.layout.publish(stage));
        if result.is_err() {
            self.layout.discard(stage);
        }
        result
    }

    fn write_generation(
        &self,
        stage: &Generation,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        manifest: &IndexManifest,
    ) -> Result<()> {
        append_chunks(&stage.chunk_log(), chunks)?;

        let keyword = KeywordIndex::initialize(&stage.keyword_dir())?;
        let rows: Vec<KeywordRow> = chunks.iter().map(KeywordRow::from).collect();
        keyword.add_documents(&rows)?;
        keyword.close();

        let mut vector_index = VectorIndex::load(&stage.vectors())?;
        let ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
        vector_index.add(&ids, vectors, self.embedder.model_name())?;
        vector_index.save(&stage.vectors())?;

        manifest.save(&stage.manifest())?;
        debug!("wrote generation {} ({} new chunks)", stage.name(), chunks.len());
        Ok(())
    }
}
