//! Hybrid retrieval over one published generation.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use evidx_core::chunk_log::read_chunks;
use evidx_core::config::SearchSettings;
use evidx_core::error::{Error, Result};
use evidx_core::layout::IndexLayout;
use evidx_core::traits::EmbeddingProvider;
use evidx_core::types::{Chunk, ChunkMeta, Provenance, ScoredId, SourceType};
use evidx_text::KeywordIndex;
use evidx_vector::VectorIndex;

use crate::filters::SearchFilters;
use crate::fusion::{min_max_normalize, FusionWeights};
use crate::present::{jump_link, snippet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Hybrid,
    Keyword,
    Vector,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hybrid => "hybrid",
            Self::Keyword => "keyword",
            Self::Vector => "vector",
        })
    }
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hybrid" => Ok(Self::Hybrid),
            "keyword" => Ok(Self::Keyword),
            "vector" => Ok(Self::Vector),
            other => Err(Error::InvalidConfig(format!("unknown search mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub mode: SearchMode,
}

fn default_top_k() -> usize {
    10
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filters: SearchFilters::default(),
            top_k: default_top_k(),
            mode: SearchMode::Hybrid,
        }
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub doc_id: String,
    pub chunk_id: String,
    pub title: String,
    pub source_type: SourceType,
    pub score: f32,
    pub snippet: String,
    pub provenance: Provenance,
    pub meta: ChunkMeta,
    pub jump_link: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub took_ms: u64,
    /// Distinct candidates that resolved to a stored chunk, before filtering.
    pub total_candidates: usize,
    pub index_available: bool,
    pub warnings: Vec<String>,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub weights: FusionWeights,
    pub candidate_multiplier: usize,
    pub candidate_floor: usize,
    pub snippet_chars: usize,
    pub run_viewer_base: String,
    pub kb_viewer_base: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&SearchSettings::default())
    }
}

impl From<&SearchSettings> for EngineConfig {
    fn from(s: &SearchSettings) -> Self {
        Self {
            weights: FusionWeights::from(s),
            candidate_multiplier: s.candidate_multiplier,
            candidate_floor: s.candidate_floor,
            snippet_chars: s.snippet_chars,
            run_viewer_base: s.run_viewer_base.clone(),
            kb_viewer_base: s.kb_viewer_base.clone(),
        }
    }
}

/// Everything read from one generation. Immutable once loaded.
struct Snapshot {
    generation: String,
    chunks: HashMap<String, Chunk>,
    keyword: Option<KeywordIndex>,
    vectors: VectorIndex,
    warnings: Vec<String>,
}

impl Snapshot {
    fn load(layout: &IndexLayout) -> Result<Option<Self>> {
        let Some(generation) = layout.current()? else { return Ok(None) };
        let mut warnings = Vec::new();
        let log = read_chunks(&generation.chunk_log())?;
        if log.skipped > 0 {
            warnings.push(format!("{} unreadable chunk log lines skipped", log.skipped));
        }
        let chunks: HashMap<String, Chunk> =
            log.chunks.into_iter().map(|c| (c.chunk_id.clone(), c)).collect();
        let keyword = match KeywordIndex::open(&generation.keyword_dir()) {
            Ok(k) => Some(k),
            Err(e) => {
                warn!("keyword index unavailable in {}: {e}", generation.name());
                warnings.push(format!("keyword index unavailable: {e}"));
                None
            }
        };
        let vectors = match VectorIndex::load(&generation.vectors()) {
            Ok(v) => v,
            Err(e) => {
                warn!("vector index unavailable in {}: {e}", generation.name());
                warnings.push(format!("vector index unavailable: {e}"));
                VectorIndex::new()
            }
        };
        info!(
            "search snapshot {}: {} chunks, {} vectors",
            generation.name(),
            chunks.len(),
            vectors.len()
        );
        Ok(Some(Self {
            generation: generation.name().to_string(),
            chunks,
            keyword,
            vectors,
            warnings,
        }))
    }
}

/// Candidate scores from one side of the fusion, or why there are none.
enum Side {
    Hits(Vec<ScoredId>),
    Skipped,
    Failed,
}

impl Side {
    fn into_hits(self) -> Vec<ScoredId> {
        match self {
            Self::Hits(hits) => hits,
            Self::Skipped | Self::Failed => Vec::new(),
        }
    }
}

pub struct HybridSearchEngine {
    layout: IndexLayout,
    embedder: Arc<dyn EmbeddingProvider>,
    config: EngineConfig,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
}

impl HybridSearchEngine {
    pub fn new(
        layout: IndexLayout,
        embedder: Arc<dyn EmbeddingProvider>,
        config: EngineConfig,
    ) -> Self {
        Self { layout, embedder, config, snapshot: RwLock::new(None) }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drop the cached snapshot so the next search reloads from disk.
    pub fn refresh(&self) {
        *self.snapshot.write() = None;
    }

    fn current_snapshot(&self) -> Result<Option<Arc<Snapshot>>> {
        let published = self.layout.current()?;
        let Some(published) = published else {
            *self.snapshot.write() = None;
            return Ok(None);
        };
        let is_published = |s: &&Arc<Snapshot>| s.generation == published.name();
        let cached = self.snapshot.read().as_ref().filter(is_published).cloned();
        if cached.is_some() {
            return Ok(cached);
        }
        let mut slot = self.snapshot.write();
        if let Some(snap) = slot.as_ref().filter(is_published) {
            return Ok(Some(Arc::clone(snap)));
        }
        let loaded = Snapshot::load(&self.layout)?.map(Arc::new);
        *slot = loaded.clone();
        Ok(loaded)
    }

    /// Never fails: problems reduce the result set and are reported in
    /// `warnings`.
    pub fn search(&self, request: &SearchRequest) -> SearchResponse {
        let started = Instant::now();
        let mut response = SearchResponse::default();
        match self.current_snapshot() {
            Ok(Some(snapshot)) => {
                response.index_available = true;
                response.warnings.extend(snapshot.warnings.iter().cloned());
                self.search_snapshot(&snapshot, request, &mut response);
            }
            Ok(None) => debug!("search without a published index"),
            Err(e) => {
                warn!("could not open index: {e}");
                response.warnings.push(format!("index unavailable: {e}"));
            }
        }
        response.took_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        response
    }

    fn search_snapshot(
        &self,
        snap: &Snapshot,
        request: &SearchRequest,
        response: &mut SearchResponse,
    ) {
        let query = request.query.trim();
        if query.is_empty() || request.top_k == 0 || snap.chunks.is_empty() {
            return;
        }
        let limit = request
            .top_k
            .saturating_mul(self.config.candidate_multiplier)
            .max(self.config.candidate_floor);

        let keyword = if request.mode == SearchMode::Vector {
            Side::Skipped
        } else {
            self.keyword_side(snap, query, limit, &mut response.warnings)
        };
        let vector = if request.mode == SearchMode::Keyword {
            Side::Skipped
        } else {
            self.vector_side(snap, query, limit, &mut response.warnings)
        };

        // A side that failed drops out of the fusion; hybrid then ranks by
        // the surviving side alone.
        let mode = match (request.mode, &keyword, &vector) {
            (_, Side::Failed, Side::Failed | Side::Skipped) | (_, Side::Skipped, Side::Failed) => {
                return;
            }
            (SearchMode::Hybrid, _, Side::Failed) => SearchMode::Keyword,
            (SearchMode::Hybrid, Side::Failed, _) => SearchMode::Vector,
            (m, _, _) => m,
        };
        let keyword_hits = keyword.into_hits();
        let vector_hits = vector.into_hits();
        let keyword_norm = min_max_normalize(&keyword_hits);
        let vector_norm = min_max_normalize(&vector_hits);

        let mut seen = HashSet::new();
        let mut scored: Vec<(f32, &Chunk)> = Vec::new();
        for id in vector_hits.iter().chain(keyword_hits.iter()).map(|h| &h.chunk_id) {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let Some(chunk) = snap.chunks.get(id) else {
                debug!("candidate {id} missing from chunk log");
                continue;
            };
            if !chunk.is_attributable() {
                continue;
            }
            response.total_candidates += 1;
            if !request.filters.matches(chunk) {
                continue;
            }
            let kw = keyword_norm.get(id).copied().unwrap_or(0.0);
            let vec = vector_norm.get(id).copied().unwrap_or(0.0);
            let score = match mode {
                SearchMode::Keyword => kw,
                SearchMode::Vector => vec,
                SearchMode::Hybrid => self.config.weights.fuse(vec, kw),
            };
            scored.push((score, chunk));
        }
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.chunk_id.cmp(&b.1.chunk_id))
        });
        scored.truncate(request.top_k);
        response.results =
            scored.into_iter().map(|(score, chunk)| self.to_result(chunk, score)).collect();
        debug!(
            "'{query}' ({}): {} candidates, {} results",
            request.mode,
            response.total_candidates,
            response.results.len()
        );
    }

    fn keyword_side(
        &self,
        snap: &Snapshot,
        query: &str,
        limit: usize,
        warnings: &mut Vec<String>,
    ) -> Side {
        let Some(index) = snap.keyword.as_ref() else { return Side::Failed };
        match index.search(query, limit) {
            Ok(hits) => Side::Hits(hits),
            Err(e) => {
                warn!("keyword search failed: {e}");
                warnings.push(format!("keyword search failed: {e}"));
                Side::Failed
            }
        }
    }

    fn vector_side(
        &self,
        snap: &Snapshot,
        query: &str,
        limit: usize,
        warnings: &mut Vec<String>,
    ) -> Side {
        if snap.vectors.is_empty() {
            return Side::Hits(Vec::new());
        }
        if snap.vectors.model() != self.embedder.model_name() {
            let msg = format!(
                "vectors were built with '{}', query provider is '{}'; vector scores skipped",
                snap.vectors.model(),
                self.embedder.model_name()
            );
            warn!("{msg}");
            warnings.push(msg);
            return Side::Failed;
        }
        let query_vec = match self.embedder.embed(&[query.to_string()]) {
            Ok(mut e) if e.vectors.len() == 1 => e.vectors.remove(0),
            Ok(e) => {
                let n = e.vectors.len();
                warnings.push(format!("query embedding returned {n} vectors; keyword scores only"));
                return Side::Failed;
            }
            Err(e) => {
                warn!("query embedding failed: {e}");
                warnings.push(format!("query embedding failed ({e}); using keyword scores only"));
                return Side::Failed;
            }
        };
        match snap.vectors.search(&query_vec, limit) {
            Ok(hits) => Side::Hits(hits),
            Err(e) => {
                warn!("vector search failed: {e}");
                warnings.push(format!("vector search failed: {e}"));
                Side::Failed
            }
        }
    }

    fn to_result(&self, chunk: &Chunk, score: f32) -> SearchResult {
        SearchResult {
            doc_id: chunk.doc_id.clone(),
            chunk_id: chunk.chunk_id.clone(),
            title: chunk.title.clone(),
            source_type: chunk.source_type.clone(),
            score,
            snippet: snippet(&chunk.text, self.config.snippet_chars),
            provenance: chunk.provenance.clone(),
            meta: chunk.meta.clone(),
            jump_link: jump_link(chunk, &self.config.run_viewer_base, &self.config.kb_viewer_base),
        }
    }
}
