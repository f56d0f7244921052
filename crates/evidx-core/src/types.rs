//! Domain types shared by the indexer and the search engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub type ChunkId = String;

/// Kind of artifact a chunk was cut from.
///
/// Unknown tags coming from collaborators are preserved verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceType {
    KbTopic,
    KbPaper,
    KbNote,
    RunReport,
    QaReport,
    Claim,
    Paper,
    Other(String),
}

impl SourceType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::KbTopic => "kb_topic",
            Self::KbPaper => "kb_paper",
            Self::KbNote => "kb_note",
            Self::RunReport => "run_report",
            Self::QaReport => "qa_report",
            Self::Claim => "claim",
            Self::Paper => "paper",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for SourceType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "kb_topic" => Self::KbTopic,
            "kb_paper" => Self::KbPaper,
            "kb_note" => Self::KbNote,
            "run_report" => Self::RunReport,
            "qa_report" => Self::QaReport,
            "claim" => Self::Claim,
            "paper" => Self::Paper,
            _ => Self::Other(tag),
        }
    }
}

impl From<&str> for SourceType {
    fn from(tag: &str) -> Self {
        Self::from(tag.to_string())
    }
}

impl From<SourceType> for String {
    fn from(kind: SourceType) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a chunk came from. At least one of `run_id` / `file_path` must be
/// set for the chunk to be persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl Provenance {
    pub fn is_attributable(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.run_id) || present(&self.file_path)
    }
}

/// Filterable attributes attached to a chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oa: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub topics: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

/// A document handed to the indexer by an external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub doc_id: String,
    pub title: String,
    pub text: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub provenance: Provenance,
    #[serde(default)]
    pub meta: ChunkMeta,
    pub updated_at: String,
}

/// The atomic unit of retrieval, one line of the chunk log.
///
/// - `chunk_id`: SHA-256 of `doc_id|segment_index|text`, see [`crate::chunker::chunk_id`]
/// - `updated_at`: timestamp of the source document, not of indexing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: String,
    pub chunk_id: ChunkId,
    pub source_type: SourceType,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub provenance: Provenance,
    #[serde(default)]
    pub meta: ChunkMeta,
    pub updated_at: String,
}

impl Chunk {
    pub fn is_attributable(&self) -> bool {
        self.provenance.is_attributable()
    }
}

/// A `(chunk_id, score)` pair returned by either index. Higher is better for
/// both engines, but the scales differ and must be normalized before fusing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredId {
    pub chunk_id: ChunkId,
    pub score: f32,
}
