//! evidx-hybrid
//!
//! Query side: fuses BM25 and vector candidates from the published index
//! generation, filters on chunk metadata and renders results.

pub mod engine;
pub mod export;
pub mod filters;
pub mod fusion;
pub mod present;

pub use engine::{
    EngineConfig, HybridSearchEngine, SearchMode, SearchRequest, SearchResponse, SearchResult,
};
pub use export::{export, ExportFormat, CSV_COLUMNS};
pub use filters::SearchFilters;
pub use fusion::{FusionWeights, DEFAULT_FUSION_WEIGHTS};
