use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No index has been built under {0}")]
    IndexUnavailable(PathBuf),

    #[error("Malformed chunk log line {line} in {path}: {source}")]
    ChunkDecode {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Chunk {0} has neither run_id nor file_path provenance")]
    ProvenanceViolation(String),

    #[error("Embedding backend failed: {0}")]
    EmbeddingBackend(String),

    #[error("Vector dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding model mismatch: index built with '{expected}', got '{actual}'")]
    ModelMismatch { expected: String, actual: String },

    #[error("Storage I/O failed ({context}): {source}")]
    StorageIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Keyword index error: {0}")]
    KeywordIndex(String),

    #[error("Serialization failed ({context}): {source}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Index job already in flight: {0}")]
    JobInFlight(String),

    #[error("Operation failed: {0}")]
    Operation(String),
}

impl Error {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::StorageIo { context: context.into(), source }
    }

    pub fn corrupt(context: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::StorageIo {
            context: context.into(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, detail.into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
