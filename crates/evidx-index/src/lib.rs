//! evidx-index
//!
//! Turns documents from a [`DocumentSource`] into a published index
//! generation, either from scratch or incrementally.

pub mod indexer;
pub mod jobs;
pub mod source;

pub use indexer::{IndexStatus, Indexer};
pub use jobs::{IndexJobs, JobKind, JobState, JobStatus};
pub use source::{DocumentSource, FsDocumentSource};
