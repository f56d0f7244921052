//! evidx-vector
//!
//! Flat dense-vector store: exact dot-product search over an in-memory
//! matrix, persisted as a single checksummed file per index generation.

mod codec;
pub mod store;

pub use store::VectorIndex;
