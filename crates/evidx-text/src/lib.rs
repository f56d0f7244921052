//! evidx-text
//!
//! Tantivy-based BM25 keyword index over chunk rows. See `index` for the
//! write path and `search` for ranking.

pub mod index;
pub mod search;
pub mod tantivy_utils;

pub use index::{KeywordIndex, KeywordRow};
