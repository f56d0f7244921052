use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use evidx_core::types::{Chunk, SourceType};

/// Metadata constraints, all of which must hold. An empty set places no
/// constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    /// Inclusive. Chunks without a year fail any year bound.
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub tier_in: BTreeSet<String>,
    pub oa_in: BTreeSet<bool>,
    pub source_type_in: BTreeSet<SourceType>,
    /// Matches when the chunk shares at least one topic.
    pub topics_any: BTreeSet<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        let meta = &chunk.meta;
        if self.year_from.is_some() || self.year_to.is_some() {
            let Some(year) = meta.year else { return false };
            let too_early = self.year_from.is_some_and(|from| year < from);
            let too_late = self.year_to.is_some_and(|to| year > to);
            if too_early || too_late {
                return false;
            }
        }
        if !self.tier_in.is_empty()
            && !meta.tier.as_ref().is_some_and(|t| self.tier_in.contains(t))
        {
            return false;
        }
        if !self.oa_in.is_empty() && !meta.oa.is_some_and(|oa| self.oa_in.contains(&oa)) {
            return false;
        }
        if !self.source_type_in.is_empty() && !self.source_type_in.contains(&chunk.source_type) {
            return false;
        }
        if !self.topics_any.is_empty() && self.topics_any.is_disjoint(&meta.topics) {
            return false;
        }
        true
    }
}
