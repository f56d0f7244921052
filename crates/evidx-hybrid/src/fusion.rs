use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use evidx_core::config::SearchSettings;
use evidx_core::types::ScoredId;

/// Weights applied to the normalized vector and keyword scores in hybrid mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub vector: f32,
    pub keyword: f32,
}

pub const DEFAULT_FUSION_WEIGHTS: FusionWeights = FusionWeights { vector: 0.6, keyword: 0.4 };

impl Default for FusionWeights {
    fn default() -> Self {
        DEFAULT_FUSION_WEIGHTS
    }
}

impl From<&SearchSettings> for FusionWeights {
    fn from(s: &SearchSettings) -> Self {
        Self { vector: s.vector_weight, keyword: s.keyword_weight }
    }
}

impl FusionWeights {
    pub fn fuse(&self, vector: f32, keyword: f32) -> f32 {
        self.vector * vector + self.keyword * keyword
    }
}

/// Min-max scale scores into `[0, 1]`. If every score is equal they all map
/// to `1.0`. The first occurrence of a repeated id wins.
pub fn min_max_normalize(hits: &[ScoredId]) -> HashMap<String, f32> {
    let (min, max) = hits
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), h| (lo.min(h.score), hi.max(h.score)));
    let range = max - min;
    let mut out = HashMap::with_capacity(hits.len());
    for h in hits {
        let norm = if range <= f32::EPSILON { 1.0 } else { (h.score - min) / range };
        out.entry(h.chunk_id.clone()).or_insert(norm);
    }
    out
}
