use crate::error::Result;

/// Output of one embedding call: one vector per input, same order, plus the
/// name of the model that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct Embeddings {
    pub vectors: Vec<Vec<f32>>,
    pub model: String,
}

pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn dim(&self) -> usize;
    /// Embed `texts`. Must return exactly `texts.len()` L2-normalized vectors.
    fn embed(&self, texts: &[String]) -> Result<Embeddings>;
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
