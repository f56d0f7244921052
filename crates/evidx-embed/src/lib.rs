//! Embedding providers.
//!
//! The hash-based providers need no model files and are the default; the
//! BGE-M3 backend is compiled in with the `candle` feature.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use evidx_core::config::EmbeddingSettings;
use evidx_core::error::{Error, Result};
use evidx_core::traits::EmbeddingProvider;

pub mod hash;

#[cfg(feature = "candle")]
pub mod bge;
#[cfg(feature = "candle")]
pub mod pool;
#[cfg(feature = "candle")]
mod tokenize;

pub use hash::{DigestEmbedder, TokenHashEmbedder};
#[cfg(feature = "candle")]
pub use pool::masked_mean_l2;

/// Build the provider named in settings. `EVIDX_USE_FAKE_EMBEDDINGS=1`
/// forces the token-hash provider regardless of configuration.
pub fn provider_from_settings(settings: &EmbeddingSettings) -> Result<Arc<dyn EmbeddingProvider>> {
    let use_fake = std::env::var("EVIDX_USE_FAKE_EMBEDDINGS")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    let name = if use_fake { "token-hash" } else { settings.provider.as_str() };
    let provider: Arc<dyn EmbeddingProvider> = match name {
        "token-hash" => Arc::new(TokenHashEmbedder::new(settings.dim)),
        "digest" => Arc::new(DigestEmbedder::new(settings.dim)),
        "bge-m3" => load_bge(settings.model_dir.as_deref().map(Path::new))?,
        other => return Err(Error::InvalidConfig(format!("unknown embedding provider '{other}'"))),
    };
    info!("embedding provider: {} (dim {})", provider.model_name(), provider.dim());
    Ok(provider)
}

#[cfg(feature = "candle")]
fn load_bge(model_dir: Option<&Path>) -> Result<Arc<dyn EmbeddingProvider>> {
    Ok(Arc::new(bge::BgeM3Embedder::new(model_dir)?))
}

#[cfg(not(feature = "candle"))]
fn load_bge(_model_dir: Option<&Path>) -> Result<Arc<dyn EmbeddingProvider>> {
    Err(Error::EmbeddingBackend("bge-m3 requires building with the `candle` feature".into()))
}
