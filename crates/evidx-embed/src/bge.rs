//! BGE-M3 (XLM-RoBERTa) embedder running on candle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{info, warn};

use evidx_core::error::{Error, Result};
use evidx_core::traits::{EmbeddingProvider, Embeddings};

use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_on_device;

pub const BGE_M3_DIM: usize = 1024;
const MAX_LEN: usize = 256;

pub(crate) fn backend_err(e: candle_core::Error) -> Error {
    Error::EmbeddingBackend(e.to_string())
}

fn select_device() -> Device {
    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(dev) => {
                info!("embedding device: Metal");
                return dev;
            }
            Err(e) => warn!("Metal unavailable ({e}), using CPU"),
        }
    }
    info!("embedding device: CPU");
    Device::Cpu
}

pub struct BgeM3Embedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    model_name: String,
}

impl BgeM3Embedder {
    pub fn new(model_dir: Option<&Path>) -> Result<Self> {
        let device = select_device();
        let model_dir = resolve_model_dir(model_dir)?;
        info!("loading BGE-M3 from {}", model_dir.display());
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            let path = tokenizer_path.display();
            Error::EmbeddingBackend(format!("Failed to load tokenizer from {path}: {e}"))
        })?;
        let config_path = model_dir.join("config.json");
        let config_json = std::fs::read_to_string(&config_path)
            .map_err(|e| Error::EmbeddingBackend(format!("read {}: {e}", config_path.display())))?;
        let config: XLMRobertaConfig = serde_json::from_str(&config_json)
            .map_err(|e| Error::EmbeddingBackend(format!("parse {}: {e}", config_path.display())))?;
        let weights_path = model_dir.join("pytorch_model.bin");
        let weights = candle_core::pickle::read_all(&weights_path).map_err(backend_err)?;
        let weights_map: HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb).map_err(backend_err)?;
        info!("BGE-M3 loaded");
        Ok(Self { model, tokenizer, device, model_name: "bge-m3".to_string() })
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let (input_ids, attention_mask) =
            tokenize_on_device(&self.tokenizer, text, MAX_LEN, &self.device)?;
        let token_type_ids =
            Tensor::zeros((1, MAX_LEN), DType::I64, &self.device).map_err(backend_err)?;
        let hidden = self
            .model
            .forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)
            .map_err(backend_err)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask).map_err(backend_err)?;
        let emb: Vec<f32> = pooled
            .to_device(&Device::Cpu)
            .and_then(|t| t.squeeze(0))
            .and_then(|t| t.to_vec1())
            .map_err(backend_err)?;
        if emb.len() != BGE_M3_DIM {
            return Err(Error::DimensionMismatch { expected: BGE_M3_DIM, actual: emb.len() });
        }
        if start.elapsed().as_millis() > 100 {
            warn!("slow embedding: {} ms", start.elapsed().as_millis());
        }
        Ok(emb)
    }
}

impl EmbeddingProvider for BgeM3Embedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dim(&self) -> usize {
        BGE_M3_DIM
    }

    fn embed(&self, texts: &[String]) -> Result<Embeddings> {
        let vectors = texts.iter().map(|t| self.embed_one(t)).collect::<Result<Vec<_>>>()?;
        Ok(Embeddings { vectors, model: self.model_name.clone() })
    }
}

fn resolve_model_dir(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = configured {
        if p.exists() {
            return Ok(p.to_path_buf());
        }
        warn!("configured model dir {} does not exist", p.display());
    }
    let from_env = std::env::var("EVIDX_MODEL_DIR").ok().map(PathBuf::from);
    from_env
        .into_iter()
        .chain([PathBuf::from("../models/bge-m3"), PathBuf::from("models/bge-m3")])
        .find(|p| p.exists())
        .ok_or_else(|| Error::EmbeddingBackend("Could not locate BGE-M3 model directory".into()))
}
