//! maintdb-embed
//!
//! Sentence embeddings for maintenance discrepancy text. `MiniLmEmbedder`
//! runs all-MiniLM-L6-v2 locally through candle; `FakeEmbedder` hashes
//! tokens into buckets and is used by tests and offline development.
use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;

use maintdb_core::config::{resolve_with_base, EmbeddingSettings};
use maintdb_core::error::ensure_dim;
pub use maintdb_core::traits::Embedder;

mod device;
mod pool;
mod tokenize;

pub use device::select_device;
pub use pool::masked_mean_l2;
pub use tokenize::{tokenize_batch, PAD_ID};

pub const MODEL_NAME: &str = "all-MiniLM-L6-v2";
const BATCH_SIZE: usize = 32;

pub struct MiniLmEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    max_len: usize,
    id: String,
}

impl MiniLmEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self> {
        let device = select_device();
        let model_dir = resolve_model_dir(settings)?;
        tracing::info!(model = MODEL_NAME, dir = %model_dir.display(), "loading embedding model");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;

        let config_path = model_dir.join("config.json");
        let config: BertConfig = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;
        ensure_dim(settings.dim, config.hidden_size)?;

        let vb = load_weights(&model_dir, &device)?;
        let model = BertModel::load(vb, &config)?;
        tracing::info!(model = MODEL_NAME, dim = config.hidden_size, "embedding model loaded");

        Ok(Self {
            model,
            tokenizer,
            device,
            dim: settings.dim,
            max_len: settings.max_len,
            id: format!("local:{}:d{}", MODEL_NAME, settings.dim),
        })
    }

    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, self.max_len, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self.model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let rows: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2()?;
        for row in &rows {
            ensure_dim(self.dim, row.len())?;
        }
        Ok(rows)
    }
}

fn load_weights(model_dir: &std::path::Path, device: &Device) -> Result<VarBuilder<'static>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        // SAFETY: the weights file is not modified while the model is alive.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[safetensors], DType::F32, device)? };
        return Ok(vb);
    }
    let pth = model_dir.join("pytorch_model.bin");
    if pth.exists() {
        let weights = candle_core::pickle::read_all(&pth)?;
        let weights_map: std::collections::HashMap<String, Tensor> = weights.into_iter().collect();
        return Ok(VarBuilder::from_tensors(weights_map, DType::F32, device));
    }
    Err(anyhow!("No model.safetensors or pytorch_model.bin in {}", model_dir.display()))
}

impl Embedder for MiniLmEmbedder {
    fn embedder_id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { self.max_len }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            out.extend(self.embed_chunk(chunk)?);
        }
        tracing::debug!(n = texts.len(), elapsed_ms = start.elapsed().as_millis() as u64, "embedded batch");
        Ok(out)
    }
}

/// Deterministic bag-of-tokens embedder. Texts sharing words land close together.
pub struct FakeEmbedder {
    dim: usize,
    max_len: usize,
    id: String,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim, max_len: 256, id: format!("fake:xxhash:d{dim}") }
    }
}

impl Embedder for FakeEmbedder {
    fn embedder_id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { self.max_len }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

impl FakeEmbedder {
    fn embed_one(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        use twox_hash::XxHash64;
        let mut v = vec![0f32; self.dim];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .take(self.max_len);
        for token in tokens {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = 0.5 + (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v { *x /= norm; }
        v
    }
}

pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Box<dyn Embedder>> {
    if settings.use_fake {
        tracing::info!(dim = settings.dim, "using FakeEmbedder");
        return Ok(Box::new(FakeEmbedder::new(settings.dim)));
    }
    Ok(Box::new(MiniLmEmbedder::new(settings)?))
}

/// Configured `embedding.model_dir` first, then the conventional
/// `models/all-MiniLM-L6-v2` next to or one level above the working dir.
pub fn resolve_model_dir(settings: &EmbeddingSettings) -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    if let Some(dir) = settings.model_dir.as_deref() {
        let p = resolve_with_base(&cwd, dir);
        if p.exists() { return Ok(p); }
        return Err(anyhow!("Configured embedding.model_dir does not exist: {}", p.display()));
    }
    for candidate in [format!("models/{MODEL_NAME}"), format!("../models/{MODEL_NAME}")] {
        let p = cwd.join(&candidate);
        if p.exists() { return Ok(p); }
    }
    Err(anyhow!("Could not locate {} model directory; set embedding.model_dir", MODEL_NAME))
}
