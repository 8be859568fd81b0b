//! Local embedding generation for the optional semantic search backend
//! (spec §4.4), gated behind the `semantic` feature. Wraps `fastembed`'s
//! ONNX-based text embedding model behind an LRU query cache, plus a
//! lazily-initialized handle so the tool server doesn't block its startup
//! on a model download/load.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use fastembed::{EmbeddingModel, TextEmbedding, TextInitOptions};
use lru::LruCache;
use tracing::{debug, info, warn};

const DEFAULT_CACHE_SIZE: usize = 10_000;

pub struct EmbeddingService {
    model: Mutex<TextEmbedding>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbeddingService {
    /// Load an embedding model. Downloads it on first use.
    pub fn new(model_name: &str) -> Result<Self> {
        Self::with_cache_size(model_name, DEFAULT_CACHE_SIZE)
    }

    pub fn with_cache_size(model_name: &str, cache_size: usize) -> Result<Self> {
        let model_type = match model_name {
            "BAAI/bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "BAAI/bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            _ => anyhow::bail!(
                "unsupported embedding model '{model_name}'; use BAAI/bge-small-en-v1.5 or BAAI/bge-base-en-v1.5"
            ),
        };
        let model = TextEmbedding::try_new(TextInitOptions::new(model_type).with_show_download_progress(true))?;
        info!(model = model_name, "embedding model loaded");
        let cap = NonZeroUsize::new(cache_size.max(1)).unwrap();
        Ok(Self { model: Mutex::new(model), cache: Mutex::new(LruCache::new(cap)) })
    }

    /// Embed multiple texts (batch). Used for indexing on send, where each
    /// text is unique, so results aren't cached.
    pub fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let docs: Vec<String> = texts.iter().map(|t| (*t).to_string()).collect();
        let mut model = self.model.lock().map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(model.embed(docs, None)?)
    }

    /// Embed a single query string, cached by exact text since repeated
    /// searches for the same query are common.
    pub fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        {
            let mut cache = self.cache.lock().map_err(|e| anyhow::anyhow!("{e}"))?;
            if let Some(hit) = cache.get(query) {
                debug!(len = query.len(), "embedding cache hit for query");
                return Ok(hit.clone());
            }
        }
        let embedding = {
            let mut model = self.model.lock().map_err(|e| anyhow::anyhow!("{e}"))?;
            model
                .embed(vec![query.to_string()], None)?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("empty embedding result"))?
        };
        let mut cache = self.cache.lock().map_err(|e| anyhow::anyhow!("{e}"))?;
        cache.put(query.to_string(), embedding.clone());
        Ok(embedding)
    }

    #[cfg(test)]
    pub fn cache_len(&self) -> usize {
        self.cache.lock().map_or(0, |c| c.len())
    }
}

/// Background-initialized handle. The tool server spawns this at startup
/// and keeps serving lexical search (and un-embedded sends) while the model
/// loads, rather than blocking the request loop on it.
pub struct LazyEmbeddingService {
    cell: Arc<tokio::sync::OnceCell<EmbeddingService>>,
}

impl LazyEmbeddingService {
    pub fn new(model_name: String, cache_size: usize) -> Self {
        let cell = Arc::new(tokio::sync::OnceCell::new());
        let cell_clone = cell.clone();
        tokio::spawn(async move {
            match tokio::task::spawn_blocking(move || EmbeddingService::with_cache_size(&model_name, cache_size)).await {
                Ok(Ok(svc)) => {
                    let _ = cell_clone.set(svc);
                    info!("embedding model initialized");
                }
                Ok(Err(e)) => warn!(error = %e, "embedding model init failed, semantic search stays degraded to lexical"),
                Err(e) => warn!(error = %e, "embedding model init task panicked"),
            }
        });
        Self { cell }
    }

    pub fn get(&self) -> Option<&EmbeddingService> {
        self.cell.get()
    }

    pub fn is_ready(&self) -> bool {
        self.cell.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_model_name_is_rejected_before_any_download() {
        let err = EmbeddingService::new("not-a-real-model").unwrap_err();
        assert!(err.to_string().contains("unsupported embedding model"));
    }

    #[test]
    fn default_cache_size_is_10k() {
        assert_eq!(DEFAULT_CACHE_SIZE, 10_000);
    }
}
