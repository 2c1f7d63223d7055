use crate::config::ConvsearchDirs;
use crate::traits::TextEmbedder;
use anyhow::Result;
use fastembed::{InitOptions, TextEmbedding};
use log::{debug, info};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

/// Dimensionality of the default embedding model (all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;

/// Message content is truncated to this many characters before embedding, to
/// bound model cost. Display snippets are truncated separately.
pub const MAX_EMBED_CHARS: usize = 2000;

static SHARED: OnceLock<Arc<LocalEmbedder>> = OnceLock::new();

/// Local text embedding service using FastEmbed models.
///
/// Produces L2-normalized vectors so cosine similarity reduces to a dot
/// product downstream.
pub struct LocalEmbedder {
    model: TextEmbedding,
}

impl LocalEmbedder {
    /// Creates a new embedder with the specified model or default AllMiniLML6V2.
    /// If cache_dir is provided, uses that; otherwise uses ConvsearchDirs default.
    pub fn new(
        model_name: Option<fastembed::EmbeddingModel>,
        cache_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let model_name = model_name.unwrap_or(fastembed::EmbeddingModel::AllMiniLML6V2);

        let cache_dir = match cache_dir {
            Some(dir) => dir,
            None => {
                let dirs = ConvsearchDirs::new();
                dirs.ensure_cache_dir()?
            }
        };

        let init_options = InitOptions::new(model_name.clone()).with_cache_dir(cache_dir);
        let model = TextEmbedding::try_new(init_options)?;

        info!("Initialized embedding model: {:?}", model_name);

        Ok(LocalEmbedder { model })
    }

    /// Creates a new embedder with the default model and default cache directory.
    pub fn new_with_default_model() -> Result<Self> {
        Self::new(None, None)
    }

    /// Creates a new embedder with the default model and custom cache directory.
    pub fn new_with_cache_dir(cache_dir: PathBuf) -> Result<Self> {
        Self::new(None, Some(cache_dir))
    }

    /// Normalizes an embedding vector using L2 normalization.
    pub fn normalize_l2(embedding: &[f32]) -> Vec<f32> {
        let norm = (embedding.iter().map(|x| x * x).sum::<f32>()).sqrt();
        debug!("Normalized embedding with L2 norm: {}", norm);
        if norm < 1e-5 {
            debug!(
                "Embedding norm {} is less than 1e-5, returning original embedding",
                norm
            );
            embedding.to_vec()
        } else {
            embedding.iter().map(|x| x / norm).collect()
        }
    }
}

impl TextEmbedder for LocalEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.model.embed(vec![truncate_chars(text, MAX_EMBED_CHARS)], None)?;
        embeddings
            .into_iter()
            .next()
            .map(|x| Self::normalize_l2(&x))
            .ok_or_else(|| anyhow::anyhow!("Failed to get embedding"))
    }

    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let truncated: Vec<&str> = texts
            .iter()
            .map(|t| truncate_chars(t, MAX_EMBED_CHARS))
            .collect();
        let embeddings = self.model.embed(truncated, None)?;
        Ok(embeddings.iter().map(|e| Self::normalize_l2(e)).collect())
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Returns the process-wide shared embedder, loading the model on first use.
/// The model stays resident for the process lifetime and is reused across all
/// projects.
pub fn shared() -> Result<Arc<LocalEmbedder>> {
    if let Some(embedder) = SHARED.get() {
        return Ok(embedder.clone());
    }
    let built = Arc::new(LocalEmbedder::new_with_default_model()?);
    Ok(SHARED.get_or_init(|| built).clone())
}

/// Truncates to at most `max` characters, respecting char boundaries.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
