//! Text-to-vector embedding pipeline.
//!
//! Provides the [`EmbeddingProvider`] trait, a local implementation using
//! bge-small-zh-v1.5 (512 dimensions, L2-normalized), and [`LazyProvider`],
//! which builds a provider exactly once on first use.

pub mod lazy;
pub mod local;

pub use lazy::LazyProvider;

use anyhow::Result;
use std::sync::Arc;

/// Number of dimensions produced by bge-small-zh-v1.5.
pub const DEFAULT_EMBEDDING_DIM: usize = 512;

/// Trait for embedding text into vectors.
///
/// Implementations produce L2-normalized vectors of exactly [`dimensions`](Self::dimensions)
/// entries. All methods are synchronous and CPU-heavy; they run on the worker thread.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize;
}

/// Builds a provider, reporting load progress as `(percent, stage)`.
pub type ProviderFactory =
    Arc<dyn Fn(&dyn Fn(f32, &str)) -> Result<Arc<dyn EmbeddingProvider>> + Send + Sync>;

/// Create an embedding provider from config.
///
/// Currently only `"local"` is supported (ONNX Runtime + bge-small-zh-v1.5).
/// Returns an error if model files are not found; run `traitsense model download` first.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
    on_progress: &dyn Fn(f32, &str),
) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => {
            let provider = local::LocalEmbeddingProvider::load(config, on_progress)?;
            Ok(Arc::new(provider))
        }
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: local"),
    }
}

/// A [`ProviderFactory`] that defers [`create_provider`] until the worker asks for it.
pub fn provider_factory(config: crate::config::EmbeddingConfig) -> ProviderFactory {
    Arc::new(move |on_progress: &dyn Fn(f32, &str)| {
        create_provider(&config, on_progress)
    })
}

/// L2-normalize a vector. Returns a zero vector if the input norm is zero.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}
