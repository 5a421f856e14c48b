//! Error taxonomy for the matching core.
//!
//! [`Error`] is `Clone` so a single initialization failure can be handed to
//! every caller attached to the same in-flight [`ensure_ready`](crate::engine::TraitMatcher::ensure_ready).

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Precomputed artifacts unreachable after the retry budget was spent.
    #[error("failed to fetch {location} after {attempts} attempt(s): {message}; reload to try again")]
    NetworkFetch {
        location: String,
        attempts: u32,
        message: String,
    },

    /// The embedding model or tokenizer could not be loaded.
    #[error("embedding model failed to load: {0}")]
    ModelLoad(String),

    /// The requested corpus is not the one the cached embeddings were built from.
    /// Only ever used internally to fall back to on-demand embedding.
    #[error("corpus does not match cached embeddings")]
    CorpusMismatch,

    /// A worker request failed, was malformed, or never received a reply.
    #[error("worker protocol error: {0}")]
    WorkerProtocol(String),

    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("embedding failed: {0}")]
    Embedding(String),
}

pub type Result<T> = std::result::Result<T, Error>;
