//! Build-once guard around a [`ProviderFactory`].

use std::sync::{Arc, Mutex, PoisonError};

use super::{EmbeddingProvider, ProviderFactory};
use crate::error::{Error, Result};

/// Holds the embedding provider for the lifetime of its owner and builds it on
/// first use.
///
/// The slot lock is held for the whole load, so concurrent first callers wait
/// for the one load in progress instead of starting their own. A failed load
/// leaves the slot empty and the next call tries again.
pub struct LazyProvider {
    factory: ProviderFactory,
    slot: Mutex<Option<Arc<dyn EmbeddingProvider>>>,
}

impl LazyProvider {
    pub fn new(factory: ProviderFactory) -> Self {
        Self {
            factory,
            slot: Mutex::new(None),
        }
    }

    /// Return the provider, loading it first if needed.
    pub fn get_or_load(
        &self,
        on_progress: &dyn Fn(f32, &str),
    ) -> Result<Arc<dyn EmbeddingProvider>> {
        // A panic inside the factory leaves the slot untouched, so a poisoned
        // lock still guards a consistent value.
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(provider) = slot.as_ref() {
            on_progress(100.0, "model ready");
            return Ok(Arc::clone(provider));
        }

        tracing::info!("loading embedding model");
        let provider = (self.factory)(on_progress).map_err(|e| {
            tracing::error!(error = %format!("{e:#}"), "embedding model failed to load");
            Error::ModelLoad(format!("{e:#}"))
        })?;
        *slot = Some(Arc::clone(&provider));
        Ok(provider)
    }

    pub fn is_loaded(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
