//! The caller-facing coordinator.
//!
//! [`TraitMatcher`] owns the worker handle and drives the staged startup:
//!
//! 1. fetch trait metadata and the embedding binary (retry with backoff), 0–15%
//! 2. move the binary into the worker and load the model there, 15–85%
//! 3. mark ready, 85–100%
//!
//! [`TraitMatcher::ensure_ready`] is safe to call from any number of tasks at
//! once: they all attach to the same in-flight startup. A failure moves the
//! state to [`InitState::Failed`] and drops everything partial, so the next
//! call starts over from stage 1.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::artifacts::{
    load_artifacts, ArtifactFetcher, ArtifactSource, Artifacts, DefaultFetcher, RetryPolicy,
};
use crate::config::TraitSenseConfig;
use crate::corpus::{corpus_texts, split_traits, TraitCorpusEntry};
use crate::embedding::{provider_factory, ProviderFactory};
use crate::error::Result;
use crate::policy::{self, FamilyMatch, Verdict};
use crate::ranking::SimilarityResult;
use crate::worker::protocol::InitPayload;
use crate::worker::WorkerHandle;
use crate::ProgressFn;

pub const READY_MESSAGE: &str = "ready";

/// Startup progress of a [`TraitMatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    DataLoading,
    DataLoaded,
    ModelLoading,
    Ready,
    Failed,
}

type InitFuture = Shared<BoxFuture<'static, Result<()>>>;

#[derive(Default)]
struct InitSlot {
    in_flight: Option<InitFuture>,
    listeners: Vec<ProgressFn>,
}

struct Inner {
    source: ArtifactSource,
    retry: RetryPolicy,
    fetcher: Arc<dyn ArtifactFetcher>,
    worker: WorkerHandle,
    state: Mutex<InitState>,
    /// Stage 1 output waiting to be handed to the worker.
    data: tokio::sync::Mutex<Option<Artifacts>>,
    init: Mutex<InitSlot>,
    /// Trait list of the installed precomputed corpus, kept for callers.
    reference: Mutex<Option<Arc<Vec<TraitCorpusEntry>>>>,
}

/// Cheaply cloneable handle to one matching engine and its worker.
#[derive(Clone)]
pub struct TraitMatcher {
    inner: Arc<Inner>,
}

impl TraitMatcher {
    /// Build a matcher and start its worker. Must be called within a tokio runtime.
    pub fn new(
        source: ArtifactSource,
        retry: RetryPolicy,
        fetcher: Arc<dyn ArtifactFetcher>,
        factory: ProviderFactory,
    ) -> Result<Self> {
        let worker = WorkerHandle::spawn(factory)?;
        Ok(Self {
            inner: Arc::new(Inner {
                source,
                retry,
                fetcher,
                worker,
                state: Mutex::new(InitState::Uninitialized),
                data: tokio::sync::Mutex::new(None),
                init: Mutex::new(InitSlot::default()),
                reference: Mutex::new(None),
            }),
        })
    }

    /// Matcher reading artifacts from `config.data` and the local ONNX model.
    pub fn from_config(config: &TraitSenseConfig) -> Result<Self> {
        Self::new(
            config.data.artifact_source(),
            config.data.retry_policy(),
            Arc::new(DefaultFetcher::new()),
            provider_factory(config.embedding.clone()),
        )
    }

    pub fn state(&self) -> InitState {
        self.inner.state()
    }

    /// The precomputed trait corpus, once ready.
    pub fn reference_corpus(&self) -> Option<Arc<Vec<TraitCorpusEntry>>> {
        self.inner
            .reference
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run stage 1 alone so the network fetch can start before anyone needs
    /// the model. No-op if the data is already held or consumed.
    pub async fn preload_data(&self) -> Result<()> {
        if self.startup_covers_data() {
            return Ok(());
        }
        let mut data = self.inner.data.lock().await;
        if data.is_some() || self.startup_covers_data() {
            return Ok(());
        }
        tracing::info!("preloading trait data");
        *data = Some(self.inner.fetch_artifacts().await?);
        Ok(())
    }

    /// Bring the engine to [`InitState::Ready`], or join the startup already
    /// running. `on_progress` sees `(percent, stage)` updates and always ends
    /// with `(100, "ready")` on success.
    pub async fn ensure_ready(&self, on_progress: Option<ProgressFn>) -> Result<()> {
        let startup = {
            let mut slot = self.inner.init_slot();
            if self.state() == InitState::Ready {
                drop(slot);
                if let Some(cb) = on_progress {
                    cb(100.0, READY_MESSAGE);
                }
                return Ok(());
            }
            if let Some(cb) = on_progress {
                slot.listeners.push(cb);
            }
            match &slot.in_flight {
                Some(startup) => startup.clone(),
                None => {
                    let startup = run_startup(Arc::clone(&self.inner)).boxed().shared();
                    slot.in_flight = Some(startup.clone());
                    startup
                }
            }
        };
        startup.await
    }

    /// Rank `corpus` against `query`. Blank query or empty corpus gives an
    /// empty list without touching the model.
    pub async fn search(&self, query: &str, corpus: &[String]) -> Result<Vec<SimilarityResult>> {
        if query.trim().is_empty() || corpus.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_ready(None).await?;
        self.inner
            .worker
            .search(query.to_string(), corpus.to_vec())
            .await
    }

    /// Rank `corpus` against each query in one round trip. The corpus is
    /// embedded at most once. Output position `i` belongs to `queries[i]`.
    pub async fn search_batch(
        &self,
        queries: &[String],
        corpus: &[String],
    ) -> Result<Vec<Vec<SimilarityResult>>> {
        if corpus.is_empty() || queries.iter().all(|q| q.trim().is_empty()) {
            return Ok(vec![Vec::new(); queries.len()]);
        }
        self.ensure_ready(None).await?;
        self.inner
            .worker
            .search_batch(queries.to_vec(), corpus.to_vec())
            .await
    }

    /// Free-text identification: split `query` into feature segments, rank
    /// `corpus` for each, and score families by their best hits.
    pub async fn identify(
        &self,
        query: &str,
        corpus: &[TraitCorpusEntry],
        threshold: f32,
    ) -> Result<Vec<FamilyMatch>> {
        let segments = split_traits(query);
        if segments.is_empty() || corpus.is_empty() {
            return Ok(Vec::new());
        }
        let ranked = self.search_batch(&segments, &corpus_texts(corpus)).await?;
        Ok(policy::identify_families(&segments, &ranked, corpus, threshold))
    }

    /// Judge a quiz answer against its accepted answers.
    pub async fn judge(
        &self,
        answer: &str,
        accepted: &[String],
        threshold: f32,
    ) -> Result<Verdict> {
        if let Some(verdict) = policy::keyword_verdict(answer, accepted) {
            return Ok(verdict);
        }
        let candidates: Vec<String> = accepted
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();
        let ranked = self.search(answer.trim(), &candidates).await?;
        Ok(policy::semantic_verdict(&ranked, threshold))
    }

    /// A running or finished startup fetches its own data.
    fn startup_covers_data(&self) -> bool {
        self.state() == InitState::Ready || self.inner.init_slot().in_flight.is_some()
    }

    /// Requests currently waiting on the worker.
    pub fn in_flight_requests(&self) -> usize {
        self.inner.worker.in_flight()
    }
}

/// One full startup attempt. Settles the shared slot before returning so the
/// outcome and the state agree for every attached caller.
async fn run_startup(inner: Arc<Inner>) -> Result<()> {
    let outcome = Arc::clone(&inner).initialize().await;

    let listeners = {
        let mut slot = inner.init_slot();
        slot.in_flight = None;
        let listeners = std::mem::take(&mut slot.listeners);
        match &outcome {
            Ok(()) => inner.set_state(InitState::Ready),
            Err(error) => {
                inner.set_state(InitState::Failed);
                tracing::error!(error = %error, "initialization failed");
            }
        }
        listeners
    };

    if outcome.is_ok() {
        tracing::info!("trait matcher ready");
        for cb in &listeners {
            cb(100.0, READY_MESSAGE);
        }
    }
    outcome
}

impl Inner {
    fn state(&self) -> InitState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: InitState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(from = ?*state, to = ?next, "init state");
        *state = next;
    }

    fn init_slot(&self) -> std::sync::MutexGuard<'_, InitSlot> {
        self.init.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send progress to every caller currently attached to the startup.
    fn emit(&self, percent: f32, stage: &str) {
        let listeners = self.init_slot().listeners.clone();
        for cb in &listeners {
            cb(percent, stage);
        }
    }

    async fn fetch_artifacts(&self) -> Result<Artifacts> {
        self.set_state(InitState::DataLoading);
        match load_artifacts(self.fetcher.as_ref(), &self.source, self.retry).await {
            Ok(artifacts) => {
                self.set_state(InitState::DataLoaded);
                Ok(artifacts)
            }
            Err(e) => {
                self.set_state(InitState::Failed);
                Err(e)
            }
        }
    }

    /// Stage 1 output, fetching it if no preload is holding it.
    async fn take_artifacts(&self) -> Result<Artifacts> {
        let mut data = self.data.lock().await;
        match data.take() {
            Some(artifacts) => {
                self.set_state(InitState::DataLoaded);
                Ok(artifacts)
            }
            None => self.fetch_artifacts().await,
        }
    }

    async fn initialize(self: Arc<Self>) -> Result<()> {
        self.emit(5.0, "stage 1/3: loading trait data");
        let Artifacts {
            metadata,
            embeddings,
        } = self.take_artifacts().await?;
        self.emit(15.0, "stage 1/3: trait data loaded");

        // From here the buffer belongs to the worker; any failure means stage 1
        // has to run again.
        self.set_state(InitState::ModelLoading);
        self.emit(15.0, "stage 2/3: loading model");
        let reference = Arc::new(metadata.traits.clone());
        let relay: ProgressFn = {
            let inner = Arc::clone(&self);
            Arc::new(move |percent: f32, stage: &str| {
                inner.emit(15.0 + 0.7 * percent.clamp(0.0, 100.0), &format!("stage 2/3: {stage}"));
            })
        };
        let payload = InitPayload {
            traits: metadata.traits,
            embeddings,
            dims: metadata.dims,
        };
        self.worker.init(payload, Some(relay)).await?;

        self.emit(85.0, "stage 3/3: finalizing");
        *self.reference.lock().unwrap_or_else(PoisonError::into_inner) = Some(reference);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_shareable_across_attached_callers() {
        fn assert_clone<T: Clone + Send + Sync>() {}
        assert_clone::<Result<()>>();
    }

    #[test]
    fn matcher_handle_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync + Clone>() {}
        assert_send_sync::<TraitMatcher>();
    }
}
