//! The background side of the worker boundary.
//!
//! [`WorkerHost`] owns the embedding provider and the corpus cache. It drains
//! its inbox one envelope at a time, in arrival order, and answers every
//! envelope with exactly one terminal reply, including when the handler fails
//! or panics.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Receiver;

use ndarray::Array1;
use tokio::sync::mpsc::UnboundedSender;

use super::protocol::{CorrelationId, Envelope, InitPayload, Reply, Request};
use crate::corpus::{CorpusStore, EmbeddingMatrix, PrecomputedCorpus};
use crate::embedding::{LazyProvider, ProviderFactory};
use crate::error::{Error, Result};
use crate::ranking::{rank, rank_batch, SimilarityResult};

pub struct WorkerHost {
    provider: LazyProvider,
    corpus: CorpusStore,
}

impl WorkerHost {
    pub fn new(factory: ProviderFactory) -> Self {
        Self {
            provider: LazyProvider::new(factory),
            corpus: CorpusStore::new(),
        }
    }

    /// Process envelopes until the inbox closes or nobody is listening for replies.
    pub fn run(mut self, inbox: Receiver<Envelope>, outbox: UnboundedSender<Reply>) {
        tracing::debug!("worker started");
        while let Ok(Envelope { id, request }) = inbox.recv() {
            let kind = request.kind();
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| self.handle(id, request, &outbox)));
            let reply = match outcome {
                Ok(Ok(reply)) => reply,
                Ok(Err(error)) => {
                    tracing::warn!(id, ?kind, error = %error, "worker request failed");
                    Reply::Error { id, error }
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(id, ?kind, panic = %message, "worker request panicked");
                    Reply::Error {
                        id,
                        error: Error::WorkerProtocol(format!("worker panicked: {message}")),
                    }
                }
            };
            if outbox.send(reply).is_err() {
                break;
            }
        }
        tracing::debug!("worker stopped");
    }

    fn handle(
        &mut self,
        id: CorrelationId,
        request: Request,
        outbox: &UnboundedSender<Reply>,
    ) -> Result<Reply> {
        match request {
            Request::Init(payload) => {
                let progress = |percent: f32, stage: &str| {
                    let _ = outbox.send(Reply::Progress {
                        id,
                        percent,
                        stage: stage.to_string(),
                    });
                };
                self.init(payload, &progress)?;
                Ok(Reply::InitComplete { id })
            }
            Request::Search { query, corpus } => Ok(Reply::SearchResult {
                id,
                results: self.search(&query, &corpus)?,
            }),
            Request::SearchBatch { queries, corpus } => Ok(Reply::SearchBatchResult {
                id,
                results: self.search_batch(&queries, &corpus)?,
            }),
        }
    }

    fn init(&mut self, payload: InitPayload, on_progress: &dyn Fn(f32, &str)) -> Result<()> {
        payload.validate()?;
        let InitPayload {
            traits,
            embeddings,
            dims,
        } = payload;

        let matrix = EmbeddingMatrix::from_le_bytes(&embeddings, dims)?;
        drop(embeddings);
        let precomputed = PrecomputedCorpus::new(&traits, matrix)?;

        let provider = self.provider.get_or_load(on_progress)?;
        if provider.dimensions() != precomputed.dims() {
            return Err(Error::InvalidArtifact(format!(
                "precomputed embeddings have {} dims but the model produces {}",
                precomputed.dims(),
                provider.dimensions()
            )));
        }
        self.corpus.set_precomputed(precomputed);
        Ok(())
    }

    fn search(&mut self, query: &str, corpus: &[String]) -> Result<Vec<SimilarityResult>> {
        if query.trim().is_empty() || corpus.is_empty() {
            return Ok(Vec::new());
        }
        let provider = self.provider.get_or_load(&|_, _| {})?;
        let query_vec = provider
            .embed(query)
            .map_err(|e| Error::Embedding(format!("{e:#}")))?;
        let matrix = self.corpus.corpus_embeddings(corpus, provider.as_ref())?;
        rank(Array1::from(query_vec).view(), &matrix, corpus)
    }

    /// Blank queries get an empty list at their position; the rest share one
    /// embedding pass and one corpus matrix.
    fn search_batch(
        &mut self,
        queries: &[String],
        corpus: &[String],
    ) -> Result<Vec<Vec<SimilarityResult>>> {
        let live: Vec<usize> = queries
            .iter()
            .enumerate()
            .filter(|(_, q)| !q.trim().is_empty())
            .map(|(i, _)| i)
            .collect();
        let mut out = vec![Vec::new(); queries.len()];
        if live.is_empty() || corpus.is_empty() {
            return Ok(out);
        }

        let provider = self.provider.get_or_load(&|_, _| {})?;
        let texts: Vec<&str> = live.iter().map(|&i| queries[i].as_str()).collect();
        let rows = provider
            .embed_batch(&texts)
            .map_err(|e| Error::Embedding(format!("{e:#}")))?;
        let query_matrix = EmbeddingMatrix::from_rows(rows, provider.dimensions())?;
        let matrix = self.corpus.corpus_embeddings(corpus, provider.as_ref())?;

        for (slot, ranked) in live.into_iter().zip(rank_batch(&query_matrix, &matrix, corpus)?) {
            out[slot] = ranked;
        }
        Ok(out)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
