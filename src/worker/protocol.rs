//! Messages exchanged between the coordinator and the background worker.
//!
//! Every request is wrapped in an [`Envelope`] carrying a correlation id. The
//! worker answers each envelope with exactly one terminal [`Reply`] bearing the
//! same id, optionally preceded by [`Reply::Progress`] messages for that id.

use crate::artifacts::check_consistency;
use crate::corpus::TraitCorpusEntry;
use crate::error::{Error, Result};
use crate::ranking::SimilarityResult;

pub type CorrelationId = u64;

#[derive(Debug)]
pub struct Envelope {
    pub id: CorrelationId,
    pub request: Request,
}

#[derive(Debug)]
pub enum Request {
    /// Install precomputed corpus data and load the model.
    Init(InitPayload),
    Search { query: String, corpus: Vec<String> },
    SearchBatch { queries: Vec<String>, corpus: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Init,
    Search,
    SearchBatch,
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Init(_) => RequestKind::Init,
            Request::Search { .. } => RequestKind::Search,
            Request::SearchBatch { .. } => RequestKind::SearchBatch,
        }
    }
}

/// Precomputed corpus handed to the worker. `embeddings` is moved in, never copied.
#[derive(Debug)]
pub struct InitPayload {
    pub traits: Vec<TraitCorpusEntry>,
    pub embeddings: Vec<u8>,
    pub dims: usize,
}

impl InitPayload {
    /// Reject payloads whose buffer does not hold one `dims`-wide row per trait.
    pub fn validate(&self) -> Result<()> {
        check_consistency(self.traits.len(), self.dims, self.embeddings.len())
            .map_err(|e| Error::WorkerProtocol(format!("malformed init payload: {e}")))
    }
}

#[derive(Debug)]
pub enum Reply {
    Progress {
        id: CorrelationId,
        percent: f32,
        stage: String,
    },
    InitComplete {
        id: CorrelationId,
    },
    SearchResult {
        id: CorrelationId,
        results: Vec<SimilarityResult>,
    },
    SearchBatchResult {
        id: CorrelationId,
        results: Vec<Vec<SimilarityResult>>,
    },
    Error {
        id: CorrelationId,
        error: Error,
    },
}

impl Reply {
    pub fn id(&self) -> CorrelationId {
        match self {
            Reply::Progress { id, .. }
            | Reply::InitComplete { id }
            | Reply::SearchResult { id, .. }
            | Reply::SearchBatchResult { id, .. }
            | Reply::Error { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Reply::Progress { .. } => "progress",
            Reply::InitComplete { .. } => "init_complete",
            Reply::SearchResult { .. } => "search_result",
            Reply::SearchBatchResult { .. } => "search_batch_result",
            Reply::Error { .. } => "error",
        }
    }
}

/// Successful outcome of a request, as seen by the coordinator.
#[derive(Debug)]
pub enum Response {
    Ready,
    Ranked(Vec<SimilarityResult>),
    RankedBatch(Vec<Vec<SimilarityResult>>),
}

/// Match a terminal reply to the kind of request that produced it.
pub fn resolve(kind: RequestKind, reply: Reply) -> Result<Response> {
    match (kind, reply) {
        (_, Reply::Error { error, .. }) => Err(error),
        (RequestKind::Init, Reply::InitComplete { .. }) => Ok(Response::Ready),
        (RequestKind::Search, Reply::SearchResult { results, .. }) => Ok(Response::Ranked(results)),
        (RequestKind::SearchBatch, Reply::SearchBatchResult { results, .. }) => {
            Ok(Response::RankedBatch(results))
        }
        (kind, other) => Err(Error::WorkerProtocol(format!(
            "unexpected {} reply to {kind:?} request {}",
            other.name(),
            other.id()
        ))),
    }
}
