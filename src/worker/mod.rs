//! Background execution host and the coordinator that talks to it.
//!
//! All model loading and tensor math happen on one dedicated thread
//! ([`host::WorkerHost`]). [`WorkerHandle`] is the caller side: it tags each
//! request with a fresh correlation id, parks a oneshot sender for it, and a
//! dispatcher task resolves that sender when the matching reply arrives.
//!
//! Many requests may be in flight at once; the worker still runs them one at a
//! time in arrival order, so completion order follows cost, not submission.
//! Dropping a request future does not cancel the work, its reply is discarded.

pub mod host;
pub mod protocol;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc as tokio_mpsc, oneshot};

use crate::embedding::ProviderFactory;
use crate::error::{Error, Result};
use crate::ranking::SimilarityResult;
use crate::ProgressFn;
use host::WorkerHost;
use protocol::{CorrelationId, Envelope, InitPayload, Reply, Request, RequestKind, Response};

struct Pending {
    kind: RequestKind,
    tx: oneshot::Sender<Result<Response>>,
    progress: Option<ProgressFn>,
}

type PendingMap = Arc<Mutex<HashMap<CorrelationId, Pending>>>;

fn lock(pending: &PendingMap) -> std::sync::MutexGuard<'_, HashMap<CorrelationId, Pending>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Caller-side handle to the background worker.
pub struct WorkerHandle {
    inbox: mpsc::Sender<Envelope>,
    next_id: AtomicU64,
    pending: PendingMap,
}

impl WorkerHandle {
    /// Start the worker thread and its reply dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(factory: ProviderFactory) -> Result<Self> {
        let (inbox_tx, inbox_rx) = mpsc::channel::<Envelope>();
        let (reply_tx, reply_rx) = tokio_mpsc::unbounded_channel::<Reply>();

        let host = WorkerHost::new(factory);
        std::thread::Builder::new()
            .name("traitsense-worker".into())
            .spawn(move || host.run(inbox_rx, reply_tx))
            .map_err(|e| Error::WorkerProtocol(format!("failed to start worker thread: {e}")))?;

        let pending = PendingMap::default();
        tokio::spawn(dispatch(reply_rx, Arc::clone(&pending)));

        Ok(Self {
            inbox: inbox_tx,
            next_id: AtomicU64::new(0),
            pending,
        })
    }

    /// Send one request and wait for its terminal reply.
    pub async fn request(
        &self,
        request: Request,
        progress: Option<ProgressFn>,
    ) -> Result<Response> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let kind = request.kind();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, Pending { kind, tx, progress });

        if self.inbox.send(Envelope { id, request }).is_err() {
            lock(&self.pending).remove(&id);
            return Err(Error::WorkerProtocol("worker is not running".into()));
        }
        tracing::trace!(id, ?kind, "request sent to worker");

        rx.await.map_err(|_| {
            Error::WorkerProtocol(format!("request {id} was dropped without a reply"))
        })?
    }

    /// Hand the precomputed corpus to the worker and load the model.
    pub async fn init(&self, payload: InitPayload, progress: Option<ProgressFn>) -> Result<()> {
        match self.request(Request::Init(payload), progress).await? {
            Response::Ready => Ok(()),
            other => Err(unexpected(RequestKind::Init, &other)),
        }
    }

    pub async fn search(
        &self,
        query: String,
        corpus: Vec<String>,
    ) -> Result<Vec<SimilarityResult>> {
        match self.request(Request::Search { query, corpus }, None).await? {
            Response::Ranked(results) => Ok(results),
            other => Err(unexpected(RequestKind::Search, &other)),
        }
    }

    pub async fn search_batch(
        &self,
        queries: Vec<String>,
        corpus: Vec<String>,
    ) -> Result<Vec<Vec<SimilarityResult>>> {
        match self.request(Request::SearchBatch { queries, corpus }, None).await? {
            Response::RankedBatch(results) => Ok(results),
            other => Err(unexpected(RequestKind::SearchBatch, &other)),
        }
    }

    /// Number of requests still waiting for a reply.
    pub fn in_flight(&self) -> usize {
        lock(&self.pending).len()
    }
}

fn unexpected(kind: RequestKind, response: &Response) -> Error {
    Error::WorkerProtocol(format!("unexpected response to {kind:?} request: {response:?}"))
}

/// Route worker replies to their waiting callers until the worker goes away,
/// then fail whatever is still pending.
async fn dispatch(mut replies: tokio_mpsc::UnboundedReceiver<Reply>, pending: PendingMap) {
    while let Some(reply) = replies.recv().await {
        match reply {
            Reply::Progress { id, percent, stage } => {
                let sink = lock(&pending).get(&id).and_then(|p| p.progress.clone());
                if let Some(sink) = sink {
                    sink(percent, &stage);
                }
            }
            terminal => {
                let id = terminal.id();
                let Some(entry) = lock(&pending).remove(&id) else {
                    tracing::debug!(
                        id,
                        reply = terminal.name(),
                        "ignoring reply with no pending request"
                    );
                    continue;
                };
                // The receiver may be gone if the caller stopped waiting.
                let _ = entry.tx.send(protocol::resolve(entry.kind, terminal));
            }
        }
    }

    let orphaned: Vec<(CorrelationId, Pending)> = lock(&pending).drain().collect();
    for (id, entry) in orphaned {
        let _ = entry.tx.send(Err(Error::WorkerProtocol(format!(
            "worker stopped before replying to request {id}"
        ))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stray_replies_are_ignored_and_pending_resolved() {
        let (reply_tx, reply_rx) = tokio_mpsc::unbounded_channel();
        let pending = PendingMap::default();
        let (tx, rx) = oneshot::channel();
        lock(&pending).insert(
            5,
            Pending {
                kind: RequestKind::Search,
                tx,
                progress: None,
            },
        );
        let task = tokio::spawn(dispatch(reply_rx, Arc::clone(&pending)));

        reply_tx.send(Reply::InitComplete { id: 99 }).unwrap();
        reply_tx
            .send(Reply::SearchResult {
                id: 5,
                results: vec![],
            })
            .unwrap();

        let response = rx.await.unwrap().unwrap();
        assert!(matches!(response, Response::Ranked(r) if r.is_empty()));
        drop(reply_tx);
        task.await.unwrap();
        assert!(lock(&pending).is_empty());
    }

    #[tokio::test]
    async fn pending_requests_fail_when_worker_disappears() {
        let (reply_tx, reply_rx) = tokio_mpsc::unbounded_channel::<Reply>();
        let pending = PendingMap::default();
        let (tx, rx) = oneshot::channel();
        lock(&pending).insert(
            1,
            Pending {
                kind: RequestKind::Init,
                tx,
                progress: None,
            },
        );
        let task = tokio::spawn(dispatch(reply_rx, Arc::clone(&pending)));
        drop(reply_tx);
        task.await.unwrap();

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::WorkerProtocol(ref m) if m.contains("request 1")));
    }

    #[tokio::test]
    async fn progress_is_routed_by_id() {
        let (reply_tx, reply_rx) = tokio_mpsc::unbounded_channel();
        let pending = PendingMap::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink: ProgressFn = {
            let seen = Arc::clone(&seen);
            Arc::new(move |p: f32, stage: &str| seen.lock().unwrap().push((p, stage.to_string())))
        };
        let (tx, rx) = oneshot::channel();
        lock(&pending).insert(
            2,
            Pending {
                kind: RequestKind::Init,
                tx,
                progress: Some(sink),
            },
        );
        tokio::spawn(dispatch(reply_rx, Arc::clone(&pending)));

        reply_tx
            .send(Reply::Progress {
                id: 3,
                percent: 10.0,
                stage: "someone else".into(),
            })
            .unwrap();
        reply_tx
            .send(Reply::Progress {
                id: 2,
                percent: 40.0,
                stage: "reading model weights".into(),
            })
            .unwrap();
        reply_tx.send(Reply::InitComplete { id: 2 }).unwrap();

        rx.await.unwrap().unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[(40.0, "reading model weights".to_string())]);
    }
}
