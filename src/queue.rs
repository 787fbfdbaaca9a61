//! Bounded ingestion coordinator.
//!
//! A fixed pool of workers drains a FIFO queue of [`IngestRequest`]s keyed by
//! document id, running each through the [`Pipeline`]. Submitting persists
//! the document as `pending` and returns its queue position at once.
//!
//! Lifecycle events are published on a broadcast channel; subscribers that
//! fall behind miss events but never slow the workers down.
//!
//! Cancellation is cooperative. A queued job is removed immediately; a
//! running job stops at its next stage boundary. Either way the document is
//! persisted as `failed` with a `cancelled` error.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use docvec_core::models::{
    Document, DocumentType, IngestRequest, ProcessingStatus, QueueStatus,
};
use docvec_core::{Error, Result};

use crate::ingest::{Pipeline, CANCELLED_MESSAGE};

const EVENT_CAPACITY: usize = 1024;

/// Acknowledgement returned by [`IngestionCoordinator::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedAck {
    pub id: String,
    /// Jobs ahead of this one when it was queued.
    pub position: usize,
}

/// Coordinator lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IngestEvent {
    Queued {
        id: String,
        position: usize,
    },
    Started {
        id: String,
    },
    Completed {
        id: String,
        status: ProcessingStatus,
        chunks: usize,
        vectors: usize,
        duration_ms: u64,
    },
    Failed {
        id: String,
        error: String,
    },
    Cancelled {
        id: String,
    },
}

impl IngestEvent {
    pub fn id(&self) -> &str {
        match self {
            IngestEvent::Queued { id, .. }
            | IngestEvent::Started { id }
            | IngestEvent::Completed { id, .. }
            | IngestEvent::Failed { id, .. }
            | IngestEvent::Cancelled { id } => id,
        }
    }

    /// True for the last event a job emits.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IngestEvent::Completed { .. } | IngestEvent::Failed { .. } | IngestEvent::Cancelled { .. }
        )
    }
}

struct Job {
    request: IngestRequest,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Job>,
    processing: HashMap<String, CancellationToken>,
    shutting_down: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.processing.is_empty()
    }
}

struct Shared {
    pipeline: Arc<Pipeline>,
    state: Mutex<QueueState>,
    /// Wakes workers when work arrives or on shutdown.
    work: Notify,
    /// Wakes `wait_idle` callers when a job leaves the queue.
    progress: Notify,
    events: broadcast::Sender<IngestEvent>,
}

impl Shared {
    fn emit(&self, event: IngestEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

pub struct IngestionCoordinator {
    shared: Arc<Shared>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl IngestionCoordinator {
    /// Start `concurrency` workers on the current runtime.
    pub fn start(pipeline: Arc<Pipeline>, concurrency: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            pipeline,
            state: Mutex::new(QueueState::default()),
            work: Notify::new(),
            progress: Notify::new(),
            events,
        });

        let workers = (0..concurrency.max(1))
            .map(|n| tokio::spawn(worker(n, shared.clone())))
            .collect();

        Self {
            shared,
            workers: std::sync::Mutex::new(workers),
        }
    }

    /// Queue a request and persist its document as `pending`.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedType`] for an unknown declared type;
    /// [`Error::Configuration`] when the id is already queued or processing,
    /// was already ingested successfully, or the coordinator is shutting down.
    pub async fn submit(&self, request: IngestRequest) -> Result<QueuedAck> {
        let doc_type: DocumentType = request.file_type.parse()?;
        let documents = self.shared.pipeline.document_store();

        // Held across persistence so the duplicate check and the enqueue are atomic.
        let mut state = self.shared.state.lock().await;
        if state.shutting_down {
            return Err(Error::Configuration(
                "ingestion coordinator is shutting down".to_string(),
            ));
        }
        if state.processing.contains_key(&request.id)
            || state.pending.iter().any(|j| j.request.id == request.id)
        {
            return Err(Error::Configuration(format!(
                "document {} is already queued",
                request.id
            )));
        }
        if let Some(existing) = documents.get_document(&request.id).await? {
            if existing.status == ProcessingStatus::Success {
                return Err(Error::Configuration(format!(
                    "document {} was already ingested",
                    request.id
                )));
            }
        }

        // Saving the pending row drops the old chunk rows, so their vectors go first.
        self.shared
            .pipeline
            .discard_previous_vectors(&request.id, &request.collection_id)
            .await?;
        let pending = Document::pending(&request.id, &request.file_name, doc_type);
        documents.save_document(&pending, &[]).await?;

        let id = request.id.clone();
        let position = state.pending.len();
        state.pending.push_back(Job {
            request,
            cancel: CancellationToken::new(),
        });
        drop(state);

        tracing::debug!(document = %id, position, "queued document");
        self.shared.emit(IngestEvent::Queued {
            id: id.clone(),
            position,
        });
        self.shared.work.notify_one();
        Ok(QueuedAck { id, position })
    }

    /// Cancel a queued or running job. Returns `false` for an unknown id.
    pub async fn cancel(&self, id: &str) -> Result<bool> {
        let mut state = self.shared.state.lock().await;

        if let Some(pos) = state.pending.iter().position(|j| j.request.id == id) {
            let job = state.pending.remove(pos);
            drop(state);
            if let Some(job) = job {
                let doc_type: DocumentType = job.request.file_type.parse()?;
                let mut doc = Document::pending(&job.request.id, &job.request.file_name, doc_type);
                doc.status = ProcessingStatus::Failed;
                doc.errors.push(CANCELLED_MESSAGE.to_string());
                self.shared
                    .pipeline
                    .document_store()
                    .save_document(&doc, &[])
                    .await?;
            }
            tracing::info!(document = %id, "cancelled queued document");
            self.shared.emit(IngestEvent::Cancelled { id: id.to_string() });
            self.shared.progress.notify_waiters();
            return Ok(true);
        }

        if let Some(token) = state.processing.get(id) {
            token.cancel();
            tracing::info!(document = %id, "cancelling running document");
            return Ok(true);
        }

        Ok(false)
    }

    pub async fn queue_status(&self) -> QueueStatus {
        let state = self.shared.state.lock().await;
        QueueStatus {
            pending: state.pending.len(),
            processing: state.processing.len(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.shared.events.subscribe()
    }

    /// Resolve once nothing is queued or processing.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.state.lock().await.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting work, let queued and running jobs finish, and join
    /// the workers.
    pub async fn shutdown(&self) {
        self.shared.state.lock().await.shutting_down = true;
        self.shared.work.notify_waiters();

        let handles: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "ingestion worker panicked");
            }
        }
    }
}

async fn worker(n: usize, shared: Arc<Shared>) {
    tracing::debug!(worker = n, "ingestion worker started");
    loop {
        let notified = shared.work.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let job = {
            let mut state = shared.state.lock().await;
            match state.pending.pop_front() {
                Some(job) => {
                    state
                        .processing
                        .insert(job.request.id.clone(), job.cancel.clone());
                    Some(job)
                }
                None if state.shutting_down => break,
                None => None,
            }
        };

        match job {
            Some(job) => run_job(&shared, job).await,
            None => notified.await,
        }
    }
    tracing::debug!(worker = n, "ingestion worker stopped");
}

async fn run_job(shared: &Shared, job: Job) {
    let id = job.request.id.clone();
    shared.emit(IngestEvent::Started { id: id.clone() });

    let result = shared.pipeline.process(&job.request, &job.cancel).await;

    let event = match result {
        Ok(processed) => IngestEvent::Completed {
            id: id.clone(),
            status: processed.document.status,
            chunks: processed.chunks.len(),
            vectors: processed.vectors_inserted,
            duration_ms: processed.duration_ms,
        },
        Err(Error::Cancelled) => IngestEvent::Cancelled { id: id.clone() },
        Err(e) => IngestEvent::Failed {
            id: id.clone(),
            error: e.to_string(),
        },
    };
    // Emitted while still marked processing, so an idle queue has no events in flight.
    shared.emit(event);
    shared.state.lock().await.processing.remove(&id);
    shared.progress.notify_waiters();
}
