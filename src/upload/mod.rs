//! Upload queue: hands finished segments to the indexing service
//!
//! Segments enter a bounded channel in capture order and are drained by a
//! small worker pool. When the channel is full they wait in an in-memory
//! backlog instead, so enqueueing never waits on upload progress.
//!
//! Each segment goes through upload, processing, collection add and
//! extraction. A transient failure retries with exponential backoff from the
//! stage that failed; stages already done are not repeated. The local file
//! is deleted only after every stage succeeded. The outcome of every
//! enqueued segment is kept in an [`OutcomeLog`].

mod outcome;
mod retry;

pub use outcome::{OutcomeLog, UploadOutcome, UploadStatus};
pub use retry::{
    backoff_delay, classify_status, decide, FailureKind, GiveUpReason, RetryDecision, RetryPolicy,
};

use crate::config::UploadConfig;
use crate::error::{ScreenlogError, ScreenlogResult};
use crate::indexing::{ExtractRequest, FileState, IndexingClient, IndexingError, RemoteFile};
use crate::recording_manager::Segment;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything a worker needs to process a segment
struct UploadContext {
    collection_id: String,
    client: Arc<dyn IndexingClient>,
    policy: RetryPolicy,
    log: Arc<OutcomeLog>,
    /// `None` skips the extraction stage
    extraction: Option<ExtractRequest>,
    poll_interval: Duration,
    max_status_polls: u32,
    /// Segments queued, waiting in the backlog or uploading
    in_flight: Mutex<HashSet<Uuid>>,
    /// Segments that arrived while the channel was full, oldest first
    backlog: Mutex<VecDeque<Segment>>,
}

/// Stages a segment has already completed; kept across retries
#[derive(Debug, Default)]
struct Progress {
    remote: Option<RemoteFile>,
    ready: bool,
    added: bool,
    extracted: bool,
}

/// Bounded upload queue with a worker pool
#[derive(Clone)]
pub struct UploadQueue {
    context: Arc<UploadContext>,
    sender: Arc<AsyncMutex<Option<mpsc::Sender<Segment>>>>,
    workers: Arc<AsyncMutex<Vec<JoinHandle<()>>>>,
}

impl UploadQueue {
    /// Spawn the worker pool and return the queue handle
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: &UploadConfig,
        collection_id: impl Into<String>,
        client: Arc<dyn IndexingClient>,
        log: Arc<OutcomeLog>,
    ) -> Self {
        let context = Arc::new(UploadContext {
            collection_id: collection_id.into(),
            client,
            policy: config.retry_policy(),
            log,
            extraction: config.extract.then(ExtractRequest::default),
            poll_interval: config.status_poll_interval(),
            max_status_polls: config.max_status_polls.max(1),
            in_flight: Mutex::new(HashSet::new()),
            backlog: Mutex::new(VecDeque::new()),
        });

        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(AsyncMutex::new(receiver));

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let context = context.clone();
                let receiver = receiver.clone();
                tokio::spawn(run_worker(worker, context, receiver))
            })
            .collect();

        info!(
            workers = config.workers.max(1),
            capacity = config.queue_capacity.max(1),
            max_attempts = context.policy.max_attempts,
            extract = config.extract,
            "upload queue started"
        );

        Self {
            context,
            sender: Arc::new(AsyncMutex::new(Some(sender))),
            workers: Arc::new(AsyncMutex::new(workers)),
        }
    }

    /// Take ownership of a finished segment and queue it for upload
    ///
    /// Never waits for a worker: when the channel is full the segment joins
    /// the backlog. Fails with `DuplicateSegment` if the same segment is
    /// already queued or uploading, and with `QueueClosed` after shutdown.
    pub async fn enqueue(&self, segment: Segment) -> ScreenlogResult<()> {
        let segment_id = segment.segment_id;
        if !self.context.in_flight.lock()?.insert(segment_id) {
            return Err(ScreenlogError::DuplicateSegment(segment_id.to_string()));
        }

        let sender = self.sender.lock().await.clone();
        let Some(sender) = sender else {
            self.context.release(segment_id);
            return Err(ScreenlogError::QueueClosed);
        };

        if let Err(e) = self.context.log.push_pending(&segment) {
            self.context.release(segment_id);
            return Err(e);
        }

        let segment_index = segment.segment_index;
        if let Err(e) = self.context.submit(&sender, segment) {
            self.context.release(segment_id);
            if let Err(e) =
                self.context
                    .log
                    .mark_failed(segment_id, "upload queue closed", FailureKind::Transient)
            {
                warn!(%segment_id, error = %e, "failed to record closed queue");
            }
            return Err(e);
        }

        debug!(%segment_id, segment_index, "segment enqueued for upload");
        Ok(())
    }

    /// Up to `n` outcomes, newest enqueue first
    pub fn list_recent(&self, n: usize) -> Vec<UploadOutcome> {
        self.context.log.recent(n)
    }

    pub fn outcome(&self, segment_id: Uuid) -> Option<UploadOutcome> {
        self.context.log.get(segment_id)
    }

    /// Number of segments queued or uploading
    pub fn in_flight(&self) -> usize {
        self.context.in_flight.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Segments waiting because the channel was full
    pub fn backlog(&self) -> usize {
        self.context.backlog.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn collection_id(&self) -> &str {
        &self.context.collection_id
    }

    /// Stop accepting segments and wait for the workers to drain the queue
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().await.take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let workers = std::mem::take(&mut *self.workers.lock().await);
        info!(
            pending = self.in_flight(),
            "upload queue closing, draining workers"
        );
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "upload worker panicked");
            }
        }
        self.context.log.flush().await;
        info!("upload queue drained");
    }
}

async fn run_worker(
    worker: usize,
    context: Arc<UploadContext>,
    receiver: Arc<AsyncMutex<mpsc::Receiver<Segment>>>,
) {
    while let Some(segment) = context.next_segment(&receiver).await {
        context.process(worker, segment).await;
    }
    debug!(worker, "upload worker exiting");
}

impl UploadContext {
    fn release(&self, segment_id: Uuid) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&segment_id);
        }
    }

    /// Hand a segment to the workers without waiting for capacity
    fn submit(&self, sender: &mpsc::Sender<Segment>, segment: Segment) -> ScreenlogResult<()> {
        let mut backlog = self.backlog.lock()?;
        // Once anything is in the backlog, later segments queue behind it
        let segment = if backlog.is_empty() {
            match sender.try_send(segment) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(segment)) => segment,
                Err(TrySendError::Closed(_)) => return Err(ScreenlogError::QueueClosed),
            }
        } else {
            segment
        };

        warn!(
            segment_id = %segment.segment_id,
            segment_index = segment.segment_index,
            backlog = backlog.len() + 1,
            "uploads are falling behind capture"
        );
        backlog.push_back(segment);
        Ok(())
    }

    /// Next segment to upload: the channel first, then the backlog
    ///
    /// Returns `None` once the channel is closed and both are empty.
    async fn next_segment(
        &self,
        receiver: &AsyncMutex<mpsc::Receiver<Segment>>,
    ) -> Option<Segment> {
        let mut receiver = receiver.lock().await;
        loop {
            match receiver.try_recv() {
                Ok(segment) => return Some(segment),
                Err(TryRecvError::Empty) => {
                    if let Some(segment) = self.pop_backlog() {
                        return Some(segment);
                    }
                    if let Some(segment) = receiver.recv().await {
                        return Some(segment);
                    }
                }
                Err(TryRecvError::Disconnected) => return self.pop_backlog(),
            }
        }
    }

    fn pop_backlog(&self) -> Option<Segment> {
        self.backlog.lock().ok()?.pop_front()
    }

    async fn process(&self, worker: usize, segment: Segment) {
        let segment_id = segment.segment_id;
        let mut progress = Progress::default();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if let Err(e) = self.log.record_attempt(segment_id) {
                warn!(%segment_id, error = %e, "failed to record upload attempt");
            }

            let err = match self.advance(&segment, &mut progress).await {
                Ok(remote) => {
                    info!(
                        worker,
                        %segment_id,
                        segment_index = segment.segment_index,
                        file_id = %remote.file_id,
                        attempt,
                        "segment uploaded"
                    );
                    if let Err(e) = self.log.mark_uploaded(segment_id, &remote.file_id) {
                        warn!(%segment_id, error = %e, "failed to record upload");
                    }
                    if let Err(e) = tokio::fs::remove_file(&segment.local_path).await {
                        warn!(
                            path = %segment.local_path.display(),
                            error = %e,
                            "uploaded segment could not be removed"
                        );
                    }
                    break;
                }
                Err(err) => err,
            };

            match decide(attempt, err.kind, &self.policy) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        worker,
                        %segment_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "upload failed, retrying"
                    );
                    if let Err(e) = self.log.record_error(segment_id, &err.message, err.kind) {
                        warn!(%segment_id, error = %e, "failed to record upload error");
                    }
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp(reason) => {
                    match reason {
                        GiveUpReason::NonRetryable => error!(
                            %segment_id,
                            status = ?err.status,
                            error = %err,
                            path = %segment.local_path.display(),
                            "upload rejected; check the API key and collection id"
                        ),
                        GiveUpReason::AttemptsExhausted => error!(
                            %segment_id,
                            attempts = attempt,
                            error = %err,
                            path = %segment.local_path.display(),
                            "upload failed after all retries; segment kept on disk"
                        ),
                    }
                    if let Err(e) = self.log.mark_failed(segment_id, &err.message, err.kind) {
                        warn!(%segment_id, error = %e, "failed to record upload failure");
                    }
                    break;
                }
            }
        }

        self.release(segment_id);
    }

    /// Run the stages `progress` has not completed yet
    async fn advance(
        &self,
        segment: &Segment,
        progress: &mut Progress,
    ) -> Result<RemoteFile, IndexingError> {
        let remote = match progress.remote.clone() {
            Some(remote) => remote,
            None => {
                let remote = self
                    .client
                    .upload_file(segment)
                    .await
                    .map_err(|e| e.in_stage("upload"))?;
                let segment_id = segment.segment_id;
                debug!(%segment_id, file_id = %remote.file_id, "file uploaded");
                if let Err(e) = self.log.record_remote(segment_id, &remote.file_id) {
                    warn!(%segment_id, error = %e, "failed to record remote file");
                }
                progress.remote = Some(remote.clone());
                remote
            }
        };

        if !progress.ready {
            self.await_ready(&remote.file_id)
                .await
                .map_err(|e| e.in_stage("processing"))?;
            progress.ready = true;
        }

        if !progress.added {
            self.client
                .add_to_collection(&self.collection_id, &remote.file_id)
                .await
                .map_err(|e| e.in_stage("add to collection"))?;
            progress.added = true;
        }

        if let Some(request) = &self.extraction {
            if !progress.extracted {
                let job = self
                    .client
                    .extract(&remote, request)
                    .await
                    .map_err(|e| e.in_stage("extract"))?;
                debug!(file_id = %remote.file_id, job_id = %job.job_id, "extraction requested");
                progress.extracted = true;
            }
        }

        Ok(remote)
    }

    /// Poll until the service has finished processing the file
    async fn await_ready(&self, file_id: &str) -> Result<(), IndexingError> {
        for poll in 1..=self.max_status_polls {
            match self.client.file_state(file_id).await? {
                FileState::Ready => return Ok(()),
                FileState::Failed(reason) => return Err(IndexingError::permanent(reason)),
                FileState::Processing if poll < self.max_status_polls => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                FileState::Processing => {}
            }
        }
        Err(IndexingError::transient(format!(
            "file {} still processing after {} polls",
            file_id, self.max_status_polls
        )))
    }
}
