//! Background Normalization Processor
//!
//! Runs normalization jobs off the request path. A mutating call site submits a
//! plain [`NormalizeJob`] record through a [`JobSubmitter`] and returns at once;
//! the processor's worker task picks the job up and runs
//! [`NormalizationPipeline::normalize_with_retry`].
//!
//! ## Delivery
//!
//! - At most once per submission: a job is executed once or not at all
//! - Best effort: when the bounded queue is full, or the processor has shut
//!   down, the job is dropped with a warning and the document simply stays
//!   "not yet normalized" until another job arrives
//! - Jobs run one at a time in submission order; runs for the same document are
//!   additionally serialized by the pipeline's document lock
//!
//! Outcomes are published on a broadcast channel as [`NormalizationEvent`]s.
//!
//! [`PendingJobs`] is the offline/degraded submitter: it only records jobs, and
//! the owner drains and runs them directly (tests, dev tools).

use crate::config::NormalizationConfig;
use crate::services::normalization::{NormalizationPipeline, NormalizationReport};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Work record: "normalize this document"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizeJob {
    pub document_id: String,
}

impl NormalizeJob {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
        }
    }
}

/// Seam between call sites that mutate Documents and whatever executes jobs
///
/// `submit` never blocks and never fails the caller.
pub trait JobSubmitter: Send + Sync {
    fn submit(&self, job: NormalizeJob);
}

/// Completion notice for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizationEvent {
    Completed(NormalizationReport),
    Failed { document_id: String, error: String },
}

impl NormalizationEvent {
    pub fn document_id(&self) -> &str {
        match self {
            NormalizationEvent::Completed(report) => &report.document_id,
            NormalizationEvent::Failed { document_id, .. } => document_id,
        }
    }
}

/// Cloneable handle feeding the processor's bounded queue
#[derive(Clone)]
pub struct NormalizationQueue {
    job_tx: mpsc::Sender<NormalizeJob>,
}

impl JobSubmitter for NormalizationQueue {
    fn submit(&self, job: NormalizeJob) {
        match self.job_tx.try_send(job) {
            Ok(()) => {
                tracing::debug!("Normalization job queued");
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(
                    "Normalization queue full, dropping job for document {}",
                    job.document_id
                );
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!(
                    "NormalizationProcessor has shut down, dropping job for document {}",
                    job.document_id
                );
            }
        }
    }
}

/// Submitter that only records jobs for a caller to run directly
#[derive(Clone, Default)]
pub struct PendingJobs {
    jobs: Arc<Mutex<Vec<NormalizeJob>>>,
}

impl PendingJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every recorded job, oldest first
    pub fn drain(&self) -> Vec<NormalizeJob> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|p| p.into_inner());
        std::mem::take(&mut *jobs)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobSubmitter for PendingJobs {
    fn submit(&self, job: NormalizeJob) {
        tracing::debug!("Recorded normalization job for {}", job.document_id);
        self.jobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(job);
    }
}

/// Worker task executing queued normalization jobs
pub struct NormalizationProcessor {
    queue: NormalizationQueue,
    events: broadcast::Sender<NormalizationEvent>,
    shutdown_tx: mpsc::Sender<()>,
    worker: JoinHandle<()>,
}

impl NormalizationProcessor {
    /// Create the processor and spawn its worker on the current tokio runtime
    ///
    /// # Arguments
    /// * `pipeline` - Pipeline each job is run through
    /// * `config` - Queue capacity and retry policy
    pub fn new(pipeline: NormalizationPipeline, config: &NormalizationConfig) -> Self {
        tracing::info!(
            "NormalizationProcessor starting (queue capacity {}, max retries {})",
            config.queue_capacity,
            config.max_retries
        );

        let (job_tx, mut job_rx) = mpsc::channel::<NormalizeJob>(config.queue_capacity.max(1));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let pipeline = pipeline.with_retry_backoff(config.retry_backoff());
        let max_retries = config.max_retries;
        let event_tx = events.clone();

        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased; // Check shutdown first

                    _ = shutdown_rx.recv() => {
                        tracing::info!("NormalizationProcessor shutting down");
                        break;
                    }

                    Some(job) = job_rx.recv() => {
                        let event = Self::run_job(&pipeline, &job, max_retries).await;
                        // No subscribers is fine
                        let _ = event_tx.send(event);
                        tokio::task::yield_now().await;
                    }
                }
            }
        });

        Self {
            queue: NormalizationQueue { job_tx },
            events,
            shutdown_tx,
            worker,
        }
    }

    /// Cloneable submitter handle for services that mutate Documents
    pub fn queue(&self) -> NormalizationQueue {
        self.queue.clone()
    }

    /// Receive the outcome of every job finished from now on
    pub fn subscribe(&self) -> broadcast::Receiver<NormalizationEvent> {
        self.events.subscribe()
    }

    /// Stop the worker and wait for it to exit
    ///
    /// A job already running completes first; queued jobs are dropped.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down NormalizationProcessor");
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.worker.await {
            tracing::error!("NormalizationProcessor worker ended abnormally: {}", e);
        }
    }

    async fn run_job(
        pipeline: &NormalizationPipeline,
        job: &NormalizeJob,
        max_retries: usize,
    ) -> NormalizationEvent {
        match pipeline
            .normalize_with_retry(&job.document_id, max_retries)
            .await
        {
            Ok(report) => NormalizationEvent::Completed(report),
            Err(e) => {
                tracing::error!("Normalization of {} failed: {}", job.document_id, e);
                NormalizationEvent::Failed {
                    document_id: job.document_id.clone(),
                    error: e.to_string(),
                }
            }
        }
    }
}

impl JobSubmitter for NormalizationProcessor {
    fn submit(&self, job: NormalizeJob) {
        self.queue.submit(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{DocumentAttrs, NewNode, NodeFilter, NodeType, SearchConfig};
    use std::time::Duration;

    fn pipeline() -> NormalizationPipeline {
        NormalizationPipeline::from_store(Arc::new(MemoryStore::new()), SearchConfig::default())
    }

    async fn next_event(rx: &mut broadcast::Receiver<NormalizationEvent>) -> NormalizationEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for normalization event")
            .unwrap()
    }

    #[test]
    fn test_queue_submit_sends_job() {
        let (job_tx, mut job_rx) = mpsc::channel(4);
        let queue = NormalizationQueue { job_tx };

        queue.submit(NormalizeJob::new("doc-1"));
        assert_eq!(job_rx.try_recv().unwrap(), NormalizeJob::new("doc-1"));
    }

    #[test]
    fn test_queue_drops_jobs_when_full() {
        let (job_tx, mut job_rx) = mpsc::channel(2);
        let queue = NormalizationQueue { job_tx };

        queue.submit(NormalizeJob::new("a"));
        queue.submit(NormalizeJob::new("b"));
        queue.submit(NormalizeJob::new("c"));

        let mut received = Vec::new();
        while let Ok(job) = job_rx.try_recv() {
            received.push(job.document_id);
        }
        assert_eq!(received, vec!["a", "b"]);
    }

    #[test]
    fn test_queue_handles_closed_channel() {
        let (job_tx, job_rx) = mpsc::channel(4);
        let queue = NormalizationQueue { job_tx };
        drop(job_rx);

        // Must not panic
        queue.submit(NormalizeJob::new("doc-1"));
    }

    #[test]
    fn test_pending_jobs_drain_in_order() {
        let pending = PendingJobs::new();
        pending.submit(NormalizeJob::new("a"));
        pending.clone().submit(NormalizeJob::new("b"));

        assert_eq!(pending.len(), 2);
        let drained: Vec<_> = pending.drain().into_iter().map(|j| j.document_id).collect();
        assert_eq!(drained, vec!["a", "b"]);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_processor_normalizes_submitted_document() {
        let pipeline = pipeline();
        let tree = pipeline.tree().clone();
        let processor = NormalizationProcessor::new(pipeline, &NormalizationConfig::default());
        let mut events = processor.subscribe();

        let doc = tree
            .create(None, NewNode::document("kyuss.pdf", DocumentAttrs::new("ENG", "kyuss.pdf", 10, 3)))
            .await
            .unwrap();
        processor.queue().submit(NormalizeJob::new(doc.id.clone()));

        match next_event(&mut events).await {
            NormalizationEvent::Completed(report) => {
                assert_eq!(report.document_id, doc.id);
                assert_eq!(report.created.len(), 3);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let pages = tree
            .count(&NodeFilter::new().with_parent_id(&doc.id).with_node_type(NodeType::Page))
            .await
            .unwrap();
        assert_eq!(pages, 3);

        processor.shutdown().await;
    }

    #[tokio::test]
    async fn test_processor_reports_failures() {
        let processor = NormalizationProcessor::new(pipeline(), &NormalizationConfig::default());
        let mut events = processor.subscribe();

        processor.submit(NormalizeJob::new("missing"));

        let event = next_event(&mut events).await;
        assert_eq!(event.document_id(), "missing");
        assert!(matches!(event, NormalizationEvent::Failed { .. }));

        processor.shutdown().await;
    }

    #[tokio::test]
    async fn test_submissions_after_shutdown_are_dropped() {
        let processor = NormalizationProcessor::new(pipeline(), &NormalizationConfig::default());
        let queue = processor.queue();
        processor.shutdown().await;

        // Worker is gone; receiver dropped with it
        queue.submit(NormalizeJob::new("doc-1"));
    }
}
