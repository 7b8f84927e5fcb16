//! Sync job API
//!
//! The [`SyncEngine`] accepts sync requests and runs each one as a background
//! job against a source and a destination [`IFileStore`].
//!
//! ## Job Flow
//!
//! 1. **Submit**: register a `Queued` job and return its id immediately
//! 2. **Plan**: enumerate the destination and diff it against the source snapshot
//! 3. **Transfer**: run the operations on the scheduler's worker pool
//! 4. **Resolve**: the tracker derives the terminal status from the outcomes
//!
//! Jobs are persisted when submitted and again when they reach a terminal
//! status, if a repository is attached. Status lookups fall back to the
//! repository for jobs that are no longer in memory.

use std::sync::Arc;

use dashmap::DashMap;
use esync_core::config::Config;
use esync_core::domain::{JobId, RemotePath, SyncJob, SyncOperation, SyncOptions};
use esync_core::ports::{IFileStore, IJobRepository};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::diff::{diff, walk_tree, DiffOptions, Snapshot, TreeSide};
use crate::executor::TransferExecutor;
use crate::rate_limit::TransferRateLimiter;
use crate::retry::RetryPolicy;
use crate::scheduler::TransferScheduler;
use crate::tracker::JobTracker;
use crate::SyncError;

/// Engine-wide tuning taken from [`Config`]
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Worker pool size when a request does not set one
    pub concurrency_limit: usize,
    pub chunk_size: u64,
    pub mtime_tolerance: chrono::Duration,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency_limit: config.engine.concurrency_limit.max(1),
            chunk_size: config.engine.chunk_size_bytes,
            mtime_tolerance: chrono::Duration::seconds(
                i64::try_from(config.engine.mtime_tolerance_secs).unwrap_or(i64::MAX),
            ),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

struct JobHandle {
    tracker: Arc<JobTracker>,
    cancel: CancellationToken,
    /// Cancelled once the job task has persisted its final snapshot
    settled: CancellationToken,
}

/// Runs sync jobs between two file stores
pub struct SyncEngine {
    source: Arc<dyn IFileStore>,
    destination: Arc<dyn IFileStore>,
    limiter: Arc<TransferRateLimiter>,
    retry: RetryPolicy,
    settings: EngineSettings,
    repository: Option<Arc<dyn IJobRepository>>,
    jobs: DashMap<JobId, JobHandle>,
}

impl SyncEngine {
    /// Creates an engine using the retry, rate limit and engine sections of `config`
    pub fn new(
        source: Arc<dyn IFileStore>,
        destination: Arc<dyn IFileStore>,
        config: &Config,
    ) -> Self {
        Self {
            source,
            destination,
            limiter: Arc::new(TransferRateLimiter::from_config(&config.rate_limits)),
            retry: RetryPolicy::from_config(&config.retry),
            settings: EngineSettings::from_config(config),
            repository: None,
            jobs: DashMap::new(),
        }
    }

    /// Persists jobs to `repository`
    pub fn with_repository(mut self, repository: Arc<dyn IJobRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the limiter; pass an `Arc` to share it with store adapters
    pub fn with_rate_limiter(mut self, limiter: impl Into<Arc<TransferRateLimiter>>) -> Self {
        self.limiter = limiter.into();
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Enumerates the source tree below `root`
    pub async fn snapshot(&self, root: &RemotePath) -> Result<Snapshot, SyncError> {
        let snapshot = walk_tree(self.source.as_ref(), root, TreeSide::Source, &self.limiter).await?;
        Ok(snapshot)
    }

    /// Computes the operations a sync would run, without running them
    pub async fn plan(
        &self,
        source: &Snapshot,
        destination_root: &RemotePath,
        options: &SyncOptions,
    ) -> Result<Vec<SyncOperation>, SyncError> {
        let destination = walk_tree(
            self.destination.as_ref(),
            destination_root,
            TreeSide::Destination,
            &self.limiter,
        )
        .await?;
        let diff_options = DiffOptions {
            delete_extraneous: options.delete_extraneous,
            mtime_tolerance: self.settings.mtime_tolerance,
        };
        Ok(diff(source, &destination, &diff_options)?)
    }

    /// Registers a sync job and starts it in the background.
    ///
    /// Returns as soon as the job is queued; progress is observed through
    /// [`get_job_status`](Self::get_job_status) or [`subscribe`](Self::subscribe).
    #[instrument(skip_all, fields(source_root = %source.root, destination_root = %destination_root))]
    pub fn submit_sync(
        self: &Arc<Self>,
        source: Snapshot,
        destination_root: RemotePath,
        options: SyncOptions,
    ) -> JobId {
        let job = SyncJob::new(source.root.clone(), destination_root.clone(), options.clone());
        let job_id = *job.id();
        let tracker = Arc::new(JobTracker::new(job));
        let cancel = CancellationToken::new();
        let settled = CancellationToken::new();
        self.jobs.insert(
            job_id,
            JobHandle {
                tracker: Arc::clone(&tracker),
                cancel: cancel.clone(),
                settled: settled.clone(),
            },
        );
        info!(%job_id, files = source.file_count(), "Sync job submitted");

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let _settled = settled.drop_guard();
            engine
                .run_job(source, destination_root, options, tracker, cancel)
                .await;
        });
        job_id
    }

    async fn run_job(
        &self,
        source: Snapshot,
        destination_root: RemotePath,
        options: SyncOptions,
        tracker: Arc<JobTracker>,
        cancel: CancellationToken,
    ) {
        let job_id = *tracker.snapshot().id();
        self.persist(&tracker).await;

        let planned = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            planned = self.plan(&source, &destination_root, &options) => Some(planned),
        };

        match planned {
            None => {
                if let Err(e) = tracker.cancel_unplanned() {
                    warn!(%job_id, error = %e, "Could not cancel job");
                }
            }
            Some(Err(e)) => {
                error!(%job_id, error = %e, "Planning failed");
                if let Err(e) = tracker.fail(e.to_string()) {
                    warn!(%job_id, error = %e, "Could not mark job failed");
                }
            }
            Some(Ok(operations)) => {
                info!(%job_id, operations = operations.len(), "Sync planned");
                if let Err(e) = tracker.set_total(operations.len()) {
                    error!(%job_id, error = %e, "Could not record plan");
                } else if !operations.is_empty() {
                    let executor = Arc::new(TransferExecutor::new(
                        Arc::clone(&self.source),
                        Arc::clone(&self.destination),
                        Arc::clone(&self.limiter),
                        self.settings.chunk_size,
                    ));
                    let scheduler = TransferScheduler::new(executor, self.retry.clone());
                    let concurrency = options
                        .concurrency_limit
                        .unwrap_or(self.settings.concurrency_limit);
                    let events = scheduler.run(operations, concurrency, cancel.clone());
                    tracker.consume(events).await;
                }
            }
        }

        if !tracker.is_terminal() {
            let _ = tracker.fail("Scheduler stopped before every operation reported an outcome");
        }
        self.persist(&tracker).await;
    }

    async fn persist(&self, tracker: &JobTracker) {
        let Some(repository) = &self.repository else {
            return;
        };
        let job = tracker.snapshot();
        if let Err(e) = repository.save_job(&job).await {
            warn!(job_id = %job.id(), error = %e, "Failed to persist job");
        }
    }

    /// Returns the latest snapshot of a job
    pub async fn get_job_status(&self, job_id: &JobId) -> Result<Arc<SyncJob>, SyncError> {
        if let Some(handle) = self.jobs.get(job_id) {
            return Ok(handle.tracker.snapshot());
        }
        let Some(repository) = &self.repository else {
            return Err(SyncError::JobNotFound(*job_id));
        };
        match repository.get_job(job_id).await {
            Ok(Some(job)) => Ok(Arc::new(job)),
            Ok(None) => Err(SyncError::JobNotFound(*job_id)),
            Err(e) => Err(SyncError::Repository(e)),
        }
    }

    /// Requests cancellation of a job.
    ///
    /// Tasks not yet admitted end as cancelled; in-flight uploads stop at the
    /// next chunk boundary. Cancelling a finished job is acknowledged and
    /// changes nothing.
    pub fn cancel_job(&self, job_id: &JobId) -> Result<(), SyncError> {
        let handle = self
            .jobs
            .get(job_id)
            .ok_or(SyncError::JobNotFound(*job_id))?;
        if handle.tracker.is_terminal() {
            debug!(%job_id, "Cancel requested for finished job");
        } else {
            info!(%job_id, "Cancelling job");
        }
        handle.cancel.cancel();
        Ok(())
    }

    /// Change notifications for a job held in memory
    pub fn subscribe(&self, job_id: &JobId) -> Option<watch::Receiver<Arc<SyncJob>>> {
        self.jobs.get(job_id).map(|handle| handle.tracker.subscribe())
    }

    /// Waits for a job to reach a terminal status.
    ///
    /// With a repository attached, the terminal snapshot has been saved by
    /// the time this returns.
    pub async fn wait_for_job(&self, job_id: &JobId) -> Result<Arc<SyncJob>, SyncError> {
        let (tracker, settled) = self
            .jobs
            .get(job_id)
            .map(|handle| (Arc::clone(&handle.tracker), handle.settled.clone()))
            .ok_or(SyncError::JobNotFound(*job_id))?;
        let job = tracker.wait_terminal().await;
        settled.cancelled().await;
        Ok(job)
    }

    /// Snapshots of every job held in memory, newest first
    pub fn jobs(&self) -> Vec<Arc<SyncJob>> {
        let mut jobs: Vec<Arc<SyncJob>> = self
            .jobs
            .iter()
            .map(|entry| entry.tracker.snapshot())
            .collect();
        jobs.sort_by_key(|job| std::cmp::Reverse(job.created_at()));
        jobs
    }
}
