//! Transfer scheduler
//!
//! Runs a job's operations on a bounded pool of workers and reports every
//! admission and terminal outcome as a [`TaskEvent`].
//!
//! ## Phases
//!
//! Creates and updates run first. Deletes run only after every transfer has
//! reached a terminal outcome, in the deepest-first order the diff produced.
//! Skips need no work and are reported as soon as the run starts.
//!
//! ## Retries and cancellation
//!
//! A transiently failed task is re-queued after its backoff delay by a
//! detached sleeper, so it never holds a worker slot while waiting. Once the
//! job's token is cancelled, workers stop taking new tasks; everything still
//! queued or sleeping is reported as cancelled, and in-flight uploads stop at
//! their next chunk boundary.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use esync_core::domain::{OperationKind, RemotePath, SyncOperation, TaskOutcome, TransferTask};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executor::{TransferError, TransferExecutor};
use crate::retry::{classify, FailureClass, RetryDecision, RetryPolicy};
use crate::SyncError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Progress notification sent to the job tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// A worker started an attempt
    Admitted {
        sequence: usize,
        path: RemotePath,
        attempt: u32,
    },
    /// A task reached its terminal outcome
    Finished(TaskOutcome),
}

/// Schedules transfer tasks on a bounded worker pool
pub struct TransferScheduler {
    executor: Arc<TransferExecutor>,
    retry: RetryPolicy,
}

impl TransferScheduler {
    pub fn new(executor: Arc<TransferExecutor>, retry: RetryPolicy) -> Self {
        Self { executor, retry }
    }

    /// Starts executing `operations` with at most `concurrency_limit` tasks
    /// in flight and returns the event stream.
    ///
    /// The stream ends once every operation has produced exactly one
    /// `Finished` event.
    pub fn run(
        &self,
        operations: Vec<SyncOperation>,
        concurrency_limit: usize,
        cancel: CancellationToken,
    ) -> mpsc::UnboundedReceiver<TaskEvent> {
        let (events, rx) = mpsc::unbounded_channel();

        let mut transfers = Vec::new();
        let mut deletes = Vec::new();
        for (sequence, operation) in operations.into_iter().enumerate() {
            let task = TransferTask::new(sequence, operation);
            match task.operation().kind() {
                OperationKind::Skip => {
                    let _ = events.send(TaskEvent::Finished(TaskOutcome::skipped(&task)));
                }
                OperationKind::Delete => deletes.push(task),
                OperationKind::Create | OperationKind::Update => transfers.push(task),
            }
        }

        let executor = Arc::clone(&self.executor);
        let retry = self.retry.clone();
        let workers = concurrency_limit.max(1);
        info!(
            transfers = transfers.len(),
            deletes = deletes.len(),
            workers,
            "Scheduling transfer tasks"
        );

        tokio::spawn(async move {
            for (phase, tasks) in [("transfer", transfers), ("delete", deletes)] {
                if tasks.is_empty() {
                    continue;
                }
                let pool = Pool::new(
                    Arc::clone(&executor),
                    retry.clone(),
                    events.clone(),
                    cancel.clone(),
                    tasks,
                );
                pool.run(workers).await;
                debug!(phase, "Phase finished");
            }
        });

        rx
    }
}

/// Worker pool for one phase
struct Pool {
    executor: Arc<TransferExecutor>,
    retry: RetryPolicy,
    events: mpsc::UnboundedSender<TaskEvent>,
    cancel: CancellationToken,
    /// Taken when the phase closes; retries that find it gone are cancelled
    queue_tx: Mutex<Option<mpsc::UnboundedSender<TransferTask>>>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<TransferTask>>,
    /// Tasks without a terminal outcome yet
    outstanding: AtomicUsize,
}

impl Pool {
    fn new(
        executor: Arc<TransferExecutor>,
        retry: RetryPolicy,
        events: mpsc::UnboundedSender<TaskEvent>,
        cancel: CancellationToken,
        tasks: Vec<TransferTask>,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let outstanding = tasks.len();
        for task in tasks {
            // The receiver is alive, so this cannot fail
            let _ = queue_tx.send(task);
        }
        Arc::new(Self {
            executor,
            retry,
            events,
            cancel,
            queue_tx: Mutex::new(Some(queue_tx)),
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            outstanding: AtomicUsize::new(outstanding),
        })
    }

    /// Runs the phase to completion
    async fn run(self: Arc<Self>, workers: usize) {
        let outstanding = self.outstanding.load(Ordering::Acquire);
        let mut set = JoinSet::new();
        for id in 0..workers.min(outstanding) {
            set.spawn(Arc::clone(&self).worker(id));
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Transfer worker stopped abnormally");
                // Its task never reports, so the queue would never close itself
                self.close_queue();
            }
        }

        // Anything still queued was never admitted
        self.close_queue();
        let mut leftovers = Vec::new();
        {
            let mut rx = self.queue_rx.lock().await;
            while let Ok(task) = rx.try_recv() {
                leftovers.push(task);
            }
        }
        for task in leftovers {
            self.cancel_task(task).await;
        }
    }

    async fn worker(self: Arc<Self>, id: usize) {
        debug!(worker = id, "Worker started");
        loop {
            let next = {
                let mut rx = self.queue_rx.lock().await;
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    task = rx.recv() => task,
                }
            };
            let Some(task) = next else {
                break;
            };
            self.process(task).await;
        }
        debug!(worker = id, "Worker stopped");
    }

    async fn process(self: &Arc<Self>, mut task: TransferTask) {
        task.begin_attempt();
        self.emit(TaskEvent::Admitted {
            sequence: task.sequence(),
            path: task.operation().destination().clone(),
            attempt: task.attempt(),
        });

        match self.executor.execute(&mut task, &self.cancel).await {
            Ok(report) => {
                task.mark_succeeded();
                self.finish(TaskOutcome::succeeded(&task, report.bytes_transferred));
            }
            Err(TransferError::Cancelled) => {
                self.finish(TaskOutcome::cancelled(&task));
            }
            Err(err) => match self.retry.decide(task.attempt(), &err) {
                RetryDecision::RetryAfter(delay) => {
                    task.mark_failed(err.to_string());
                    let failure = SyncError::TransientTransfer {
                        attempt: task.attempt(),
                        source: err,
                    };
                    warn!(
                        path = %task.operation().destination(),
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "Transfer attempt failed, retrying"
                    );
                    self.schedule_retry(task, delay);
                }
                RetryDecision::GiveUp => {
                    let reason = match classify(&err) {
                        FailureClass::Transient => {
                            format!("Retries exhausted after {} attempt(s): {err}", task.attempt())
                        }
                        FailureClass::Permanent | FailureClass::Cancelled => {
                            SyncError::PermanentTransfer {
                                attempts: task.attempt(),
                                source: err,
                            }
                            .to_string()
                        }
                    };
                    warn!(
                        path = %task.operation().destination(),
                        attempts = task.attempt(),
                        %reason,
                        "Transfer failed permanently"
                    );
                    self.executor.abandon(&mut task).await;
                    task.mark_permanently_failed(reason.clone());
                    self.finish(TaskOutcome::permanently_failed(&task, reason));
                }
            },
        }
    }

    fn schedule_retry(self: &Arc<Self>, task: TransferTask, delay: std::time::Duration) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = pool.cancel.cancelled() => pool.cancel_task(task).await,
                _ = tokio::time::sleep(delay) => pool.requeue(task).await,
            }
        });
    }

    async fn requeue(&self, task: TransferTask) {
        let rejected = {
            let guard = lock(&self.queue_tx);
            match guard.as_ref() {
                Some(tx) => tx.send(task).err().map(|e| e.0),
                None => Some(task),
            }
        };
        if let Some(task) = rejected {
            self.cancel_task(task).await;
        }
    }

    /// Reports a never-completed task as cancelled, releasing its upload session
    async fn cancel_task(&self, mut task: TransferTask) {
        self.executor.abandon(&mut task).await;
        self.finish(TaskOutcome::cancelled(&task));
    }

    fn finish(&self, outcome: TaskOutcome) {
        self.emit(TaskEvent::Finished(outcome));
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.close_queue();
        }
    }

    fn close_queue(&self) {
        lock(&self.queue_tx).take();
    }

    fn emit(&self, event: TaskEvent) {
        // The tracker may already be gone if the engine shut down
        let _ = self.events.send(event);
    }
}
