//! Integration tests for SqliteJobRepository
//!
//! Each test opens a fresh in-memory database, except the persistence test
//! which uses a file in a temporary directory.

use chrono::{Duration, Utc};

use esync_cache::{DatabasePool, SqliteJobRepository};
use esync_core::domain::{
    FileRecord, JobId, JobStatus, OutcomeStatus, RemotePath, SyncJob, SyncOperation, SyncOptions,
    TaskOutcome, TransferTask,
};
use esync_core::ports::IJobRepository;

// ============================================================================
// Test helpers
// ============================================================================

async fn setup() -> SqliteJobRepository {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    SqliteJobRepository::new(pool.pool().clone())
}

fn path(p: &str) -> RemotePath {
    RemotePath::new(p.to_string()).unwrap()
}

fn new_job() -> SyncJob {
    SyncJob::new(path("/Shared"), path("/Documents"), SyncOptions::default())
}

fn create_task(sequence: usize, name: &str) -> TransferTask {
    let source = FileRecord::file(path(&format!("/Shared/{name}")), 10, Utc::now());
    let mut task = TransferTask::new(
        sequence,
        SyncOperation::Create {
            source,
            destination: path(&format!("/Documents/{name}")),
        },
    );
    task.begin_attempt();
    task
}

// ============================================================================
// save_job / get_job
// ============================================================================

#[tokio::test]
async fn test_save_and_get_roundtrip() {
    let repo = setup().await;

    let mut job = new_job();
    job.set_total_operations(2).unwrap();
    job.record_outcome(TaskOutcome::succeeded(&create_task(0, "a.txt"), 10))
        .unwrap();
    job.record_outcome(TaskOutcome::permanently_failed(
        &create_task(1, "b.txt"),
        "403 Forbidden",
    ))
    .unwrap();
    repo.save_job(&job).await.unwrap();

    let loaded = repo.get_job(job.id()).await.unwrap().expect("job saved");
    assert_eq!(loaded, job);
    assert_eq!(loaded.status(), JobStatus::CompletedWithErrors);
    assert_eq!(loaded.outcomes().len(), 2);
    assert_eq!(loaded.outcomes()[1].status, OutcomeStatus::PermanentlyFailed);
    assert_eq!(loaded.outcomes()[1].message.as_deref(), Some("403 Forbidden"));
    assert_eq!(loaded.bytes_transferred(), 10);
}

#[tokio::test]
async fn test_get_missing_job() {
    let repo = setup().await;
    assert!(repo.get_job(&JobId::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_save_replaces_previous_snapshot() {
    let repo = setup().await;

    let mut job = new_job();
    repo.save_job(&job).await.unwrap();

    job.set_total_operations(1).unwrap();
    job.record_outcome(TaskOutcome::succeeded(&create_task(0, "a.txt"), 10))
        .unwrap();
    repo.save_job(&job).await.unwrap();

    let loaded = repo.get_job(job.id()).await.unwrap().unwrap();
    assert_eq!(loaded.status(), JobStatus::Completed);
    assert_eq!(loaded.completed_operations(), 1);
    assert_eq!(repo.list_jobs(10).await.unwrap().len(), 1);
}

// ============================================================================
// list_jobs
// ============================================================================

#[tokio::test]
async fn test_list_jobs_newest_first_with_limit() {
    let repo = setup().await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let job = new_job();
        ids.push(job.id().clone());
        repo.save_job(&job).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let jobs = repo.list_jobs(2).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].id(), &ids[2]);
    assert_eq!(jobs[1].id(), &ids[1]);

    assert_eq!(repo.list_jobs(10).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_list_jobs_empty() {
    let repo = setup().await;
    assert!(repo.list_jobs(5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_jobs_with_status() {
    let repo = setup().await;

    let queued = new_job();
    repo.save_job(&queued).await.unwrap();

    let mut failed = new_job();
    failed.fail("source listing failed").unwrap();
    repo.save_job(&failed).await.unwrap();

    let jobs = repo
        .list_jobs_with_status(JobStatus::Failed, 10)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id(), failed.id());
    assert_eq!(jobs[0].error(), Some("source listing failed"));
}

#[tokio::test]
async fn test_prune_keeps_active_jobs() {
    let repo = setup().await;

    let running = new_job();
    repo.save_job(&running).await.unwrap();

    let mut done = new_job();
    done.set_total_operations(0).unwrap();
    repo.save_job(&done).await.unwrap();

    let removed = repo
        .prune_finished_before(Utc::now() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(repo.get_job(done.id()).await.unwrap().is_none());
    assert!(repo.get_job(running.id()).await.unwrap().is_some());
}

// ============================================================================
// File-backed pool
// ============================================================================

#[tokio::test]
async fn test_jobs_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("jobs.db");

    let job = new_job();
    {
        let pool = DatabasePool::new(&db_path).await.unwrap();
        let repo = SqliteJobRepository::new(pool.pool().clone());
        repo.save_job(&job).await.unwrap();
        pool.close().await;
    }

    let pool = DatabasePool::new(&db_path).await.unwrap();
    let repo = SqliteJobRepository::new(pool.pool().clone());
    let loaded = repo.get_job(job.id()).await.unwrap().unwrap();
    assert_eq!(loaded.id(), job.id());
    assert_eq!(loaded.status(), JobStatus::Queued);
}
