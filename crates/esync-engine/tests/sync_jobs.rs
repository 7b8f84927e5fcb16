//! Integration tests: SyncEngine job API over in-memory stores
//!
//! Each test builds a source and a destination `MemoryStore`, submits a job
//! through the public API and waits for its terminal snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use esync_core::config::Config;
use esync_core::domain::{
    JobId, JobStatus, OperationKind, OutcomeStatus, RemotePath, SyncJob, SyncOptions,
};
use esync_core::ports::{IJobRepository, StoreError};
use esync_engine::memory::{FaultOp, MemoryStore};
use esync_engine::rate_limit::TransferRateLimiter;
use esync_engine::retry::RetryPolicy;
use esync_engine::{EngineSettings, SyncEngine, SyncError};

fn path(p: &str) -> RemotePath {
    RemotePath::new(p.to_string()).unwrap()
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn engine(source: &Arc<MemoryStore>, destination: &Arc<MemoryStore>) -> SyncEngine {
    SyncEngine::new(source.clone(), destination.clone(), &Config::default())
        .with_retry_policy(RetryPolicy::immediate(3))
        .with_rate_limiter(TransferRateLimiter::unlimited())
        .with_settings(EngineSettings {
            concurrency_limit: 4,
            chunk_size: 16,
            mtime_tolerance: chrono::Duration::seconds(2),
        })
}

/// Runs one full sync and returns the terminal job
async fn sync(engine: &Arc<SyncEngine>, source_root: &str, destination_root: &str, options: SyncOptions) -> Arc<SyncJob> {
    let snapshot = engine.snapshot(&path(source_root)).await.unwrap();
    let job_id = engine.submit_sync(snapshot, path(destination_root), options);
    engine.wait_for_job(&job_id).await.unwrap()
}

#[derive(Default)]
struct RecordingRepository {
    jobs: Mutex<HashMap<JobId, SyncJob>>,
    saves: Mutex<Vec<JobStatus>>,
}

#[async_trait::async_trait]
impl IJobRepository for RecordingRepository {
    async fn save_job(&self, job: &SyncJob) -> anyhow::Result<()> {
        self.saves.lock().unwrap().push(job.status());
        self.jobs.lock().unwrap().insert(*job.id(), job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> anyhow::Result<Option<SyncJob>> {
        Ok(self.jobs.lock().unwrap().get(id).cloned())
    }

    async fn list_jobs(&self, limit: u32) -> anyhow::Result<Vec<SyncJob>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[tokio::test]
async fn test_sync_with_deletion() {
    let source = Arc::new(MemoryStore::new("egnyte"));
    let destination = Arc::new(MemoryStore::new("sharepoint"));
    source.insert_file("/Shared/a.txt", vec![b'a'; 100], at(0)).unwrap();
    source.insert_file("/Shared/unchanged.txt", b"same".to_vec(), at(0)).unwrap();
    destination.insert_file("/Docs/unchanged.txt", b"same".to_vec(), at(0)).unwrap();
    destination.insert_file("/Docs/old.txt", b"stale".to_vec(), at(0)).unwrap();

    let engine = Arc::new(engine(&source, &destination));
    let options = SyncOptions {
        delete_extraneous: true,
        ..SyncOptions::default()
    };
    let job = sync(&engine, "/Shared", "/Docs", options).await;

    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(job.total_operations(), 3);
    assert_eq!(job.completed_operations(), 3);
    assert_eq!(job.succeeded_count(), 2);
    assert_eq!(job.skipped_count(), 1);
    assert_eq!(job.bytes_transferred(), 100);
    assert!((job.progress_percent() - 100.0).abs() < f64::EPSILON);

    assert_eq!(
        destination.file_paths(),
        vec!["/Docs/a.txt".to_string(), "/Docs/unchanged.txt".to_string()]
    );
    let delete = job
        .outcomes()
        .iter()
        .find(|o| o.kind == OperationKind::Delete)
        .unwrap();
    assert_eq!(delete.path.as_str(), "/Docs/old.txt");
}

#[tokio::test]
async fn test_second_run_is_all_skips() {
    let source = Arc::new(MemoryStore::new("egnyte"));
    let destination = Arc::new(MemoryStore::new("sharepoint"));
    source.insert_file("/Shared/a.txt", vec![1; 40], at(0)).unwrap();
    source.insert_file("/Shared/Reports/q1.xlsx", vec![2; 33], at(10)).unwrap();
    source.insert_file("/Shared/Reports/2024/q2.xlsx", vec![3; 5], at(20)).unwrap();

    let engine = Arc::new(engine(&source, &destination));
    let first = sync(&engine, "/Shared", "/Docs", SyncOptions::default()).await;
    assert_eq!(first.status(), JobStatus::Completed);
    assert_eq!(first.succeeded_count(), 3);
    let uploads_after_first = destination.stats().completed_uploads;

    let second = sync(&engine, "/Shared", "/Docs", SyncOptions::default()).await;
    assert_eq!(second.status(), JobStatus::Completed);
    assert_eq!(second.skipped_count(), 3);
    assert_eq!(second.bytes_transferred(), 0);
    assert_eq!(destination.stats().completed_uploads, uploads_after_first);
}

#[tokio::test]
async fn test_interrupted_upload_resumes_without_resending() {
    let source = Arc::new(MemoryStore::new("egnyte"));
    let destination = Arc::new(MemoryStore::new("sharepoint"));
    source.insert_file("/Shared/big.bin", vec![9; 48], at(0)).unwrap();
    // Three 16-byte chunks; the second one fails once
    destination.inject_chunk_fault(16, StoreError::Network("connection reset".into()));

    let engine = Arc::new(engine(&source, &destination));
    let job = sync(&engine, "/Shared", "/Docs", SyncOptions::default()).await;

    assert_eq!(job.status(), JobStatus::Completed);
    let outcome = &job.outcomes()[0];
    assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(
        destination.stats().upload_offsets("/Docs/big.bin"),
        vec![0, 16, 16, 32]
    );
    assert_eq!(destination.file_data("/Docs/big.bin").unwrap(), vec![9; 48]);
}

#[tokio::test]
async fn test_partial_failure_completes_with_errors() {
    let source = Arc::new(MemoryStore::new("egnyte"));
    let destination = Arc::new(MemoryStore::new("sharepoint"));
    for i in 0..10 {
        source.insert_file(&format!("/Shared/f{i}.txt"), vec![i as u8; 10], at(0)).unwrap();
    }
    for i in 7..10 {
        destination.inject_fault(
            FaultOp::BeginUpload,
            Some(&format!("/Docs/f{i}.txt")),
            StoreError::Forbidden("access denied".into()),
            u32::MAX,
        );
    }

    let engine = Arc::new(engine(&source, &destination));
    let job = sync(&engine, "/Shared", "/Docs", SyncOptions::default()).await;

    assert_eq!(job.status(), JobStatus::CompletedWithErrors);
    assert_eq!(job.succeeded_count(), 7);
    assert_eq!(job.failed_count(), 3);
    for outcome in job.outcomes().iter().filter(|o| o.is_failure()) {
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.message.as_deref().unwrap().contains("Forbidden"));
    }
}

#[tokio::test]
async fn test_cancel_mid_job() {
    let source = Arc::new(MemoryStore::new("egnyte"));
    let destination = Arc::new(MemoryStore::new("sharepoint").with_latency(Duration::from_millis(10)));
    for i in 0..8 {
        source.insert_file(&format!("/Shared/f{i}.bin"), vec![0; 160], at(0)).unwrap();
    }

    let engine = Arc::new(engine(&source, &destination));
    let snapshot = engine.snapshot(&path("/Shared")).await.unwrap();
    let job_id = engine.submit_sync(
        snapshot,
        path("/Docs"),
        SyncOptions {
            concurrency_limit: Some(2),
            ..SyncOptions::default()
        },
    );

    tokio::time::sleep(Duration::from_millis(40)).await;
    engine.cancel_job(&job_id).unwrap();
    let job = engine.wait_for_job(&job_id).await.unwrap();

    assert_eq!(job.status(), JobStatus::Cancelled);
    assert_eq!(job.completed_operations(), job.total_operations());
    assert!(job.cancelled_count() > 0);
    assert_eq!(destination.stats().open_sessions, 0);

    // Acknowledged again, nothing changes
    engine.cancel_job(&job_id).unwrap();
    assert_eq!(engine.get_job_status(&job_id).await.unwrap().status(), JobStatus::Cancelled);
}

#[tokio::test]
async fn test_unlistable_destination_fails_job() {
    let source = Arc::new(MemoryStore::new("egnyte"));
    let destination = Arc::new(MemoryStore::new("sharepoint"));
    source.insert_file("/Shared/a.txt", b"a".to_vec(), at(0)).unwrap();
    destination.insert_folder("/Docs").unwrap();
    destination.inject_fault(
        FaultOp::List,
        Some("/Docs"),
        StoreError::Unauthorized("token expired".into()),
        u32::MAX,
    );

    let engine = Arc::new(engine(&source, &destination));
    let job = sync(&engine, "/Shared", "/Docs", SyncOptions::default()).await;

    assert_eq!(job.status(), JobStatus::Failed);
    assert!(job.error().unwrap().contains("token expired"));
    assert!(job.outcomes().is_empty());
}

#[tokio::test]
async fn test_empty_source_completes_immediately() {
    let source = Arc::new(MemoryStore::new("egnyte"));
    let destination = Arc::new(MemoryStore::new("sharepoint"));
    source.insert_folder("/Shared").unwrap();

    let engine = Arc::new(engine(&source, &destination));
    let job = sync(&engine, "/Shared", "/Docs", SyncOptions::default()).await;
    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(job.total_operations(), 0);
}

#[tokio::test]
async fn test_missing_source_root_is_a_diff_error() {
    let source = Arc::new(MemoryStore::new("egnyte"));
    let destination = Arc::new(MemoryStore::new("sharepoint"));
    let engine = engine(&source, &destination);
    let err = engine.snapshot(&path("/Nowhere")).await.unwrap_err();
    assert!(matches!(err, SyncError::Diff(_)));
}

#[tokio::test]
async fn test_unknown_job() {
    let source = Arc::new(MemoryStore::new("egnyte"));
    let destination = Arc::new(MemoryStore::new("sharepoint"));
    let engine = engine(&source, &destination);
    let unknown = JobId::new();

    assert!(matches!(
        engine.get_job_status(&unknown).await,
        Err(SyncError::JobNotFound(_))
    ));
    assert!(matches!(engine.cancel_job(&unknown), Err(SyncError::JobNotFound(_))));
    assert!(engine.subscribe(&unknown).is_none());
}

#[tokio::test]
async fn test_status_falls_back_to_repository() {
    let source = Arc::new(MemoryStore::new("egnyte"));
    let destination = Arc::new(MemoryStore::new("sharepoint"));
    source.insert_file("/Shared/a.txt", b"hello".to_vec(), at(0)).unwrap();
    let repository = Arc::new(RecordingRepository::default());

    let first = Arc::new(engine(&source, &destination).with_repository(repository.clone()));
    let job = sync(&first, "/Shared", "/Docs", SyncOptions::default()).await;
    let job_id = *job.id();

    // Persistence of the terminal snapshot happens right after resolution
    tokio::time::sleep(Duration::from_millis(20)).await;
    let saves = repository.saves.lock().unwrap().clone();
    assert_eq!(saves.first(), Some(&JobStatus::Queued));
    assert_eq!(saves.last(), Some(&JobStatus::Completed));

    let restarted = engine(&source, &destination).with_repository(repository.clone());
    let restored = restarted.get_job_status(&job_id).await.unwrap();
    assert_eq!(restored.status(), JobStatus::Completed);
    assert_eq!(restored.outcomes().len(), 1);
}

#[tokio::test]
async fn test_snapshot_updates_are_observable() {
    let source = Arc::new(MemoryStore::new("egnyte"));
    let destination = Arc::new(MemoryStore::new("sharepoint"));
    for i in 0..3 {
        source.insert_file(&format!("/Shared/f{i}.txt"), vec![0; 8], at(0)).unwrap();
    }
    let engine = Arc::new(engine(&source, &destination));
    let snapshot = engine.snapshot(&path("/Shared")).await.unwrap();
    let job_id = engine.submit_sync(snapshot, path("/Docs"), SyncOptions::default());

    let mut rx = engine.subscribe(&job_id).unwrap();
    let done = rx.wait_for(|job| job.is_terminal()).await.unwrap().clone();
    assert_eq!(done.status(), JobStatus::Completed);
    assert_eq!(engine.jobs().len(), 1);
}
