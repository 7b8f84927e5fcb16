pub mod completions;
pub mod config;
pub mod jobs;
pub mod status;
pub mod sync;

use esync_core::domain::{OutcomeStatus, SyncJob};

use crate::output::{human_bytes, plural, OutputFormatter};

/// Full job snapshot plus the derived counters scripts usually want
pub(crate) fn job_to_json(job: &SyncJob) -> serde_json::Value {
    let mut value = serde_json::to_value(job).unwrap_or_default();
    if let Some(map) = value.as_object_mut() {
        map.insert("succeeded".into(), job.succeeded_count().into());
        map.insert("skipped".into(), job.skipped_count().into());
        map.insert("failed".into(), job.failed_count().into());
        map.insert("cancelled".into(), job.cancelled_count().into());
        map.insert("bytes_transferred".into(), job.bytes_transferred().into());
        map.insert("progress_percent".into(), job.progress_percent().into());
    }
    value
}

/// One-line progress summary
pub(crate) fn progress_line(job: &SyncJob) -> String {
    format!(
        "{}: {}/{} operations ({:.0}%), {} transferred",
        job.status(),
        job.completed_operations(),
        job.total_operations(),
        job.progress_percent(),
        human_bytes(job.bytes_transferred()),
    )
}

/// Human-readable report of a job and its failed files
pub(crate) fn print_job_report(formatter: &dyn OutputFormatter, job: &SyncJob) {
    formatter.success(&format!("Job {} {}", job.id(), job.status()));
    formatter.info(&format!(
        "{} -> {}",
        job.source_root(),
        job.destination_root()
    ));
    formatter.info(&format!(
        "Created:     {}",
        job.created_at().format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(duration) = job.duration() {
        let ms = duration.num_milliseconds().max(0);
        let shown = if ms >= 1000 {
            format!("{:.1}s", ms as f64 / 1000.0)
        } else {
            format!("{ms}ms")
        };
        formatter.info(&format!("Duration:    {shown}"));
    }
    formatter.info(&format!(
        "Operations:  {}/{}",
        job.completed_operations(),
        job.total_operations()
    ));
    formatter.info(&format!(
        "Succeeded:   {}  Skipped: {}  Failed: {}  Cancelled: {}",
        job.succeeded_count(),
        job.skipped_count(),
        job.failed_count(),
        job.cancelled_count()
    ));
    formatter.info(&format!(
        "Transferred: {}",
        human_bytes(job.bytes_transferred())
    ));

    if let Some(error) = job.error() {
        formatter.error(error);
    }

    let failures: Vec<_> = job
        .outcomes()
        .iter()
        .filter(|o| o.status == OutcomeStatus::PermanentlyFailed)
        .collect();
    if !failures.is_empty() {
        formatter.warn(&format!("{} failed:", plural(failures.len(), "file")));
        for outcome in failures {
            formatter.info(&format!(
                "  - {} ({}, {}): {}",
                outcome.path,
                outcome.kind,
                plural(outcome.attempts as usize, "attempt"),
                outcome.message.as_deref().unwrap_or("unknown error")
            ));
        }
    }
}
