//! Jobs command - List recent sync jobs, newest first
//!
//! Can also filter by status and prune old finished jobs from the database.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use esync_core::domain::{JobStatus, SyncJob};
use esync_core::ports::IJobRepository;
use tracing::info;

use super::job_to_json;
use crate::context::{open_repository, CliContext};
use crate::output::{human_bytes, plural};

#[derive(Debug, Args)]
pub struct JobsCommand {
    /// Maximum number of jobs to show
    #[arg(long, default_value_t = 20)]
    pub limit: u32,

    /// Only show jobs with this status (e.g. failed, completed_with_errors)
    #[arg(long)]
    pub status: Option<JobStatus>,

    /// Delete finished jobs created more than this many days ago, then list
    #[arg(long, value_name = "DAYS")]
    pub prune_older_than: Option<u32>,
}

impl JobsCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = ctx.formatter();

        let config = ctx.load_config()?;
        let Some(repository) = open_repository(&config.persistence).await? else {
            anyhow::bail!("Job persistence is disabled (persistence.enabled: false)");
        };

        if let Some(days) = self.prune_older_than {
            let cutoff = prune_cutoff(Utc::now(), days);
            let removed = repository
                .prune_finished_before(cutoff)
                .await
                .context("Failed to prune job database")?;
            info!(days, removed, "Pruned job database");
            if !ctx.is_json() {
                formatter.info(&format!(
                    "Removed {} finished before {}",
                    plural(removed as usize, "job"),
                    cutoff.format("%Y-%m-%d %H:%M")
                ));
            }
        }

        let jobs = match self.status {
            Some(status) => repository
                .list_jobs_with_status(status, self.limit)
                .await
                .context("Failed to query job database")?,
            None => repository
                .list_jobs(self.limit)
                .await
                .context("Failed to query job database")?,
        };

        if ctx.is_json() {
            let list: Vec<_> = jobs.iter().map(job_to_json).collect();
            formatter.print_json(&serde_json::Value::Array(list));
            return Ok(());
        }

        if jobs.is_empty() {
            match self.status {
                Some(status) => formatter.info(&format!("No {status} jobs recorded.")),
                None => formatter.info("No jobs recorded yet. Run 'esync sync' first."),
            }
            return Ok(());
        }

        formatter.success(&format!("{} most recent job(s)", jobs.len()));
        for job in &jobs {
            formatter.info(&job_row(job));
        }
        Ok(())
    }
}

fn prune_cutoff(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now - chrono::Duration::days(i64::from(days))
}

fn job_row(job: &SyncJob) -> String {
    format!(
        "{}  {}  {:<21}  {:>5}/{:<5}  {:>10}  {} -> {}",
        job.id(),
        job.created_at().format("%Y-%m-%d %H:%M"),
        job.status().as_str(),
        job.completed_operations(),
        job.total_operations(),
        human_bytes(job.bytes_transferred()),
        job.source_root(),
        job.destination_root(),
    )
}

#[cfg(test)]
mod tests {
    use esync_core::domain::{RemotePath, SyncOptions};

    use super::*;

    #[test]
    fn test_prune_cutoff() {
        let now = Utc::now();
        assert_eq!(prune_cutoff(now, 0), now);
        assert_eq!(now - prune_cutoff(now, 30), chrono::Duration::days(30));
    }

    #[test]
    fn test_job_row_contains_roots_and_status() {
        let job = SyncJob::new(
            RemotePath::new("/Shared/Finance".to_string()).unwrap(),
            RemotePath::new("/Finance".to_string()).unwrap(),
            SyncOptions::default(),
        );
        let row = job_row(&job);
        assert!(row.starts_with(&job.id().to_string()));
        assert!(row.contains("queued"));
        assert!(row.ends_with("/Shared/Finance -> /Finance"));
    }
}
