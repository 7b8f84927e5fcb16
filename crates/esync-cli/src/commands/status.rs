//! Status command - Show one persisted sync job
//!
//! Jobs live in the engine only for the lifetime of the `esync sync`
//! process, so this reads the snapshot saved in the job database.

use anyhow::{Context, Result};
use clap::Args;
use esync_core::domain::JobId;
use esync_core::ports::IJobRepository;
use tracing::info;

use super::{job_to_json, print_job_report};
use crate::context::{open_repository, CliContext};

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Job id printed by `esync sync`
    pub job_id: String,
}

impl StatusCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = ctx.formatter();
        let job_id: JobId = self
            .job_id
            .parse()
            .with_context(|| format!("Invalid job id '{}'", self.job_id))?;

        let config = ctx.load_config()?;
        let Some(repository) = open_repository(&config.persistence).await? else {
            anyhow::bail!("Job persistence is disabled (persistence.enabled: false)");
        };

        info!(%job_id, "Looking up job");
        let Some(job) = repository
            .get_job(&job_id)
            .await
            .context("Failed to query job database")?
        else {
            anyhow::bail!("No job with id {job_id}");
        };

        if ctx.is_json() {
            formatter.print_json(&job_to_json(&job));
        } else {
            print_job_report(formatter.as_ref(), &job);
        }
        Ok(())
    }
}
