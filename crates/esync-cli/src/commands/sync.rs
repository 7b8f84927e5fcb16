//! Sync command - Copy a source tree onto a destination tree
//!
//! Provides the `esync sync` CLI command which:
//! 1. Loads configuration and credentials, and builds both stores
//! 2. Enumerates the source tree into a snapshot
//! 3. Either prints the plan (`--dry-run`) or submits a job
//! 4. Reports progress until the job is terminal; Ctrl-C cancels it

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use esync_core::config::{Config, Credentials};
use esync_core::domain::{JobStatus, OperationKind, RemotePath, SyncOperation, SyncOptions};
use esync_engine::rate_limit::{Direction, TransferRateLimiter};
use esync_engine::SyncEngine;
use tracing::info;

use super::{job_to_json, print_job_report, progress_line};
use crate::context::{build_store, open_repository, CliContext};
use crate::output::{plural, OutputFormatter};

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Folder to copy from, in the source store
    #[arg(long, default_value = "/Shared")]
    pub source_root: String,

    /// Folder to copy into, in the destination store
    #[arg(long)]
    pub destination_root: String,

    /// Delete destination files that do not exist in the source
    #[arg(long)]
    pub delete_extraneous: bool,

    /// Parallel transfers (defaults to engine.concurrency_limit)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub concurrency: Option<u16>,

    /// Show what would be done without making changes
    #[arg(long)]
    pub dry_run: bool,

    /// Seconds between progress lines
    #[arg(long, default_value_t = 2)]
    pub progress_interval: u64,
}

impl SyncCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = ctx.formatter();

        let config = ctx.load_config()?;
        let errors = config.validate();
        if !errors.is_empty() {
            for error in &errors {
                formatter.error(&error.to_string());
            }
            anyhow::bail!(
                "Configuration has {}; run 'esync config validate'",
                plural(errors.len(), "error")
            );
        }

        let source_root = parse_root("--source-root", &self.source_root)?;
        let destination_root = parse_root("--destination-root", &self.destination_root)?;
        let options = SyncOptions {
            delete_extraneous: self.delete_extraneous,
            concurrency_limit: self.concurrency.map(usize::from),
        };

        let engine = Arc::new(self.build_engine(&config).await?);

        formatter.info(&format!("Enumerating {source_root}..."));
        let snapshot = engine
            .snapshot(&source_root)
            .await
            .with_context(|| format!("Failed to enumerate {source_root}"))?;
        info!(
            root = %source_root,
            files = snapshot.file_count(),
            bytes = snapshot.total_bytes(),
            "Source enumerated"
        );

        if self.dry_run {
            let operations = engine
                .plan(&snapshot, &destination_root, &options)
                .await
                .context("Failed to plan sync")?;
            print_plan(ctx, formatter.as_ref(), &operations);
            return Ok(());
        }

        let job_id = engine.submit_sync(snapshot, destination_root, options);
        formatter.success(&format!("Started job {job_id}"));

        let wait = engine.wait_for_job(&job_id);
        tokio::pin!(wait);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut ticker = tokio::time::interval(Duration::from_secs(self.progress_interval.max(1)));
        let mut cancelling = false;

        let job = loop {
            tokio::select! {
                job = &mut wait => break job?,
                signal = &mut ctrl_c, if !cancelling => {
                    signal.context("Failed to listen for Ctrl-C")?;
                    cancelling = true;
                    formatter.warn("Cancelling; in-flight uploads stop at the next chunk");
                    engine.cancel_job(&job_id)?;
                }
                _ = ticker.tick() => {
                    if let Ok(job) = engine.get_job_status(&job_id).await {
                        formatter.info(&progress_line(&job));
                    }
                }
            }
        };

        if ctx.is_json() {
            formatter.print_json(&job_to_json(&job));
        } else {
            print_job_report(formatter.as_ref(), &job);
        }

        match job.status() {
            JobStatus::Completed => Ok(()),
            status => anyhow::bail!("Job {job_id} finished as {status}"),
        }
    }

    async fn build_engine(&self, config: &Config) -> Result<SyncEngine> {
        let credentials = Credentials::from_env();
        // Adapters report throttles they wait out into the engine's buckets
        let limiter = Arc::new(TransferRateLimiter::from_config(&config.rate_limits));
        let source = build_store(
            "source",
            &config.source,
            &credentials,
            Some(limiter.observer(Direction::SourceRead)),
        )?;
        let destination = build_store(
            "destination",
            &config.destination,
            &credentials,
            Some(limiter.observer(Direction::DestinationWrite)),
        )?;

        let mut engine = SyncEngine::new(source, destination, config).with_rate_limiter(limiter);
        if !self.dry_run {
            if let Some(repository) = open_repository(&config.persistence).await? {
                engine = engine.with_repository(repository);
            }
        }
        Ok(engine)
    }
}

fn parse_root(flag: &str, value: &str) -> Result<RemotePath> {
    RemotePath::new(value.to_string()).with_context(|| format!("Invalid {flag} '{value}'"))
}

fn print_plan(ctx: &CliContext, formatter: &dyn OutputFormatter, operations: &[SyncOperation]) {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for op in operations {
        *counts.entry(op.kind().as_str()).or_default() += 1;
    }

    if ctx.is_json() {
        let planned: Vec<_> = operations
            .iter()
            .map(|op| {
                serde_json::json!({
                    "kind": op.kind().as_str(),
                    "destination": op.destination().as_str(),
                    "size_bytes": op.source().map(|s| s.size_bytes),
                })
            })
            .collect();
        formatter.print_json(&serde_json::json!({
            "dry_run": true,
            "counts": counts,
            "operations": planned,
        }));
        return;
    }

    formatter.success(&format!(
        "Dry run: {} planned",
        plural(operations.len(), "operation")
    ));
    for (kind, count) in &counts {
        formatter.info(&format!("{kind:<7} {count}"));
    }
    for op in operations.iter().filter(|op| op.kind() != OperationKind::Skip) {
        formatter.info(&format!("  {:<7} {}", op.kind().as_str(), op.destination()));
    }
}
