//! Config command - View and manage esync configuration
//!
//! Provides the `esync config` CLI command which:
//! 1. Shows the effective configuration (file, defaults and environment)
//! 2. Validates the configuration file and reports field errors
//! 3. Prints the configuration file path
//! 4. Writes a starter configuration file

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use esync_core::config::{Config, Credentials};
use tracing::info;

use crate::context::CliContext;
use crate::output::{plural, OutputFormatter};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
    /// Print the configuration file path
    Path,
    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        match self {
            ConfigCommand::Show => execute_show(ctx),
            ConfigCommand::Validate => execute_validate(ctx),
            ConfigCommand::Path => execute_path(ctx),
            ConfigCommand::Init { force } => execute_init(ctx, *force),
        }
    }
}

fn execute_show(ctx: &CliContext) -> Result<()> {
    let formatter = ctx.formatter();
    let config_path = ctx.config_path();
    let config = ctx.load_config()?;
    let credentials = Credentials::from_env();

    info!(config_path = %config_path.display(), "Showing configuration");

    if ctx.is_json() {
        let json = serde_json::to_value(&config)
            .context("Failed to serialize configuration to JSON")?;
        formatter.print_json(&json);
        return Ok(());
    }

    formatter.success(&format!("Configuration ({})", config_path.display()));
    formatter.info("");
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration to YAML")?;
    for line in yaml.lines() {
        formatter.info(line);
    }
    formatter.info("");
    formatter.info(&format!(
        "EGNYTE_ACCESS_TOKEN:     {}",
        token_state(credentials.egnyte_access_token.is_some())
    ));
    formatter.info(&format!(
        "SHAREPOINT_ACCESS_TOKEN: {}",
        token_state(credentials.sharepoint_access_token.is_some())
    ));
    Ok(())
}

fn token_state(present: bool) -> &'static str {
    if present {
        "set"
    } else {
        "not set"
    }
}

fn execute_validate(ctx: &CliContext) -> Result<()> {
    let formatter = ctx.formatter();
    let config_path = ctx.config_path();

    if !config_path.exists() {
        report_validation(
            ctx,
            formatter.as_ref(),
            &config_path,
            &["Configuration file not found".to_string()],
        );
        formatter.info("Run 'esync config init' to create one.");
        anyhow::bail!("No configuration file at {}", config_path.display());
    }

    let mut config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            let message = format!("Failed to parse configuration: {e}");
            report_validation(ctx, formatter.as_ref(), &config_path, &[message]);
            anyhow::bail!("Invalid configuration file {}", config_path.display());
        }
    };
    config.apply_env_overrides();

    info!(config_path = %config_path.display(), "Validating configuration");
    let errors: Vec<String> = config.validate().iter().map(ToString::to_string).collect();
    report_validation(ctx, formatter.as_ref(), &config_path, &errors);
    if errors.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("Configuration has {}", plural(errors.len(), "error"))
    }
}

fn report_validation(
    ctx: &CliContext,
    formatter: &dyn OutputFormatter,
    config_path: &Path,
    errors: &[String],
) {
    if ctx.is_json() {
        formatter.print_json(&serde_json::json!({
            "valid": errors.is_empty(),
            "config_path": config_path.display().to_string(),
            "errors": errors,
        }));
        return;
    }

    if errors.is_empty() {
        formatter.success("Configuration is valid");
        formatter.info(&format!("File: {}", config_path.display()));
        return;
    }

    formatter.error(&format!("Configuration has {}:", plural(errors.len(), "error")));
    formatter.info(&format!("File: {}", config_path.display()));
    for error in errors {
        formatter.info(&format!("  - {error}"));
    }
}

fn execute_path(ctx: &CliContext) -> Result<()> {
    let config_path = ctx.config_path();
    if ctx.is_json() {
        ctx.formatter().print_json(&serde_json::json!({
            "config_path": config_path.display().to_string(),
            "exists": config_path.exists(),
        }));
    } else {
        println!("{}", config_path.display());
    }
    Ok(())
}

fn execute_init(ctx: &CliContext, force: bool) -> Result<()> {
    let formatter = ctx.formatter();
    let config_path = ctx.config_path();

    write_default_config(&config_path, force)?;
    info!(config_path = %config_path.display(), "Wrote default configuration");

    if ctx.is_json() {
        formatter.print_json(&serde_json::json!({
            "success": true,
            "config_path": config_path.display().to_string(),
        }));
    } else {
        formatter.success(&format!("Wrote {}", config_path.display()));
        formatter.info("Set source.domain and destination.drive_id, then run 'esync config validate'.");
    }
    Ok(())
}

fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists; use --force to overwrite",
            path.display()
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create configuration directory")?;
    }
    let yaml = serde_yaml::to_string(&Config::default()).context("Failed to serialize configuration")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
