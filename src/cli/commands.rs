//! CLI command definitions for simbids.
//!
//! `simbids` follows the BIDS-Apps calling convention:
//! `simbids <bids_dir> <output_dir> participant [options]`.

use crate::config::{drop_sub_prefix, load_bids_filters, RunConfig};
use crate::workflows::{run_participants, AppKind, WorkflowContext};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Simulated BIDS-App outputs for testing downstream pipelines.
#[derive(Parser, Debug)]
#[command(name = "simbids")]
#[command(about = "Simulate the derivatives of a BIDS-App on a BIDS dataset")]
#[command(version)]
#[command(
    long_about = "simbids writes the files a BIDS-App would produce, named with BIDS entities, without running the app.\n\nExample usage:\n  simbids ./bids ./bids/derivatives/qsiprep participant --bids-app qsiprep -w ./work"
)]
pub struct Cli {
    /// Root folder of a BIDS-valid dataset (sub-XXXXX folders at the top level).
    pub bids_dir: PathBuf,

    /// Output path for the simulated derivatives and reports.
    pub output_dir: PathBuf,

    /// Processing stage to run; only "participant" is supported.
    #[arg(value_parser = ["participant"])]
    pub analysis_level: String,

    /// BIDS-App to simulate.
    #[arg(long, value_enum, default_value_t = AppKind::Qsiprep)]
    pub bids_app: AppKind,

    /// Only write the anatomical outputs.
    #[arg(long)]
    pub anat_only: bool,

    /// Space-delimited participant labels, with or without the "sub-" prefix.
    /// All subjects are processed when omitted.
    #[arg(long = "participant-label", alias = "participant_label", num_args = 1..)]
    pub participant_label: Vec<String>,

    /// JSON file of per-datatype entity filters (e.g. {"t1w": {"session": "01"}}).
    #[arg(long)]
    pub bids_filter_file: Option<PathBuf>,

    /// Assume the input dataset is BIDS compliant and skip the validation.
    #[arg(long = "skip-bids-validation", alias = "skip_bids_validation")]
    pub skip_bids_validation: bool,

    /// Maximum number of participants processed concurrently.
    #[arg(long, aliases = ["nthreads", "n-cpus", "n_cpus"])]
    pub nprocs: Option<usize>,

    /// Working directory for run configuration files.
    #[arg(short = 'w', long)]
    pub work_dir: Option<PathBuf>,

    /// Fill the simulated images with random data.
    #[arg(long)]
    pub fill_files: bool,

    /// Abort the remaining participants after the first failure.
    #[arg(long)]
    pub stop_on_first_crash: bool,

    /// Previously written run configuration; command-line values override it.
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// Increase log verbosity for each occurrence (-vv is debug, -vvv is trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log level (trace, debug, info, warn, error). Overrides -v.
    #[arg(short, long, env = "SIMBIDS_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl Cli {
    /// Tracing filter for this invocation.
    pub fn log_filter(&self) -> String {
        if let Some(level) = &self.log_level {
            return level.clone();
        }
        match self.verbose {
            0 | 1 => "info",
            2 => "debug",
            _ => "trace",
        }
        .to_string()
    }

    /// Builds the validated run configuration from environment and arguments.
    pub fn to_run_config(&self) -> anyhow::Result<RunConfig> {
        let mut config = match &self.config_file {
            Some(path) => {
                let mut config = RunConfig::from_filename(path)
                    .with_context(|| format!("Failed to load {}", path.display()))?;
                config.run_uuid = crate::config::new_run_uuid();
                info!(config = %path.display(), "Loaded previous configuration file");
                config
            }
            None => RunConfig::from_env()?,
        };

        config.bids_dir = self.bids_dir.clone();
        config.output_dir = self.output_dir.clone();
        config.analysis_level = self.analysis_level.clone();
        config.bids_app = self.bids_app;
        config.anat_only |= self.anat_only;
        config.fill_files |= self.fill_files;
        config.skip_bids_validation |= self.skip_bids_validation;
        config.stop_on_first_crash |= self.stop_on_first_crash;

        if !self.participant_label.is_empty() {
            config.participant_label = self
                .participant_label
                .iter()
                .map(|l| drop_sub_prefix(l).to_string())
                .collect();
        }
        if let Some(nprocs) = self.nprocs {
            config.nprocs = nprocs;
        }
        if let Some(work_dir) = &self.work_dir {
            config.work_dir = work_dir.clone();
        }
        if let Some(path) = &self.bids_filter_file {
            config.bids_filters = Some(load_bids_filters(path)?);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = cli.to_run_config()?;

    if !config.skip_bids_validation {
        let description = config.bids_dir.join("dataset_description.json");
        anyhow::ensure!(
            description.is_file(),
            "{} is not a BIDS dataset: missing dataset_description.json",
            config.bids_dir.display()
        );
    }

    let command = std::env::args().collect::<Vec<_>>().join(" ");
    let mut ctx = WorkflowContext::new(Arc::new(config), command)
        .context("Failed to index the input dataset")?;
    let subjects = ctx.index.subjects();
    Arc::make_mut(&mut ctx.config).resolve_participants(&subjects)?;

    let run_file = ctx.config.write_run_file()?;
    info!(
        run_uuid = %ctx.config.run_uuid,
        app = %ctx.config.bids_app,
        participants = ?ctx.config.participant_label,
        config = %run_file.display(),
        "Starting SimBIDS"
    );

    let summary = run_participants(Arc::new(ctx)).await?;
    for (participant, paths) in &summary.completed {
        info!(participant = %participant, outputs = paths.len(), "Participant finished");
    }
    if !summary.is_success() {
        for (participant, reason) in &summary.failed {
            warn!(participant = %participant, reason = %reason, "Participant failed");
        }
        let total = summary.failed.len() + summary.skipped.len() + summary.completed.len();
        anyhow::bail!(
            "SimBIDS finished with errors: {} of {} participant(s) failed, {} not started",
            summary.failed.len(),
            total,
            summary.skipped.len()
        );
    }

    info!("SimBIDS finished successfully");
    Ok(())
}
