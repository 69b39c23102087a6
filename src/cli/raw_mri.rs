//! `simbids-raw-mri`: create a raw BIDS dataset from a skeleton.

use crate::simulate::{bundled_skeleton_names, simulate_dataset, SimulateOptions};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

/// Create a BIDS dataset of empty or random-filled images from a YAML skeleton.
#[derive(Parser, Debug)]
#[command(name = "simbids-raw-mri")]
#[command(about = "Create a BIDS skeleton from raw MRI data")]
#[command(version)]
pub struct RawMriCli {
    /// Directory the dataset is created in (as `<bids_dir>/simbids`).
    pub bids_dir: PathBuf,

    /// Bundled skeleton name (e.g. multi_ses_qsiprep.yaml) or path to a YAML skeleton.
    pub config_file: String,

    /// Fill the images with random data.
    #[arg(long)]
    pub fill_files: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

/// Runs `simbids-raw-mri` and returns the created dataset directory.
pub fn run_raw_mri(cli: &RawMriCli) -> anyhow::Result<PathBuf> {
    let options = SimulateOptions::default().with_fill_files(cli.fill_files);
    let dataset = simulate_dataset(&cli.bids_dir, &cli.config_file, &options).map_err(|e| {
        anyhow::anyhow!(
            "{} (bundled skeletons: {})",
            e,
            bundled_skeleton_names().join(", ")
        )
    })?;
    info!(dataset = %dataset.display(), "Created simulated BIDS dataset");
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::tempdir;

    #[test]
    fn test_cli_parses() {
        RawMriCli::command().debug_assert();
    }

    #[test]
    fn test_run_raw_mri() {
        let dir = tempdir().expect("Failed to create temp dir");
        let cli = RawMriCli::try_parse_from([
            "simbids-raw-mri",
            dir.path().to_str().expect("path is UTF-8"),
            "single_ses_qsiprep.yaml",
        ])
        .expect("should parse");
        assert!(!cli.fill_files);

        let dataset = run_raw_mri(&cli).expect("dataset should be created");
        assert!(dataset
            .join("sub-02/ses-01/anat/sub-02_ses-01_T2w.nii.gz")
            .is_file());
    }

    #[test]
    fn test_unknown_skeleton_lists_bundled() {
        let dir = tempdir().expect("Failed to create temp dir");
        let cli = RawMriCli::try_parse_from([
            "simbids-raw-mri",
            dir.path().to_str().expect("path is UTF-8"),
            "missing.yaml",
        ])
        .expect("should parse");
        let err = run_raw_mri(&cli).unwrap_err();
        assert!(err.to_string().contains("multi_ses_qsiprep.yaml"));
    }
}
