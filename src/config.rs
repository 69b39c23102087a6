//! Run configuration for a `simbids` invocation.
//!
//! The configuration is assembled from defaults, `SIMBIDS_*` environment
//! variables and command-line arguments, validated, then written to
//! `<work_dir>/<run_uuid>/config.json` and to each participant's log directory.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::workflows::AppKind;

/// Configuration for one run of the simulated BIDS-App.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    // Inputs and outputs
    /// Root of the input BIDS dataset.
    pub bids_dir: PathBuf,
    /// Root of the derivatives dataset to write.
    pub output_dir: PathBuf,
    /// Scratch directory for run configuration and intermediate files.
    pub work_dir: PathBuf,
    /// BIDS-Apps analysis level; only `participant` is supported.
    pub analysis_level: String,

    // Workflow settings
    /// BIDS-App whose outputs are simulated.
    pub bids_app: AppKind,
    /// Participants to process, without the `sub-` prefix.
    pub participant_label: Vec<String>,
    /// Per-datatype entity filters from `--bids-filter-file`.
    pub bids_filters: Option<serde_json::Value>,
    /// Only write anatomical outputs.
    pub anat_only: bool,
    /// Fill copied images with random data instead of leaving them empty.
    pub fill_files: bool,
    pub skip_bids_validation: bool,

    // Execution settings
    /// Maximum number of participants processed concurrently.
    pub nprocs: usize,
    /// Abort remaining participants after the first failure.
    pub stop_on_first_crash: bool,
    /// Unique identifier of this run.
    pub run_uuid: String,
    /// Singularity image URI recorded in the dataset description.
    pub singularity_url: Option<String>,
    pub version: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            bids_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            work_dir: PathBuf::from("work"),
            analysis_level: "participant".to_string(),

            bids_app: AppKind::Qsiprep,
            participant_label: Vec::new(),
            bids_filters: None,
            anat_only: false,
            fill_files: false,
            skip_bids_validation: false,

            nprocs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            stop_on_first_crash: false,
            run_uuid: new_run_uuid(),
            singularity_url: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl RunConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SIMBIDS_WORK_DIR`: Working directory (default: ./work)
    /// - `SIMBIDS_NPROCS`: Maximum concurrent participants (default: available CPUs)
    /// - `SIMBIDS_SINGULARITY_URL`: Container URI recorded in `GeneratedBy`
    ///
    /// Paths are not validated here; call [`RunConfig::validate`] once the
    /// dataset paths are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Like [`RunConfig::from_env`], reading variables through `lookup`.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("SIMBIDS_WORK_DIR") {
            config.work_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("SIMBIDS_NPROCS") {
            config.nprocs = parse_env_value(&val, "SIMBIDS_NPROCS")?;
        }

        if let Some(val) = lookup("SIMBIDS_SINGULARITY_URL") {
            if !val.is_empty() {
                config.singularity_url = Some(val);
            }
        }

        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.analysis_level != "participant" {
            return Err(ConfigError::ValidationFailed(format!(
                "analysis_level must be 'participant', got '{}'",
                self.analysis_level
            )));
        }

        if self.nprocs == 0 {
            return Err(ConfigError::ValidationFailed(
                "nprocs must be greater than 0".to_string(),
            ));
        }

        // Path validation
        if !self.bids_dir.is_dir() {
            return Err(ConfigError::ValidationFailed(format!(
                "bids_dir does not exist: {}",
                self.bids_dir.display()
            )));
        }

        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "output_dir cannot be empty".to_string(),
            ));
        }

        let bids_dir = absolutize(&self.bids_dir)?;
        if absolutize(&self.output_dir)? == bids_dir {
            return Err(ConfigError::ValidationFailed(format!(
                "output_dir is the same as the input BIDS folder. Please modify the output path (suggestion: {})",
                bids_dir
                    .join("derivatives")
                    .join(format!("simbids-{}", self.version))
                    .display()
            )));
        }

        let work_dir = absolutize(&self.work_dir)?;
        if work_dir != bids_dir && work_dir.starts_with(&bids_dir) {
            return Err(ConfigError::ValidationFailed(
                "work_dir is a subdirectory of the input BIDS folder. Please modify the work path"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Selects participants against the subjects present in the dataset.
    ///
    /// With no requested labels every available subject is selected.
    /// Requested labels may carry the `sub-` prefix. The result is sorted and
    /// de-duplicated.
    pub fn resolve_participants(&mut self, available: &[String]) -> Result<(), ConfigError> {
        if self.participant_label.is_empty() {
            self.participant_label = available.to_vec();
        }

        let requested: BTreeSet<String> = self
            .participant_label
            .iter()
            .map(|l| drop_sub_prefix(l).to_string())
            .collect();
        let missing: Vec<&str> = requested
            .iter()
            .filter(|l| !available.contains(l))
            .map(|l| l.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::ValidationFailed(format!(
                "One or more participant labels were not found in the BIDS directory: {}",
                missing.join(", ")
            )));
        }

        self.participant_label = requested.into_iter().collect();
        Ok(())
    }

    /// Directory holding the copy of this configuration for one participant.
    pub fn participant_log_dir(&self, participant: &str) -> PathBuf {
        self.output_dir
            .join(format!("sub-{}", participant))
            .join("log")
            .join(&self.run_uuid)
    }

    /// Writes this configuration to `<work_dir>/<run_uuid>/config.json`.
    pub fn write_run_file(&self) -> Result<PathBuf, ConfigError> {
        let path = self.work_dir.join(&self.run_uuid).join("config.json");
        self.to_filename(&path)?;
        Ok(path)
    }

    /// Writes this configuration as pretty-printed JSON.
    pub fn to_filename(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Loads a configuration previously written by [`RunConfig::to_filename`].
    pub fn from_filename(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Builder method to set the input dataset.
    pub fn with_bids_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.bids_dir = path.into();
        self
    }

    /// Builder method to set the output dataset.
    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    /// Builder method to set the working directory.
    pub fn with_work_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.work_dir = path.into();
        self
    }

    /// Builder method to set the simulated BIDS-App.
    pub fn with_bids_app(mut self, app: AppKind) -> Self {
        self.bids_app = app;
        self
    }

    /// Builder method to set the participants.
    pub fn with_participants(mut self, labels: Vec<String>) -> Self {
        self.participant_label = labels;
        self
    }

    /// Builder method to set BIDS filters.
    pub fn with_bids_filters(mut self, filters: serde_json::Value) -> Self {
        self.bids_filters = Some(filters);
        self
    }

    /// Builder method to restrict outputs to anatomical data.
    pub fn with_anat_only(mut self, anat_only: bool) -> Self {
        self.anat_only = anat_only;
        self
    }

    /// Builder method to set concurrency.
    pub fn with_nprocs(mut self, nprocs: usize) -> Self {
        self.nprocs = nprocs;
        self
    }

    /// Builder method to enable random file contents.
    pub fn with_fill_files(mut self, fill: bool) -> Self {
        self.fill_files = fill;
        self
    }

    /// Builder method to set the container URI.
    pub fn with_singularity_url(mut self, url: impl Into<String>) -> Self {
        self.singularity_url = Some(url.into());
        self
    }
}

/// Reads a `--bids-filter-file` document.
pub fn load_bids_filters(path: &Path) -> Result<serde_json::Value, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::ValidationFailed(format!(
            "Path does not exist: <{}>",
            path.display()
        )));
    }
    let content = fs::read_to_string(path)?;
    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    if !value.is_object() {
        return Err(ConfigError::InvalidValue {
            key: "bids_filters".to_string(),
            message: "filter file must contain a JSON object".to_string(),
        });
    }
    Ok(value)
}

/// `20261019-142233_<uuid4>`: sortable by start time, unique across hosts.
pub fn new_run_uuid() -> String {
    format!(
        "{}_{}",
        chrono::Local::now().format("%Y%m%d-%H%M%S"),
        uuid::Uuid::new_v4()
    )
}

/// Removes a leading `sub-` from a participant label.
pub fn drop_sub_prefix(label: &str) -> &str {
    label.strip_prefix("sub-").unwrap_or(label)
}

fn absolutize(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
