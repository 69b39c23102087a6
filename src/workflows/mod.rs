//! Participant workflows that write simulated BIDS-App derivatives.
//!
//! Each app module turns the collected data of one participant into a list of
//! [`PlannedSink`]s; [`run_participant`] writes them and [`run_participants`]
//! fans participants out over a bounded pool of blocking tasks.

pub mod qsiprep;
pub mod qsirecon;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::RunConfig;
use crate::description::{write_derivative_description, write_root_level_atlases};
use crate::error::WorkflowError;
use crate::layout::{DatasetIndex, LayoutConfig, Query, QueryValue};
use crate::simulate::{fill_files, SimulateOptions};
use crate::sink::{DerivativesSink, SinkRequest};

/// Contents written wherever an app produces a text output.
pub(crate) const TEXT_CONTENT: &str = "This is a text file.\n";

/// Simulated BIDS-Apps.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum AppKind {
    Qsiprep,
    Qsirecon,
}

impl AppKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppKind::Qsiprep => "qsiprep",
            AppKind::Qsirecon => "qsirecon",
        }
    }

    /// Bundled layout configuration naming this app's outputs.
    pub fn layout_name(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppKind {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qsiprep" => Ok(AppKind::Qsiprep),
            "qsirecon" => Ok(AppKind::Qsirecon),
            _ => Err(WorkflowError::UnknownApp(s.to_string())),
        }
    }
}

/// Input images of one participant, grouped by kind and sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubjectData {
    pub fmap: Vec<PathBuf>,
    pub sbref: Vec<PathBuf>,
    pub flair: Vec<PathBuf>,
    pub t2w: Vec<PathBuf>,
    pub t1w: Vec<PathBuf>,
    pub roi: Vec<PathBuf>,
    pub dwi: Vec<PathBuf>,
}

impl SubjectData {
    fn slot_mut(&mut self, key: &str) -> Option<&mut Vec<PathBuf>> {
        match key {
            "fmap" => Some(&mut self.fmap),
            "sbref" => Some(&mut self.sbref),
            "flair" => Some(&mut self.flair),
            "t2w" => Some(&mut self.t2w),
            "t1w" => Some(&mut self.t1w),
            "roi" => Some(&mut self.roi),
            "dwi" => Some(&mut self.dwi),
            _ => None,
        }
    }
}

/// `(key, datatype, suffix)` of every collected kind of image.
const DATA_QUERIES: &[(&str, &str, Option<&str>)] = &[
    ("fmap", "fmap", None),
    ("sbref", "func", Some("sbref")),
    ("flair", "anat", Some("FLAIR")),
    ("t2w", "anat", Some("T2w")),
    ("t1w", "anat", Some("T1w")),
    ("roi", "anat", Some("roi")),
    ("dwi", "dwi", Some("dwi")),
];

/// Collects the NIfTI images of `participant` from `index`.
///
/// `filters` is the parsed `--bids-filter-file`: an object keyed by data kind
/// (`t1w`, `dwi`, ...) whose entity constraints replace the defaults for that
/// kind.
pub fn collect_data(
    index: &DatasetIndex,
    participant: &str,
    filters: Option<&Value>,
) -> Result<SubjectData, WorkflowError> {
    let mut data = SubjectData::default();

    for (key, datatype, suffix) in DATA_QUERIES {
        let mut query = Query::new()
            .with_exact("subject", participant)
            .with_exact("datatype", *datatype)
            .with(
                "extension",
                QueryValue::AnyOf(vec!["nii".into(), "nii.gz".into()]),
            );
        if let Some(suffix) = suffix {
            query = query.with_exact("suffix", *suffix);
        }
        if let Some(filter) = filters.and_then(|f| f.get(*key)) {
            query = query.merged(&Query::from_json(filter)?);
        }

        let mut files: Vec<PathBuf> = index
            .get(&query)
            .into_iter()
            .map(|f| f.path.clone())
            .collect();
        files.sort();

        if let Some(slot) = data.slot_mut(key) {
            *slot = files;
        }
    }

    tracing::info!(
        participant,
        t1w = data.t1w.len(),
        t2w = data.t2w.len(),
        dwi = data.dwi.len(),
        fmap = data.fmap.len(),
        "Collected subject data"
    );
    Ok(data)
}

/// One output of a participant workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSink {
    /// Dataset directory relative to the output root; empty for the root itself.
    pub dataset: PathBuf,
    pub request: SinkRequest,
}

impl PlannedSink {
    pub fn root(request: SinkRequest) -> Self {
        Self {
            dataset: PathBuf::new(),
            request,
        }
    }

    pub fn in_dataset(dataset: impl Into<PathBuf>, request: SinkRequest) -> Self {
        Self {
            dataset: dataset.into(),
            request,
        }
    }
}

/// Shared state of one run.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub config: Arc<RunConfig>,
    pub index: Arc<DatasetIndex>,
    /// Layout naming the outputs of the simulated app.
    pub layout: Arc<LayoutConfig>,
    /// Command line recorded in the "about" report.
    pub command: String,
}

impl WorkflowContext {
    /// Indexes the input dataset and loads the app's layout.
    pub fn new(config: Arc<RunConfig>, command: impl Into<String>) -> Result<Self, WorkflowError> {
        let bids = LayoutConfig::bundled("bids")?;
        let index = DatasetIndex::build(&config.bids_dir, &bids)?;
        let layout = LayoutConfig::bundled(config.bids_app.layout_name())?;
        Ok(Self {
            config,
            index: Arc::new(index),
            layout: Arc::new(layout),
            command: command.into(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }
}

/// Plans and writes every output of one participant. Returns the written paths.
pub fn run_participant(
    ctx: &WorkflowContext,
    participant: &str,
) -> Result<Vec<PathBuf>, WorkflowError> {
    let data = collect_data(&ctx.index, participant, ctx.config.bids_filters.as_ref())?;
    let plan = match ctx.config.bids_app {
        AppKind::Qsiprep => qsiprep::plan(ctx, participant, &data)?,
        AppKind::Qsirecon => qsirecon::plan(ctx, participant, &data)?,
    };

    let log_dir = ctx.config.participant_log_dir(participant);
    ctx.config.to_filename(&log_dir.join("simbids.json"))?;

    let mut sinks: BTreeMap<PathBuf, DerivativesSink> = BTreeMap::new();
    let mut written = Vec::with_capacity(plan.len());
    for planned in &plan {
        let sink = sinks.entry(planned.dataset.clone()).or_insert_with(|| {
            DerivativesSink::new(
                ctx.output_dir().join(&planned.dataset),
                Arc::clone(&ctx.layout),
            )
        });
        written.push(sink.write(&planned.request)?);
    }

    if ctx.config.fill_files {
        let filled = fill_files(&written, &SimulateOptions::default())?;
        tracing::debug!(participant, files = filled, "Filled output images with random data");
    }

    tracing::info!(
        participant,
        app = %ctx.config.bids_app,
        outputs = written.len(),
        "Participant workflow finished"
    );
    Ok(written)
}

/// Outcome of [`run_participants`].
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Written paths per participant.
    pub completed: BTreeMap<String, Vec<PathBuf>>,
    /// Failure message per participant.
    pub failed: BTreeMap<String, String>,
    /// Participants never started because an earlier one failed.
    pub skipped: Vec<String>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Writes the dataset-level files of the output dataset.
pub fn write_dataset_files(ctx: &WorkflowContext) -> Result<(), WorkflowError> {
    write_derivative_description(
        &ctx.config.bids_dir,
        ctx.output_dir(),
        ctx.config.singularity_url.as_deref(),
    )?;
    if ctx.config.bids_app == AppKind::Qsirecon {
        write_root_level_atlases(ctx.output_dir())?;
    }
    Ok(())
}

/// Runs every selected participant with at most `nprocs` at a time.
///
/// A failing participant does not stop the others unless
/// `stop_on_first_crash` is set. Then participants still waiting for a worker
/// are skipped; those already running finish and are reported as they end.
pub async fn run_participants(ctx: Arc<WorkflowContext>) -> Result<RunSummary, WorkflowError> {
    write_dataset_files(&ctx)?;

    let semaphore = Arc::new(Semaphore::new(ctx.config.nprocs.max(1)));
    let crashed = Arc::new(AtomicBool::new(false));
    let mut tasks = JoinSet::new();

    for participant in ctx.config.participant_label.clone() {
        let sem = Arc::clone(&semaphore);
        let crashed = Arc::clone(&crashed);
        let ctx = Arc::clone(&ctx);
        tasks.spawn(async move {
            let outcome = run_with_permit(ctx, &participant, sem, crashed).await;
            (participant, outcome)
        });
    }

    let mut summary = RunSummary::default();
    while let Some(joined) = tasks.join_next().await {
        let (participant, outcome) =
            joined.map_err(|e| WorkflowError::TaskAborted(e.to_string()))?;
        match outcome {
            Ok(Some(paths)) => {
                summary.completed.insert(participant, paths);
            }
            Ok(None) => {
                tracing::warn!(participant = %participant, "Skipped after an earlier failure");
                summary.skipped.push(participant);
            }
            Err(err) => {
                tracing::error!(participant = %participant, error = %err, "Participant workflow failed");
                summary.failed.insert(participant, err.to_string());
            }
        }
    }

    summary.skipped.sort();
    Ok(summary)
}

/// Runs one participant once a worker is free.
///
/// Returns `Ok(None)` without running when `crashed` was raised while waiting.
/// A failure raises `crashed` before the worker is released.
async fn run_with_permit(
    ctx: Arc<WorkflowContext>,
    participant: &str,
    semaphore: Arc<Semaphore>,
    crashed: Arc<AtomicBool>,
) -> Result<Option<Vec<PathBuf>>, WorkflowError> {
    let _permit = semaphore
        .acquire_owned()
        .await
        .map_err(|e| WorkflowError::TaskAborted(e.to_string()))?;
    if crashed.load(Ordering::SeqCst) {
        return Ok(None);
    }

    let stop_on_first_crash = ctx.config.stop_on_first_crash;
    let label = participant.to_string();
    let result = tokio::task::spawn_blocking(move || run_participant(&ctx, &label))
        .await
        .map_err(|e| WorkflowError::TaskAborted(e.to_string()))
        .and_then(|r| r);

    if result.is_err() && stop_on_first_crash {
        crashed.store(true, Ordering::SeqCst);
    }
    result.map(Some)
}

/// HTML "summary" report of one participant.
pub(crate) fn summary_report(participant: &str, data: &SubjectData) -> String {
    format!(
        "<div class=\"summary\">\n\
         <h3>Summary</h3>\n\
         <ul>\n\
         <li>Subject ID: {participant}</li>\n\
         <li>Structural images: {t1w} T1-weighted, {t2w} T2-weighted</li>\n\
         <li>Diffusion-weighted series: {dwi}</li>\n\
         </ul>\n\
         </div>\n",
        t1w = data.t1w.len(),
        t2w = data.t2w.len(),
        dwi = data.dwi.len(),
    )
}

/// HTML "about" report of the run.
pub(crate) fn about_report(version: &str, command: &str) -> String {
    format!(
        "<div class=\"about\">\n\
         <h3>About</h3>\n\
         <ul>\n\
         <li>SimBIDS version: {version}</li>\n\
         <li>SimBIDS command: <code>{command}</code></li>\n\
         <li>Date processed: {date}</li>\n\
         </ul>\n\
         </div>\n",
        date = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S %z"),
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::simulate::{simulate_dataset, SimulateOptions};
    use tempfile::TempDir;

    pub struct Workspace {
        pub dir: TempDir,
        pub ctx: WorkflowContext,
    }

    /// Simulates a bundled skeleton and builds a context writing to `<tmp>/out`.
    pub fn workspace(skeleton: &str, app: AppKind) -> Workspace {
        workspace_with(skeleton, app, |_| {})
    }

    /// Like [`workspace`], letting `prepare` edit the dataset before it is indexed.
    pub fn workspace_with(
        skeleton: &str,
        app: AppKind,
        prepare: impl FnOnce(&Path),
    ) -> Workspace {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let bids = simulate_dataset(dir.path(), skeleton, &SimulateOptions::default())
            .expect("dataset should simulate");
        prepare(&bids);
        let config = RunConfig::new()
            .with_bids_dir(bids)
            .with_output_dir(dir.path().join("out"))
            .with_work_dir(dir.path().join("work"))
            .with_bids_app(app);
        let ctx = WorkflowContext::new(Arc::new(config), "simbids bids out participant")
            .expect("context should build");
        Workspace { dir, ctx }
    }
}
