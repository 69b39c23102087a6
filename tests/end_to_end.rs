//! Simulate a raw dataset, run the simulated apps on it and inspect the outputs.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use simbids::simulate::{simulate_dataset, SimulateOptions};
use simbids::workflows::{run_participants, WorkflowContext};
use simbids::{AppKind, LayoutConfig, RunConfig};
use tempfile::TempDir;

struct Run {
    _dir: TempDir,
    out: PathBuf,
    written: Vec<PathBuf>,
}

async fn run_app(skeleton: &str, app: AppKind) -> Run {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let bids = simulate_dataset(dir.path(), skeleton, &SimulateOptions::default())
        .expect("dataset should simulate");
    let out = dir.path().join("out");

    let config = RunConfig::new()
        .with_bids_dir(&bids)
        .with_output_dir(&out)
        .with_work_dir(dir.path().join("work"))
        .with_bids_app(app)
        .with_nprocs(2);
    config.validate().expect("config should validate");

    let mut ctx = WorkflowContext::new(Arc::new(config), "simbids").expect("context should build");
    let subjects = ctx.index.subjects();
    Arc::make_mut(&mut ctx.config)
        .resolve_participants(&subjects)
        .expect("participants should resolve");

    let summary = run_participants(Arc::new(ctx)).await.expect("run should complete");
    assert!(summary.is_success(), "failures: {:?}", summary.failed);
    assert_eq!(
        summary.completed.keys().cloned().collect::<Vec<_>>(),
        vec!["01", "02"]
    );

    let written = summary.completed.into_values().flatten().collect();
    Run {
        _dir: dir,
        out,
        written,
    }
}

/// Path of a derivative relative to its dataset root (from the `sub-*` component on).
fn dataset_relative(path: &Path) -> String {
    let components: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let start = components
        .iter()
        .rposition(|c| c.starts_with("sub-") && !c.contains('_'))
        .expect("derivative should live under a subject directory");
    components[start..].join("/")
}

fn assert_round_trip(run: &Run, layout: &LayoutConfig) {
    for path in &run.written {
        let relative = dataset_relative(path);
        let entities = layout
            .extract_entities(&relative)
            .expect("entities should extract");
        let rebuilt = layout.build_path(&entities).expect("path should rebuild");
        assert_eq!(rebuilt, relative);
    }
}

#[tokio::test]
async fn test_qsiprep_multi_session() {
    let run = run_app("multi_ses_qsiprep.yaml", AppKind::Qsiprep).await;

    // 2 subjects * (2 reports + 3 DWI series * 8 + 2 T1w * 8)
    assert_eq!(run.written.len(), 2 * (2 + 24 + 16));
    assert!(run.written.iter().all(|p| p.is_file()));

    let desc: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(run.out.join("dataset_description.json"))
            .expect("description should exist"),
    )
    .expect("description should be JSON");
    assert_eq!(desc["DatasetType"], "derivative");
    assert_eq!(desc["GeneratedBy"][0]["Name"], "SimBIDS");

    assert!(run
        .out
        .join("sub-02/ses-02/dwi/sub-02_ses-02_acq-HASC55_dir-AP_space-ACPC_desc-preproc_dwi.b")
        .is_file());
    assert!(!run.out.join("atlases").exists());

    let layout = LayoutConfig::bundled("qsiprep").expect("config should compile");
    assert_round_trip(&run, &layout);
}

#[tokio::test]
async fn test_qsirecon_single_session() {
    let run = run_app("single_ses_qsiprep.yaml", AppKind::Qsirecon).await;

    assert!(run.out.join("atlases/dataset_description.json").is_file());
    for dataset in [
        "qsirecon-TORTOISE",
        "qsirecon-MRtrix3_act-HSVS",
        "qsirecon-DKI",
        "qsirecon-DSIStudio",
    ] {
        assert!(
            run.out.join("derivatives").join(dataset).join("sub-02").is_dir(),
            "missing {}",
            dataset
        );
    }

    let layout = LayoutConfig::bundled("qsirecon").expect("config should compile");
    assert_round_trip(&run, &layout);
}

#[tokio::test]
async fn test_qsiprep_without_sessions() {
    let run = run_app("no_ses_qsiprep.yaml", AppKind::Qsiprep).await;

    assert!(run
        .out
        .join("sub-01/anat/sub-01_from-ACPC_to-MNI152NLin6Asym_mode-image_xfm.h5")
        .is_file());
    assert!(run
        .out
        .join("sub-01/dwi/sub-01_run-01_space-ACPC_model-eddy_stat-cnr_dwimap.json")
        .is_file());
    assert!(run.out.join("sub-01/log").is_dir());
}
