//! Simulated QSIRecon outputs.
//!
//! The output root receives the reports, the 4S156Parcels segmentation of the
//! first DWI series and the HSVS segmentation of the first anatomical image.
//! Each reconstruction workflow writes its own derivative dataset under
//! `derivatives/qsirecon-<name>`.

use std::path::Path;

use super::{about_report, summary_report, PlannedSink, SubjectData, WorkflowContext, TEXT_CONTENT};
use crate::error::WorkflowError;
use crate::sink::SinkRequest;

pub const TORTOISE_DATASET: &str = "derivatives/qsirecon-TORTOISE";
pub const MRTRIX_DATASET: &str = "derivatives/qsirecon-MRtrix3_act-HSVS";
pub const DKI_DATASET: &str = "derivatives/qsirecon-DKI";
pub const DSISTUDIO_DATASET: &str = "derivatives/qsirecon-DSIStudio";

const ATLAS: &str = "4S156Parcels";
const DKI_PARAMS: &[&str] = &["ad", "ak", "kfa", "md", "mk", "mkt", "rd", "rk"];
const FOD_TISSUES: &[&str] = &["CSF", "GM", "WM"];
const DSISTUDIO_BUNDLES: &[&str] = &["AssociationArcuateFasciculusL", "AssociationArcuateFasciculusR"];
const JSON_CONTENT: &str = "{}\n";

/// Plans every output of one participant.
pub fn plan(
    ctx: &WorkflowContext,
    participant: &str,
    data: &SubjectData,
) -> Result<Vec<PlannedSink>, WorkflowError> {
    let Some(first_dwi) = data.dwi.first() else {
        return Err(WorkflowError::NoDwiData(participant.to_string()));
    };
    let Some(anat) = data.t1w.first().or_else(|| data.t2w.first()) else {
        return Err(WorkflowError::NoAnatData(participant.to_string()));
    };

    let mut plan = vec![
        PlannedSink::root(
            SinkRequest::new(first_dwi)
                .with_text(summary_report(participant, data))
                .with_entity("datatype", "figures")
                .with_entity("desc", "summary")
                .with_entity("extension", ".html"),
        ),
        PlannedSink::root(
            SinkRequest::new(first_dwi)
                .with_text(about_report(&ctx.config.version, &ctx.command))
                .with_entity("datatype", "figures")
                .with_entity("desc", "about")
                .with_entity("extension", ".html"),
        ),
    ];
    plan.extend(atlas_outputs(first_dwi));

    if !ctx.config.anat_only {
        for dwi in &data.dwi {
            plan.extend(tortoise_outputs(dwi));
            plan.extend(mrtrix_outputs(dwi));
            plan.extend(dki_outputs(dwi));
            plan.extend(dsistudio_outputs(dwi));
        }
    }
    plan.extend(hsvs_outputs(anat));

    tracing::debug!(participant, outputs = plan.len(), "Planned qsirecon outputs");
    Ok(plan)
}

fn atlas_outputs(dwi: &Path) -> Vec<PlannedSink> {
    let dseg = || {
        SinkRequest::new(dwi)
            .with_entity("suffix", "dseg")
            .with_entity("seg", ATLAS)
            .with_entity("space", "ACPC")
    };
    vec![
        PlannedSink::root(dseg().copy_from(dwi).with_entity("extension", ".nii.gz")),
        PlannedSink::root(dseg().copy_from(dwi).with_entity("extension", ".mif.gz")),
        PlannedSink::root(dseg().with_text(TEXT_CONTENT).with_entity("extension", ".txt")),
    ]
}

fn tortoise_outputs(dwi: &Path) -> Vec<PlannedSink> {
    [("mapmri", "rtop"), ("mapmri", "rtap"), ("mapmri", "rtpp"), ("tensor", "fa")]
        .into_iter()
        .map(|(model, param)| {
            PlannedSink::in_dataset(
                TORTOISE_DATASET,
                dwimap(dwi, model)
                    .copy_from(dwi)
                    .with_entity("param", param)
                    .with_entity("extension", ".nii.gz"),
            )
        })
        .collect()
}

fn mrtrix_outputs(dwi: &Path) -> Vec<PlannedSink> {
    let mut outputs = vec![
        SinkRequest::new(dwi)
            .with_text(TEXT_CONTENT)
            .with_entity("model", "msmtcsd")
            .with_entity("desc", "connectivity")
            .with_entity("suffix", "connectivity")
            .with_entity("extension", ".mat"),
        SinkRequest::new(dwi)
            .with_text(TEXT_CONTENT)
            .with_entity("model", "msmtcsd")
            .with_entity("desc", "exemplarbundles")
            .with_entity("suffix", "exemplarbundles")
            .with_entity("extension", ".zip"),
    ];

    for tissue in FOD_TISSUES {
        for extension in [".mif.gz", ".txt"] {
            outputs.push(
                dwimap(dwi, "msmtcsd")
                    .with_text(TEXT_CONTENT)
                    .with_entity("param", "fod")
                    .with_entity("label", *tissue)
                    .with_entity("desc", "fod")
                    .with_entity("extension", extension),
            );
        }
    }

    for param in ["inliermask", "norm"] {
        outputs.push(
            dwimap(dwi, "mtnorm")
                .copy_from(dwi)
                .with_entity("param", param)
                .with_entity("desc", "mtnorm")
                .with_entity("extension", ".nii.gz"),
        );
    }

    outputs.push(
        SinkRequest::new(dwi)
            .copy_from(dwi)
            .with_entity("model", "sdstream")
            .with_entity("desc", "sdstream")
            .with_entity("suffix", "streamlines")
            .with_entity("extension", ".tck.gz"),
    );
    for (suffix, extension) in [("mu", ".txt"), ("streamlineweights", ".csv")] {
        outputs.push(
            SinkRequest::new(dwi)
                .with_text(TEXT_CONTENT)
                .with_entity("model", "sift2")
                .with_entity("desc", "sift2")
                .with_entity("suffix", suffix)
                .with_entity("extension", extension),
        );
    }

    outputs
        .into_iter()
        .map(|r| PlannedSink::in_dataset(MRTRIX_DATASET, r))
        .collect()
}

fn dki_outputs(dwi: &Path) -> Vec<PlannedSink> {
    let maps = DKI_PARAMS
        .iter()
        .map(|param| ("dki", *param))
        .chain(std::iter::once(("tensor", "fa")));

    let mut outputs = Vec::new();
    for (model, param) in maps {
        outputs.push(
            dwimap(dwi, model)
                .copy_from(dwi)
                .with_entity("param", param)
                .with_entity("extension", ".nii.gz"),
        );
        outputs.push(
            dwimap(dwi, model)
                .with_text(JSON_CONTENT)
                .with_entity("param", param)
                .with_entity("extension", ".json"),
        );
    }

    outputs
        .into_iter()
        .map(|r| PlannedSink::in_dataset(DKI_DATASET, r))
        .collect()
}

fn dsistudio_outputs(dwi: &Path) -> Vec<PlannedSink> {
    let mut outputs: Vec<SinkRequest> = DSISTUDIO_BUNDLES
        .iter()
        .map(|bundle| {
            SinkRequest::new(dwi)
                .copy_from(dwi)
                .with_entity("model", "gqi")
                .with_entity("bundle", *bundle)
                .with_entity("suffix", "streamlines")
                .with_entity("extension", ".tck.gz")
        })
        .collect();

    outputs.push(
        SinkRequest::new(dwi)
            .with_text(TEXT_CONTENT)
            .with_entity("model", "gqi")
            .with_entity("suffix", "bundlestats")
            .with_entity("extension", ".csv"),
    );
    outputs.push(
        dwimap(dwi, "gqi")
            .copy_from(dwi)
            .with_entity("extension", ".fib.gz"),
    );
    outputs.push(
        dwimap(dwi, "gqi")
            .copy_from(dwi)
            .with_entity("dsistudiotemplate", "ICBM152adult")
            .with_entity("extension", ".map.gz"),
    );

    outputs
        .into_iter()
        .map(|r| PlannedSink::in_dataset(DSISTUDIO_DATASET, r))
        .collect()
}

fn hsvs_outputs(anat: &Path) -> Vec<PlannedSink> {
    let probseg = || {
        SinkRequest::new(anat)
            .copy_from(anat)
            .with_entity("seg", "hsvs")
            .with_entity("suffix", "probseg")
    };
    vec![
        PlannedSink::root(probseg().with_entity("extension", ".nii.gz")),
        PlannedSink::root(
            probseg()
                .with_entity("space", "fsnative")
                .with_entity("extension", ".mif.gz"),
        ),
    ]
}

fn dwimap(dwi: &Path, model: &str) -> SinkRequest {
    SinkRequest::new(dwi)
        .with_entity("model", model)
        .with_entity("suffix", "dwimap")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::test_support::{workspace, workspace_with};
    use crate::workflows::{collect_data, run_participant, AppKind};
    use std::fs;

    #[test]
    fn test_plan_counts() {
        let ws = workspace("single_ses_qsiprep.yaml", AppKind::Qsirecon);
        let data = collect_data(&ws.ctx.index, "01", None).expect("data should collect");
        let plan = plan(&ws.ctx, "01", &data).expect("plan should build");

        // reports, atlas dseg and HSVS at the root; 4 + 13 + 18 + 5 per DWI series
        let per_dwi = 4 + 13 + 18 + 5;
        assert_eq!(plan.len(), 2 + 3 + 2 + per_dwi);

        let in_dki = plan
            .iter()
            .filter(|p| p.dataset.as_os_str() == DKI_DATASET)
            .count();
        assert_eq!(in_dki, 18);
    }

    #[test]
    fn test_missing_anatomical_data() {
        let ws = workspace_with("no_ses_qsiprep.yaml", AppKind::Qsirecon, |bids| {
            fs::remove_dir_all(bids.join("sub-01/anat")).expect("Failed to remove dir");
        });
        let data = collect_data(&ws.ctx.index, "01", None).expect("data should collect");
        assert!(matches!(
            plan(&ws.ctx, "01", &data),
            Err(WorkflowError::NoAnatData(_))
        ));
    }

    #[test]
    fn test_hsvs_falls_back_to_t2w() {
        let ws = workspace_with("single_ses_qsiprep.yaml", AppKind::Qsirecon, |bids| {
            fs::remove_file(bids.join("sub-01/ses-01/anat/sub-01_ses-01_T1w.nii.gz"))
                .expect("Failed to remove file");
        });
        let data = collect_data(&ws.ctx.index, "01", None).expect("data should collect");
        let plan = plan(&ws.ctx, "01", &data).expect("plan should build");

        let hsvs: Vec<_> = plan
            .iter()
            .filter(|p| p.request.entities.get("seg").map(|v| v.to_string()) == Some("hsvs".into()))
            .collect();
        assert_eq!(hsvs.len(), 2);
        assert!(hsvs
            .iter()
            .all(|p| p.request.source_file.to_string_lossy().ends_with("_T2w.nii.gz")));
    }

    #[test]
    fn test_written_outputs() {
        let ws = workspace("single_ses_qsiprep.yaml", AppKind::Qsirecon);
        run_participant(&ws.ctx, "01").expect("participant should run");
        let out = ws.dir.path().join("out");
        let dwi = "sub-01/ses-01/dwi/sub-01_ses-01_acq-multishell";

        for relative in [
            format!("{dwi}_space-ACPC_seg-4S156Parcels_dseg.nii.gz"),
            format!("{dwi}_space-ACPC_seg-4S156Parcels_dseg.mif.gz"),
            format!("{dwi}_space-ACPC_seg-4S156Parcels_dseg.txt"),
            "sub-01/ses-01/anat/sub-01_ses-01_seg-hsvs_probseg.nii.gz".to_string(),
            "sub-01/ses-01/anat/sub-01_ses-01_space-fsnative_seg-hsvs_probseg.mif.gz".to_string(),
            "sub-01/figures/sub-01_ses-01_acq-multishell_desc-summary_dwi.html".to_string(),
            format!("{TORTOISE_DATASET}/{dwi}_model-mapmri_param-rtop_dwimap.nii.gz"),
            format!("{MRTRIX_DATASET}/{dwi}_model-msmtcsd_desc-connectivity_connectivity.mat"),
            format!("{MRTRIX_DATASET}/{dwi}_model-msmtcsd_param-fod_label-WM_desc-fod_dwimap.mif.gz"),
            format!("{MRTRIX_DATASET}/{dwi}_model-sdstream_desc-sdstream_streamlines.tck.gz"),
            format!("{MRTRIX_DATASET}/{dwi}_model-sift2_desc-sift2_streamlineweights.csv"),
            format!("{DKI_DATASET}/{dwi}_model-dki_param-mkt_dwimap.json"),
            format!("{DKI_DATASET}/{dwi}_model-tensor_param-fa_dwimap.nii.gz"),
            format!("{DSISTUDIO_DATASET}/{dwi}_model-gqi_bundle-AssociationArcuateFasciculusL_streamlines.tck.gz"),
            format!("{DSISTUDIO_DATASET}/{dwi}_model-gqi_bundlestats.csv"),
            format!("{DSISTUDIO_DATASET}/{dwi}_dsistudiotemplate-ICBM152adult_model-gqi_dwimap.map.gz"),
        ] {
            assert!(out.join(&relative).is_file(), "missing {}", relative);
        }
    }
}
