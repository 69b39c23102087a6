//! Simulated QSIPrep outputs.
//!
//! Per DWI series: the preprocessed series with its gradient tables, a
//! reference volume, a brain mask and the eddy CNR map. Per T1w image: the
//! preprocessed image, brain mask, segmentations and the four transforms
//! between ACPC, the native anatomical space and the template. Two HTML
//! reports are written from the first DWI series.

use std::path::Path;

use super::{about_report, summary_report, PlannedSink, SubjectData, WorkflowContext, TEXT_CONTENT};
use crate::error::WorkflowError;
use crate::sink::SinkRequest;

/// Template the anatomical transforms map to and from.
pub const ANATOMICAL_TEMPLATE: &str = "MNI152NLin6Asym";

/// Gradient table formats written next to each preprocessed DWI series.
const GRADIENT_EXTENSIONS: &[&str] = &[".bval", ".bvec", ".b", ".b_table.txt"];

/// Plans every output of one participant.
pub fn plan(
    ctx: &WorkflowContext,
    participant: &str,
    data: &SubjectData,
) -> Result<Vec<PlannedSink>, WorkflowError> {
    let Some(first_dwi) = data.dwi.first() else {
        return Err(WorkflowError::NoDwiData(participant.to_string()));
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

    if !ctx.config.anat_only {
        for dwi in &data.dwi {
            plan.extend(dwi_outputs(dwi));
        }
    }
    for t1w in &data.t1w {
        plan.extend(anat_outputs(t1w));
    }

    tracing::debug!(participant, outputs = plan.len(), "Planned qsiprep outputs");
    Ok(plan)
}

fn dwi_outputs(dwi: &Path) -> Vec<PlannedSink> {
    let mut outputs = vec![SinkRequest::new(dwi)
        .copy_from(dwi)
        .with_entity("space", "ACPC")
        .with_entity("desc", "preproc")];

    for extension in GRADIENT_EXTENSIONS {
        outputs.push(
            SinkRequest::new(dwi)
                .with_text(TEXT_CONTENT)
                .with_entity("space", "ACPC")
                .with_entity("desc", "preproc")
                .with_entity("extension", *extension),
        );
    }

    outputs.push(
        SinkRequest::new(dwi)
            .copy_from(dwi)
            .with_entity("space", "ACPC")
            .with_entity("suffix", "dwiref"),
    );
    outputs.push(
        SinkRequest::new(dwi)
            .copy_from(dwi)
            .with_entity("space", "ACPC")
            .with_entity("desc", "brain")
            .with_entity("suffix", "mask"),
    );
    outputs.push(
        SinkRequest::new(dwi)
            .copy_from(dwi)
            .with_entity("space", "ACPC")
            .with_entity("model", "eddy")
            .with_entity("statistic", "cnr")
            .with_entity("suffix", "dwimap")
            .with_meta("Description", "Contrast-to-noise ratio map for the HMC step."),
    );

    outputs.into_iter().map(PlannedSink::root).collect()
}

fn anat_outputs(t1w: &Path) -> Vec<PlannedSink> {
    let mut outputs = vec![
        SinkRequest::new(t1w)
            .copy_from(t1w)
            .with_entity("space", "ACPC")
            .with_entity("desc", "preproc"),
        SinkRequest::new(t1w)
            .copy_from(t1w)
            .with_entity("space", "ACPC")
            .with_entity("desc", "brain")
            .with_entity("suffix", "mask"),
        SinkRequest::new(t1w)
            .copy_from(t1w)
            .with_entity("space", "ACPC")
            .with_entity("suffix", "dseg"),
        SinkRequest::new(t1w)
            .copy_from(t1w)
            .with_entity("space", "ACPC")
            .with_entity("desc", "aseg")
            .with_entity("suffix", "dseg"),
    ];

    let transforms = [
        (ANATOMICAL_TEMPLATE, "ACPC"),
        ("anat", "ACPC"),
        ("ACPC", "anat"),
        ("ACPC", ANATOMICAL_TEMPLATE),
    ];
    for (from, to) in transforms {
        // Transforms are stored as HDF5 regardless of the copied image.
        outputs.push(
            SinkRequest::new(t1w)
                .copy_from(t1w)
                .with_entity("from", from)
                .with_entity("to", to)
                .with_entity("mode", "image")
                .with_entity("suffix", "xfm")
                .with_entity("extension", ".h5"),
        );
    }

    outputs.into_iter().map(PlannedSink::root).collect()
}
