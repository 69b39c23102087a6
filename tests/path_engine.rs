//! Entity extraction and path building through the public API.

use simbids::layout::{EntityValue, PaddedInt};
use simbids::{build_path, BuildOptions, EntityMap, LayoutConfig, PathPattern, PatternError};

fn entities(pairs: &[(&str, &str)]) -> EntityMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), EntityValue::from(*v)))
        .collect()
}

#[test]
fn test_builds_raw_anat_and_dwi_paths() {
    let config = LayoutConfig::bundled("simbids").expect("config should compile");

    let anat = entities(&[
        ("subject", "01"),
        ("datatype", "anat"),
        ("suffix", "T1w"),
        ("extension", "nii.gz"),
    ]);
    assert_eq!(
        config.build_path(&anat).expect("path should build"),
        "sub-01/anat/sub-01_T1w.nii.gz"
    );

    let dwi = entities(&[
        ("subject", "01"),
        ("session", "02"),
        ("datatype", "dwi"),
        ("suffix", "dwi"),
        ("extension", "nii.gz"),
    ]);
    assert_eq!(
        config.build_path(&dwi).expect("path should build"),
        "sub-01/ses-02/dwi/sub-01_ses-02_dwi.nii.gz"
    );
}

#[test]
fn test_rejects_suffix_outside_choices() {
    let patterns = vec![PathPattern::parse(
        "sub-{subject}/{datatype<dwi>|dwi}/sub-{subject}_{suffix<dwi|dwiref|mask>}{extension<.nii.gz>|.nii.gz}",
    )
    .expect("pattern should parse")];
    let bogus = entities(&[("subject", "01"), ("suffix", "bogus")]);

    match build_path(&bogus, &patterns, BuildOptions::default()) {
        Err(PatternError::InvalidEnumValue { entity, value, .. }) => {
            assert_eq!(entity, "suffix");
            assert_eq!(value, "bogus");
        }
        other => panic!("expected InvalidEnumValue, got {:?}", other),
    }
}

#[test]
fn test_missing_subject_matches_nothing() {
    for name in ["simbids", "qsiprep", "qsirecon"] {
        let config = LayoutConfig::bundled(name).expect("config should compile");
        let anonymous = entities(&[("datatype", "anat"), ("suffix", "T1w")]);
        assert!(
            matches!(
                config.build_path(&anonymous),
                Err(PatternError::NoMatchingPattern(_))
            ),
            "{} should not build a path without a subject",
            name
        );
    }
}

#[test]
fn test_non_numeric_run_is_malformed() {
    let config = LayoutConfig::bundled("bids").expect("config should compile");
    let result = config.extract_entities("sub-01/func/sub-01_task-rest_run-a_bold.nii.gz");
    assert!(matches!(
        result,
        Err(PatternError::MalformedEntityValue { ref entity, .. }) if entity == "run"
    ));
}

#[test]
fn test_extracted_entities_rebuild_the_path() {
    let config = LayoutConfig::bundled("qsiprep").expect("config should compile");
    let path = "sub-01/ses-01/dwi/sub-01_ses-01_acq-HASC55_dir-AP_run-003_space-ACPC_desc-preproc_dwi.nii.gz";

    let extracted = config.extract_entities(path).expect("entities should extract");
    assert_eq!(
        extracted.get("run"),
        Some(&EntityValue::Int(PaddedInt::parse("003").expect("run should parse")))
    );
    assert_eq!(config.build_path(&extracted).expect("path should build"), path);
}

#[test]
fn test_building_is_deterministic() {
    let config = LayoutConfig::bundled("qsirecon").expect("config should compile");
    let request = entities(&[
        ("subject", "01"),
        ("datatype", "dwi"),
        ("model", "gqi"),
        ("suffix", "dwimap"),
        ("extension", ".fib.gz"),
    ]);

    let first = config.build_path(&request).expect("path should build");
    for _ in 0..10 {
        assert_eq!(config.build_path(&request).expect("path should build"), first);
    }
    assert_eq!(first, "sub-01/dwi/sub-01_model-gqi_dwimap.fib.gz");
}
