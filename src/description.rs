//! `dataset_description.json` for derivative datasets.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

use crate::error::DescriptionError;

pub const SIMBIDS_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DOWNLOAD_URL: &str = "https://github.com/nipreps/simbids/archive/0.1.0.tar.gz";
pub const TEMPLATEFLOW_URL: &str = "https://github.com/templateflow/templateflow";

const DERIVATIVE_NAME: &str = "SimBIDS Simulated BIDS-App Outputs";
const DERIVATIVE_BIDS_VERSION: &str = "1.9.0dev";
const HOW_TO_ACKNOWLEDGE: &str = "Include the generated boilerplate in the methods section.";

/// Writes `<output_dir>/dataset_description.json` derived from the input dataset's description.
///
/// The input description is kept and updated: `Name`, `BIDSVersion`,
/// `DatasetType` and `HowToAcknowledge` are set, a SimBIDS entry is prepended
/// to `GeneratedBy` (with a singularity `Container` when `singularity_url` is
/// given) and a `templateflow` entry is added to `DatasetLinks`.
pub fn write_derivative_description(
    input_dir: &Path,
    output_dir: &Path,
    singularity_url: Option<&str>,
) -> Result<PathBuf, DescriptionError> {
    let input = input_dir.join("dataset_description.json");
    if !input.is_file() {
        return Err(DescriptionError::NotFound(input.display().to_string()));
    }

    let value: Value = serde_json::from_str(&fs::read_to_string(&input)?)?;
    let Value::Object(mut desc) = value else {
        return Err(DescriptionError::NotAnObject(input.display().to_string()));
    };

    desc.insert("Name".to_string(), json!(DERIVATIVE_NAME));
    desc.insert("BIDSVersion".to_string(), json!(DERIVATIVE_BIDS_VERSION));
    desc.insert("DatasetType".to_string(), json!("derivative"));
    desc.insert("HowToAcknowledge".to_string(), json!(HOW_TO_ACKNOWLEDGE));

    // Start from the input dataset's GeneratedBy, newest first
    let mut generated_by = match desc.remove("GeneratedBy") {
        Some(Value::Array(entries)) => entries,
        _ => Vec::new(),
    };
    let mut simbids = json!({
        "Name": "SimBIDS",
        "Version": SIMBIDS_VERSION,
        "CodeURL": DOWNLOAD_URL,
    });
    if let Some(uri) = singularity_url {
        simbids["Container"] = json!({"Type": "singularity", "URI": uri});
    }
    generated_by.insert(0, simbids);
    desc.insert("GeneratedBy".to_string(), Value::Array(generated_by));

    let mut links = match desc.remove("DatasetLinks") {
        Some(Value::Object(links)) => links,
        _ => Map::new(),
    };
    for (key, url) in [("templateflow", TEMPLATEFLOW_URL)] {
        if let Some(existing) = links.get(key) {
            if existing.as_str() != Some(url) {
                tracing::warn!(link = key, "Dataset link already exists. Overwriting.");
            }
        }
        links.insert(key.to_string(), json!(url));
    }
    desc.insert("DatasetLinks".to_string(), Value::Object(links));

    fs::create_dir_all(output_dir)?;
    let output = output_dir.join("dataset_description.json");
    fs::write(&output, serde_json::to_string_pretty(&Value::Object(desc))?)?;
    Ok(output)
}

/// Writes the `atlases/` derivative dataset with the bundled 4S156Parcels atlas files.
pub fn write_root_level_atlases(output_dir: &Path) -> Result<PathBuf, DescriptionError> {
    let atlases_dir = output_dir.join("atlases");
    let atlas_dir = atlases_dir.join("atlas-4S156Parcels");
    fs::create_dir_all(&atlas_dir)?;

    let desc = json!({
        "Name": "SimBIDS Atlases",
        "BIDSVersion": "1.7.0",
        "DatasetType": "derivative",
        "GeneratedBy": [{
            "Name": "SimBIDS",
            "Version": SIMBIDS_VERSION,
            "Description": "SimBIDS atlas collection",
        }],
    });
    fs::write(
        atlases_dir.join("dataset_description.json"),
        serde_json::to_string_pretty(&desc)?,
    )?;

    fs::write(atlas_dir.join("atlas-4S156Parcels_dseg.tsv"), b"")?;
    fs::write(
        atlas_dir.join("atlas-4S156Parcels_space-MNI152NLin2009cAsym_res-01_dseg.nii.gz"),
        b"",
    )?;
    Ok(atlases_dir)
}
