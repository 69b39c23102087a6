//! Simulated raw BIDS datasets built from bundled or user-provided skeletons.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use walkdir::WalkDir;

use crate::error::SkeletonError;
use crate::skeleton::{generate_bids_skeleton, Skeleton};

/// Size of the random payload written into each image when filling files.
pub const DEFAULT_FILL_SIZE: usize = 10 * 1024 * 1024;

/// Name of the dataset directory created under the output directory.
pub const DATASET_DIR: &str = "simbids";

const BUNDLED_SKELETONS: &[(&str, &str)] = &[
    (
        "multi_ses_qsiprep.yaml",
        include_str!("../data/bids_mri/multi_ses_qsiprep.yaml"),
    ),
    (
        "single_ses_qsiprep.yaml",
        include_str!("../data/bids_mri/single_ses_qsiprep.yaml"),
    ),
    (
        "no_ses_qsiprep.yaml",
        include_str!("../data/bids_mri/no_ses_qsiprep.yaml"),
    ),
];

/// Options for [`simulate_dataset`].
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Fill every `.nii.gz` file with random bytes.
    pub fill_files: bool,
    /// Bytes written per filled file.
    pub fill_size: usize,
    /// Seed for the random payload; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            fill_files: false,
            fill_size: DEFAULT_FILL_SIZE,
            seed: None,
        }
    }
}

impl SimulateOptions {
    pub fn with_fill_files(mut self, fill: bool) -> Self {
        self.fill_files = fill;
        self
    }

    pub fn with_fill_size(mut self, size: usize) -> Self {
        self.fill_size = size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// File names of the bundled skeletons.
pub fn bundled_skeleton_names() -> Vec<&'static str> {
    BUNDLED_SKELETONS.iter().map(|(name, _)| *name).collect()
}

/// Loads a skeleton by bundled file name, falling back to a path on disk.
pub fn load_skeleton(name_or_path: &str) -> Result<Skeleton, SkeletonError> {
    if let Some((name, content)) = BUNDLED_SKELETONS
        .iter()
        .find(|(name, _)| *name == name_or_path)
    {
        tracing::info!(skeleton = %name, "Using bundled skeleton");
        return Skeleton::from_yaml_str(content);
    }

    let path = Path::new(name_or_path);
    if !path.is_file() {
        return Err(SkeletonError::SkeletonNotFound(name_or_path.to_string()));
    }
    tracing::info!(skeleton = %path.display(), "Using user-provided skeleton");
    Skeleton::from_file(path)
}

/// Builds a simulated dataset in `<output_dir>/simbids` and returns its path.
pub fn simulate_dataset<P: AsRef<Path>>(
    output_dir: P,
    skeleton: &str,
    options: &SimulateOptions,
) -> Result<PathBuf, SkeletonError> {
    let skeleton = load_skeleton(skeleton)?;
    let dataset_dir = output_dir.as_ref().join(DATASET_DIR);

    let created = generate_bids_skeleton(&dataset_dir, &skeleton)?;
    tracing::info!(
        dataset = %dataset_dir.display(),
        files = created.len(),
        "Generated BIDS skeleton"
    );

    if options.fill_files {
        let filled = fill_images(&dataset_dir, options)?;
        tracing::info!(files = filled, bytes = options.fill_size, "Filled images with random data");
    }

    Ok(dataset_dir)
}

/// Overwrites every `.nii.gz` file under `root` with random bytes.
///
/// Returns the number of files written.
pub fn fill_images(root: &Path, options: &SimulateOptions) -> Result<usize, SkeletonError> {
    let mut images = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| SkeletonError::Io(e.into()))?;
        if entry.file_type().is_file() && is_image(entry.path()) {
            images.push(entry.into_path());
        }
    }
    fill_files(&images, options)
}

/// Overwrites the `.nii.gz` files among `paths` with random bytes.
///
/// Other paths are left untouched. Returns the number of files written.
pub fn fill_files<P: AsRef<Path>>(
    paths: &[P],
    options: &SimulateOptions,
) -> Result<usize, SkeletonError> {
    let mut rng = match options.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_rng(&mut rand::rng()),
    };

    let mut buffer = vec![0u8; 64 * 1024];
    let mut count = 0;

    for path in paths {
        let path = path.as_ref();
        if !is_image(path) {
            continue;
        }

        let mut writer = BufWriter::new(File::create(path)?);
        let mut remaining = options.fill_size;
        while remaining > 0 {
            let chunk = remaining.min(buffer.len());
            rng.fill_bytes(&mut buffer[..chunk]);
            writer.write_all(&buffer[..chunk])?;
            remaining -= chunk;
        }
        writer.flush()?;
        count += 1;
    }

    Ok(count)
}

fn is_image(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(".nii.gz"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_bundled_skeletons_parse() {
        for name in bundled_skeleton_names() {
            load_skeleton(name).expect("bundled skeleton should parse");
        }
    }

    #[test]
    fn test_simulate_dataset() {
        let dir = tempdir().expect("Failed to create temp dir");
        let dataset = simulate_dataset(dir.path(), "multi_ses_qsiprep.yaml", &SimulateOptions::default())
            .expect("dataset should simulate");

        assert_eq!(dataset, dir.path().join("simbids"));
        assert!(dataset.join("sub-01").is_dir());
        assert!(dataset.join("sub-01/ses-01").is_dir());
        assert!(dataset.join("sub-02/ses-02").is_dir());
        assert!(dataset.join("dataset_description.json").is_file());

        let t1w = dataset.join("sub-01/ses-01/anat/sub-01_ses-01_T1w.nii.gz");
        assert_eq!(fs::metadata(&t1w).expect("T1w should exist").len(), 0);
    }

    #[test]
    fn test_simulate_dataset_with_filled_files() {
        let dir = tempdir().expect("Failed to create temp dir");
        let options = SimulateOptions::default()
            .with_fill_files(true)
            .with_fill_size(100_000)
            .with_seed(7);
        let dataset = simulate_dataset(dir.path(), "single_ses_qsiprep.yaml", &options)
            .expect("dataset should simulate");

        let t1w = dataset.join("sub-01/ses-01/anat/sub-01_ses-01_T1w.nii.gz");
        assert_eq!(fs::metadata(&t1w).expect("T1w should exist").len(), 100_000);

        // Sidecars and gradient files are left untouched.
        let bval = dataset.join("sub-01/ses-01/dwi/sub-01_ses-01_acq-multishell_dwi.bval");
        assert_eq!(fs::metadata(&bval).expect("bval should exist").len(), 0);
    }

    #[test]
    fn test_seeded_fill_is_reproducible() {
        let dir = tempdir().expect("Failed to create temp dir");
        let options = SimulateOptions::default().with_fill_size(1024).with_seed(42);

        let a = dir.path().join("a.nii.gz");
        fs::write(&a, b"").expect("Failed to write file");
        fill_images(dir.path(), &options).expect("fill should succeed");
        let first = fs::read(&a).expect("Failed to read file");

        fill_images(dir.path(), &options).expect("fill should succeed");
        let second = fs::read(&a).expect("Failed to read file");

        assert_eq!(first.len(), 1024);
        assert_eq!(first, second);
    }

    #[test]
    fn test_fill_files_skips_non_images() {
        let dir = tempdir().expect("Failed to create temp dir");
        let image = dir.path().join("a_dwi.nii.gz");
        let table = dir.path().join("a_dwi.bval");
        fs::write(&image, b"").expect("Failed to write file");
        fs::write(&table, b"0 1000").expect("Failed to write file");

        let options = SimulateOptions::default().with_fill_size(10).with_seed(1);
        let filled = fill_files(&[&image, &table], &options).expect("fill should succeed");

        assert_eq!(filled, 1);
        assert_eq!(fs::read(&image).expect("Failed to read file").len(), 10);
        assert_eq!(fs::read(&table).expect("Failed to read file"), b"0 1000");
    }

    #[test]
    fn test_user_skeleton_from_disk() {
        let dir = tempdir().expect("Failed to create temp dir");
        let skeleton_path = dir.path().join("custom.yaml");
        fs::write(&skeleton_path, "\"01\":\n  anat:\n    suffix: T2w\n").expect("Failed to write skeleton");

        let out = dir.path().join("out");
        let dataset = simulate_dataset(
            &out,
            skeleton_path.to_str().expect("path is UTF-8"),
            &SimulateOptions::default(),
        )
        .expect("dataset should simulate");
        assert!(dataset.join("sub-01/anat/sub-01_T2w.nii.gz").is_file());
    }

    #[test]
    fn test_unknown_skeleton() {
        let dir = tempdir().expect("Failed to create temp dir");
        let result = simulate_dataset(dir.path(), "nonexistent.yaml", &SimulateOptions::default());
        assert!(matches!(result, Err(SkeletonError::SkeletonNotFound(_))));
    }
}
