//! BIDS skeleton generation.
//!
//! A skeleton is a YAML (or JSON) document describing a raw BIDS tree:
//!
//! ```yaml
//! dataset_description:
//!   Name: Example
//!   BIDSVersion: 1.6.0
//! "01":
//!   - session: "01"
//!     anat:
//!       - suffix: T1w
//!     dwi:
//!       - suffix: dwi
//!         acq: HASC55AP
//!         metadata:
//!           PhaseEncodingDirection: j
//! "02": "*"
//! ```
//!
//! Subjects map to a single session mapping, a list of session mappings, or
//! `"*"` to repeat the previous subject's sessions. Every file is created
//! empty; `metadata` becomes a JSON sidecar.
//!
//! [`Skeleton::from_index`] goes the other way and describes an existing
//! dataset, so a small copy of it can be regenerated.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use serde_yaml::{Mapping, Value};

use crate::error::SkeletonError;
use crate::layout::{DatasetIndex, IndexedFile, Query, QueryValue};

/// Extension used when a file entry does not name one.
pub const DEFAULT_EXTENSION: &str = ".nii.gz";

/// A parsed skeleton document.
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    pub dataset_description: Option<serde_json::Value>,
    pub subjects: Vec<SubjectEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectEntry {
    /// Label as written; the `sub-` prefix is optional.
    pub label: String,
    pub sessions: SubjectSessions,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubjectSessions {
    /// Copy the sessions of the previous subject.
    Repeat,
    Sessions(Vec<SessionEntry>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEntry {
    /// Session label; `None` writes files directly under the subject directory.
    pub label: Option<String>,
    /// Datatype directory name to the files it contains, in declaration order.
    pub datatypes: Vec<(String, Vec<SkeletonFile>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonFile {
    pub suffix: String,
    pub extension: String,
    pub metadata: Option<serde_json::Value>,
    /// Extra `key-value` pairs, in declaration order.
    pub entities: Vec<(String, String)>,
}

impl SkeletonFile {
    /// File name of this entry under the given `sub-X[_ses-Y]` prefix.
    pub fn file_name(&self, prefix: &str) -> String {
        format!(
            "{}{}_{}{}",
            prefix,
            combine_entities(&self.entities),
            self.suffix,
            self.extension
        )
    }

    /// Name of the JSON sidecar of this entry.
    pub fn sidecar_name(&self, prefix: &str) -> String {
        let name = self.file_name(prefix);
        let stem = if self.extension.is_empty() {
            name.as_str()
        } else {
            name.strip_suffix(self.extension.as_str()).unwrap_or(&name)
        };
        format!("{}.json", stem)
    }
}

impl Skeleton {
    /// Parses a YAML document. JSON documents are accepted as well.
    pub fn from_yaml_str(content: &str) -> Result<Self, SkeletonError> {
        let value: Value = serde_yaml::from_str(content)?;
        Self::from_value(&value)
    }

    /// Reads and parses a skeleton file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SkeletonError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SkeletonError::SkeletonNotFound(path.display().to_string()));
        }
        Self::from_yaml_str(&fs::read_to_string(path)?)
    }

    pub fn from_value(value: &Value) -> Result<Self, SkeletonError> {
        let map = value
            .as_mapping()
            .ok_or_else(|| invalid("skeleton root must be a mapping"))?;

        let mut skeleton = Skeleton {
            dataset_description: None,
            subjects: Vec::new(),
        };

        for (key, entry) in map {
            let key = scalar_string(key)
                .ok_or_else(|| invalid("subject keys must be scalars"))?;

            if key == "dataset_description" {
                skeleton.dataset_description = Some(serde_json::to_value(entry)?);
                continue;
            }

            let sessions = match entry {
                Value::String(s) if s == "*" => SubjectSessions::Repeat,
                Value::Mapping(m) => {
                    // A bare mapping is a single session without a label
                    let mut session = parse_session(m, &key)?;
                    session.label = None;
                    SubjectSessions::Sessions(vec![session])
                }
                Value::Sequence(items) => SubjectSessions::Sessions(
                    items
                        .iter()
                        .map(|item| {
                            item.as_mapping()
                                .ok_or_else(|| {
                                    invalid(&format!("sessions of subject '{}' must be mappings", key))
                                })
                                .and_then(|m| parse_session(m, &key))
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                _ => {
                    return Err(invalid(&format!(
                        "subject '{}' must map to a session, a list of sessions or \"*\"",
                        key
                    )))
                }
            };

            skeleton.subjects.push(SubjectEntry {
                label: key,
                sessions,
            });
        }

        Ok(skeleton)
    }
}

impl Skeleton {
    /// Describes the dataset behind `index`.
    ///
    /// Keeps the first `n_subjects` subjects and, for each of them, the first
    /// `n_sessions` sessions (both in sorted order). Data files keep their
    /// entities and extension; a JSON sidecar becomes the `metadata` of its
    /// NIfTI image, or of the first data file sharing its stem. Files outside a
    /// datatype directory are left out.
    pub fn from_index(
        index: &DatasetIndex,
        n_subjects: usize,
        n_sessions: usize,
    ) -> Result<Self, SkeletonError> {
        let description = index.root().join("dataset_description.json");
        let dataset_description = if description.is_file() {
            read_metadata(&description)?
        } else {
            None
        };

        let mut subjects = Vec::new();
        for subject in index.subjects().into_iter().take(n_subjects) {
            let query = Query::new().with_exact("subject", subject.as_str());
            let labels = index.sessions(Some(&subject));

            let sessions = if labels.is_empty() {
                let files = index.get(&query.with("session", QueryValue::None));
                vec![session_from_files(&files, None)?]
            } else {
                let mut sessions = Vec::new();
                for label in labels.into_iter().take(n_sessions) {
                    let files = index.get(&query.clone().with_exact("session", label.as_str()));
                    sessions.push(session_from_files(&files, Some(label))?);
                }
                sessions
            };

            subjects.push(SubjectEntry {
                label: subject,
                sessions: SubjectSessions::Sessions(sessions),
            });
        }

        tracing::info!(
            root = %index.root().display(),
            subjects = subjects.len(),
            "Built skeleton from dataset"
        );
        Ok(Skeleton {
            dataset_description,
            subjects,
        })
    }

    /// Serializes the skeleton in the document format [`Skeleton::from_yaml_str`] reads.
    pub fn to_yaml_string(&self) -> Result<String, SkeletonError> {
        let mut root = Mapping::new();
        if let Some(description) = &self.dataset_description {
            root.insert(
                Value::from("dataset_description"),
                serde_yaml::to_value(description)?,
            );
        }

        for subject in &self.subjects {
            let value = match &subject.sessions {
                SubjectSessions::Repeat => Value::from("*"),
                SubjectSessions::Sessions(sessions) => match sessions.as_slice() {
                    [only] if only.label.is_none() => Value::Mapping(session_mapping(only)?),
                    _ => Value::Sequence(
                        sessions
                            .iter()
                            .map(|s| session_mapping(s).map(Value::Mapping))
                            .collect::<Result<Vec<_>, _>>()?,
                    ),
                },
            };
            root.insert(Value::from(subject.label.clone()), value);
        }

        Ok(serde_yaml::to_string(&Value::Mapping(root))?)
    }
}

/// A data or sidecar file of one session, split into its naming parts.
struct FileParts<'a> {
    file: &'a IndexedFile,
    datatype: String,
    extension: String,
    /// Relative path without the extension.
    stem: &'a str,
}

impl FileParts<'_> {
    fn is_nifti(&self) -> bool {
        self.extension == ".nii.gz" || self.extension == ".nii"
    }
}

fn session_from_files(
    files: &[&IndexedFile],
    label: Option<String>,
) -> Result<SessionEntry, SkeletonError> {
    let parts: Vec<FileParts> = files
        .iter()
        .copied()
        .filter_map(|file| {
            let datatype = file.entity("datatype")?.to_string();
            let extension = file
                .entity("extension")
                .map(|e| e.to_string())
                .unwrap_or_default();
            let stem = file
                .relative
                .strip_suffix(extension.as_str())
                .unwrap_or(&file.relative);
            Some(FileParts {
                file,
                datatype,
                extension,
                stem,
            })
        })
        .collect();

    let data_stems: BTreeSet<&str> = parts
        .iter()
        .filter(|p| p.extension != ".json")
        .map(|p| p.stem)
        .collect();
    let (sidecars, data): (Vec<FileParts>, Vec<FileParts>) = parts
        .into_iter()
        .partition(|p| p.extension == ".json" && data_stems.contains(p.stem));

    let mut session = SessionEntry {
        label,
        datatypes: Vec::new(),
    };

    for part in &data {
        let Some((suffix, entities)) = split_file_name(part.stem) else {
            tracing::debug!(file = %part.file.relative, "Skipping file without a suffix");
            continue;
        };

        let carrier = data
            .iter()
            .filter(|d| d.stem == part.stem)
            .find(|d| d.is_nifti())
            .or_else(|| data.iter().find(|d| d.stem == part.stem))
            .map(|d| d.file.relative.as_str());
        let metadata = match sidecars.iter().find(|s| s.stem == part.stem) {
            Some(sidecar) if carrier == Some(part.file.relative.as_str()) => {
                read_metadata(&sidecar.file.path)?
            }
            _ => None,
        };

        let file = SkeletonFile {
            suffix,
            extension: part.extension.clone(),
            metadata,
            entities,
        };
        match session
            .datatypes
            .iter_mut()
            .find(|(datatype, _)| *datatype == part.datatype)
        {
            Some((_, files)) => files.push(file),
            None => session.datatypes.push((part.datatype.clone(), vec![file])),
        }
    }

    Ok(session)
}

/// Suffix and `key-value` pairs of a file stem, without `sub` and `ses`.
fn split_file_name(stem: &str) -> Option<(String, Vec<(String, String)>)> {
    let name = stem.rsplit('/').next().unwrap_or(stem);
    let mut pieces: Vec<&str> = name.split('_').collect();
    let suffix = pieces.pop().filter(|s| !s.is_empty() && !s.contains('-'))?;

    let entities = pieces
        .into_iter()
        .filter_map(|piece| piece.split_once('-'))
        .filter(|(key, _)| *key != "sub" && *key != "ses")
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    Some((suffix.to_string(), entities))
}

/// Reads a sidecar. Only JSON objects are kept as metadata.
fn read_metadata(path: &Path) -> Result<Option<serde_json::Value>, SkeletonError> {
    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    if value.is_object() {
        Ok(Some(value))
    } else {
        tracing::warn!(file = %path.display(), "Ignoring sidecar that is not a JSON object");
        Ok(None)
    }
}

fn session_mapping(session: &SessionEntry) -> Result<Mapping, SkeletonError> {
    let mut map = Mapping::new();
    if let Some(label) = &session.label {
        map.insert(Value::from("session"), Value::from(label.clone()));
    }
    for (datatype, files) in &session.datatypes {
        let files = files
            .iter()
            .map(file_mapping)
            .collect::<Result<Vec<_>, _>>()?;
        map.insert(Value::from(datatype.clone()), Value::Sequence(files));
    }
    Ok(map)
}

fn file_mapping(file: &SkeletonFile) -> Result<Value, SkeletonError> {
    let mut map = Mapping::new();
    map.insert(Value::from("suffix"), Value::from(file.suffix.clone()));
    for (key, value) in &file.entities {
        map.insert(Value::from(key.clone()), Value::from(value.clone()));
    }
    if file.extension != DEFAULT_EXTENSION {
        map.insert(Value::from("extension"), Value::from(file.extension.clone()));
    }
    if let Some(metadata) = &file.metadata {
        map.insert(Value::from("metadata"), serde_yaml::to_value(metadata)?);
    }
    Ok(Value::Mapping(map))
}

fn invalid(message: &str) -> SkeletonError {
    SkeletonError::InvalidStructure(message.to_string())
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_session(map: &Mapping, subject: &str) -> Result<SessionEntry, SkeletonError> {
    let mut session = SessionEntry {
        label: None,
        datatypes: Vec::new(),
    };

    for (key, value) in map {
        let key = scalar_string(key)
            .ok_or_else(|| invalid(&format!("keys under subject '{}' must be scalars", subject)))?;

        if key == "session" {
            session.label = match value {
                Value::Null => None,
                other => Some(scalar_string(other).ok_or_else(|| {
                    invalid(&format!("session label of subject '{}' must be a scalar", subject))
                })?),
            };
            continue;
        }

        let files = match value {
            Value::Mapping(m) => vec![parse_file(m, subject, &key)?],
            Value::Sequence(items) => items
                .iter()
                .map(|item| {
                    item.as_mapping()
                        .ok_or_else(|| {
                            invalid(&format!("'{}' files of subject '{}' must be mappings", key, subject))
                        })
                        .and_then(|m| parse_file(m, subject, &key))
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => {
                return Err(invalid(&format!(
                    "datatype '{}' of subject '{}' must map to a file or a list of files",
                    key, subject
                )))
            }
        };
        session.datatypes.push((key, files));
    }

    Ok(session)
}

fn parse_file(map: &Mapping, subject: &str, datatype: &str) -> Result<SkeletonFile, SkeletonError> {
    let mut suffix = None;
    let mut extension = None;
    let mut metadata = None;
    let mut entities = Vec::new();

    for (key, value) in map {
        let key = scalar_string(key).ok_or_else(|| invalid("file keys must be scalars"))?;
        match key.as_str() {
            "metadata" => {
                if !value.is_null() {
                    metadata = Some(serde_json::to_value(value)?);
                }
            }
            other => {
                let value = scalar_string(value).ok_or_else(|| {
                    invalid(&format!(
                        "'{}' of a '{}' file of subject '{}' must be a scalar",
                        other, datatype, subject
                    ))
                })?;
                match other {
                    "suffix" => suffix = Some(value),
                    "extension" => extension = Some(value),
                    _ => entities.push((key, value)),
                }
            }
        }
    }

    let suffix = suffix.ok_or_else(|| {
        invalid(&format!(
            "a '{}' file of subject '{}' has no suffix",
            datatype, subject
        ))
    })?;

    Ok(SkeletonFile {
        suffix,
        extension: extension.unwrap_or_else(|| DEFAULT_EXTENSION.to_string()),
        metadata,
        entities,
    })
}

/// Joins entity pairs into a file name fragment: `_acq-a_run-1`, or the empty string.
pub fn combine_entities(entities: &[(String, String)]) -> String {
    entities
        .iter()
        .map(|(key, value)| format!("_{}-{}", key, value))
        .collect()
}

fn with_prefix(label: &str, prefix: &str) -> String {
    if label.starts_with(prefix) {
        label.to_string()
    } else {
        format!("{}{}", prefix, label)
    }
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<(), SkeletonError> {
    fs::write(path, serde_json::to_string(value)?)?;
    Ok(())
}

/// Creates the BIDS tree described by `skeleton` at `target`.
///
/// `target` must not exist. Returns the data files created, in creation order.
pub fn generate_bids_skeleton<P: AsRef<Path>>(
    target: P,
    skeleton: &Skeleton,
) -> Result<Vec<PathBuf>, SkeletonError> {
    let root = target.as_ref();
    if root.exists() {
        return Err(SkeletonError::TargetExists(root.display().to_string()));
    }
    fs::create_dir_all(root)?;

    let description = skeleton
        .dataset_description
        .clone()
        .unwrap_or_else(|| json!({"Name": "Default", "BIDSVersion": "1.6.0"}));
    write_json(&root.join("dataset_description.json"), &description)?;

    let mut created = Vec::new();
    let mut previous: Option<&Vec<SessionEntry>> = None;

    for subject in &skeleton.subjects {
        let bids_subject = with_prefix(&subject.label, "sub-");
        let subject_dir = root.join(&bids_subject);
        fs::create_dir_all(&subject_dir)?;

        let sessions = match &subject.sessions {
            SubjectSessions::Repeat => {
                previous.ok_or_else(|| SkeletonError::NothingToRepeat(subject.label.clone()))?
            }
            SubjectSessions::Sessions(sessions) => sessions,
        };
        previous = Some(sessions);

        for session in sessions {
            let (prefix, session_dir) = match &session.label {
                Some(label) => {
                    let bids_session = with_prefix(label, "ses-");
                    let dir = subject_dir.join(&bids_session);
                    fs::create_dir_all(&dir)?;
                    (format!("{}_{}", bids_subject, bids_session), dir)
                }
                None => (bids_subject.clone(), subject_dir.clone()),
            };

            for (datatype, files) in &session.datatypes {
                let datatype_dir = session_dir.join(datatype);
                fs::create_dir_all(&datatype_dir)?;

                for file in files {
                    let data_file = datatype_dir.join(file.file_name(&prefix));
                    fs::write(&data_file, b"")?;

                    if let Some(metadata) = &file.metadata {
                        write_json(&datatype_dir.join(file.sidecar_name(&prefix)), metadata)?;
                    }
                    created.push(data_file);
                }
            }
        }

        tracing::debug!(subject = %bids_subject, "Generated subject skeleton");
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MULTI: &str = r#"
dataset_description:
  Name: Test
  BIDSVersion: 1.9.0
"01":
  - session: "01"
    anat:
      - suffix: T1w
        metadata:
          EchoTime: 0.003
    dwi:
      - suffix: dwi
        acq: HASC55
        dir: AP
        metadata:
          PhaseEncodingDirection: j
      - suffix: dwi
        extension: .bval
        acq: HASC55
        dir: AP
  - session: ses-02
    anat:
      suffix: T1w
"sub-02": "*"
"#;

    #[test]
    fn test_parse_skeleton() {
        let skeleton = Skeleton::from_yaml_str(MULTI).expect("skeleton should parse");
        assert_eq!(
            skeleton.dataset_description,
            Some(json!({"Name": "Test", "BIDSVersion": "1.9.0"}))
        );
        assert_eq!(skeleton.subjects.len(), 2);
        assert_eq!(skeleton.subjects[1].sessions, SubjectSessions::Repeat);

        let SubjectSessions::Sessions(sessions) = &skeleton.subjects[0].sessions else {
            panic!("expected sessions");
        };
        assert_eq!(sessions[0].label.as_deref(), Some("01"));
        let (datatype, dwi) = &sessions[0].datatypes[1];
        assert_eq!(datatype, "dwi");
        assert_eq!(
            dwi[0].entities,
            vec![
                ("acq".to_string(), "HASC55".to_string()),
                ("dir".to_string(), "AP".to_string())
            ]
        );
        assert_eq!(dwi[0].extension, ".nii.gz");
        assert_eq!(dwi[1].extension, ".bval");
    }

    #[test]
    fn test_generate_tree() {
        let dir = tempdir().expect("Failed to create temp dir");
        let root = dir.path().join("bids");
        let skeleton = Skeleton::from_yaml_str(MULTI).expect("skeleton should parse");
        let created = generate_bids_skeleton(&root, &skeleton).expect("skeleton should generate");

        // 4 files for sub-01, repeated for sub-02.
        assert_eq!(created.len(), 8);
        for relative in [
            "dataset_description.json",
            "sub-01/ses-01/anat/sub-01_ses-01_T1w.nii.gz",
            "sub-01/ses-01/anat/sub-01_ses-01_T1w.json",
            "sub-01/ses-01/dwi/sub-01_ses-01_acq-HASC55_dir-AP_dwi.nii.gz",
            "sub-01/ses-01/dwi/sub-01_ses-01_acq-HASC55_dir-AP_dwi.json",
            "sub-01/ses-01/dwi/sub-01_ses-01_acq-HASC55_dir-AP_dwi.bval",
            "sub-01/ses-02/anat/sub-01_ses-02_T1w.nii.gz",
            "sub-02/ses-01/dwi/sub-02_ses-01_acq-HASC55_dir-AP_dwi.nii.gz",
            "sub-02/ses-02/anat/sub-02_ses-02_T1w.nii.gz",
        ] {
            assert!(root.join(relative).is_file(), "missing {}", relative);
        }

        let sidecar: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(root.join("sub-01/ses-01/dwi/sub-01_ses-01_acq-HASC55_dir-AP_dwi.json"))
                .expect("sidecar should exist"),
        )
        .expect("sidecar should be JSON");
        assert_eq!(sidecar["PhaseEncodingDirection"], "j");
    }

    #[test]
    fn test_default_description_and_single_session() {
        let dir = tempdir().expect("Failed to create temp dir");
        let root = dir.path().join("bids");
        let skeleton = Skeleton::from_yaml_str(
            r#"
"01":
  anat:
    - suffix: T1w
      run: 1
"#,
        )
        .expect("skeleton should parse");
        generate_bids_skeleton(&root, &skeleton).expect("skeleton should generate");

        let description: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(root.join("dataset_description.json")).expect("should exist"),
        )
        .expect("should be JSON");
        assert_eq!(description, json!({"Name": "Default", "BIDSVersion": "1.6.0"}));
        assert!(root.join("sub-01/anat/sub-01_run-1_T1w.nii.gz").is_file());
    }

    #[test]
    fn test_target_must_not_exist() {
        let dir = tempdir().expect("Failed to create temp dir");
        let skeleton = Skeleton::from_yaml_str("\"01\":\n  anat:\n    suffix: T1w\n")
            .expect("skeleton should parse");
        let result = generate_bids_skeleton(dir.path(), &skeleton);
        assert!(matches!(result, Err(SkeletonError::TargetExists(_))));
    }

    #[test]
    fn test_repeat_without_previous_subject() {
        let dir = tempdir().expect("Failed to create temp dir");
        let skeleton = Skeleton::from_yaml_str("\"01\": \"*\"\n").expect("skeleton should parse");
        let result = generate_bids_skeleton(dir.path().join("bids"), &skeleton);
        assert!(matches!(result, Err(SkeletonError::NothingToRepeat(_))));
    }

    #[test]
    fn test_invalid_structures() {
        for bad in [
            "- 1\n- 2\n",
            "\"01\": 5\n",
            "\"01\":\n  anat:\n    - extension: .nii\n",
            "\"01\":\n  anat: T1w\n",
            "\"01\":\n  - anat\n",
        ] {
            assert!(
                matches!(Skeleton::from_yaml_str(bad), Err(SkeletonError::InvalidStructure(_))),
                "expected invalid structure for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_combine_entities() {
        assert_eq!(combine_entities(&[]), "");
        assert_eq!(
            combine_entities(&[
                ("acq".to_string(), "a".to_string()),
                ("run".to_string(), "1".to_string())
            ]),
            "_acq-a_run-1"
        );
    }

    #[test]
    fn test_sidecar_name_replaces_trailing_extension_only() {
        let file = SkeletonFile {
            suffix: "T1w".to_string(),
            extension: String::new(),
            metadata: None,
            entities: vec![("acq".to_string(), "nii".to_string())],
        };
        assert_eq!(file.sidecar_name("sub-01"), "sub-01_acq-nii_T1w.json");

        let file = SkeletonFile {
            extension: ".nii".to_string(),
            ..file
        };
        assert_eq!(file.sidecar_name("sub-01"), "sub-01_acq-nii_T1w.json");
    }

    #[test]
    fn test_generate_file_without_extension() {
        let dir = tempdir().expect("Failed to create temp dir");
        let root = dir.path().join("bids");
        let skeleton = Skeleton::from_yaml_str(
            "\"01\":\n  anat:\n    - suffix: T1w\n      extension: \"\"\n      metadata:\n        EchoTime: 0.003\n",
        )
        .expect("skeleton should parse");
        generate_bids_skeleton(&root, &skeleton).expect("skeleton should generate");

        assert!(root.join("sub-01/anat/sub-01_T1w").is_file());
        assert!(root.join("sub-01/anat/sub-01_T1w.json").is_file());
    }

    fn relative_files(root: &Path) -> BTreeSet<String> {
        walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                e.path()
                    .strip_prefix(root)
                    .ok()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
            })
            .collect()
    }

    fn index_of(root: &Path) -> DatasetIndex {
        let config = crate::layout::LayoutConfig::bundled("bids").expect("config should compile");
        DatasetIndex::build(root, &config).expect("index should build")
    }

    #[test]
    fn test_from_index_regenerates_dataset() {
        let dir = tempdir().expect("Failed to create temp dir");
        let original = dir.path().join("original");
        let skeleton = Skeleton::from_yaml_str(MULTI).expect("skeleton should parse");
        generate_bids_skeleton(&original, &skeleton).expect("skeleton should generate");

        let extracted = Skeleton::from_index(&index_of(&original), 10, 10)
            .expect("skeleton should build from index");
        assert_eq!(extracted.subjects.len(), 2);

        let copy = dir.path().join("copy");
        generate_bids_skeleton(&copy, &extracted).expect("skeleton should generate");
        assert_eq!(relative_files(&original), relative_files(&copy));

        let sidecar = "sub-02/ses-01/dwi/sub-02_ses-01_acq-HASC55_dir-AP_dwi.json";
        let read = |root: &Path| -> serde_json::Value {
            serde_json::from_str(&fs::read_to_string(root.join(sidecar)).expect("sidecar should exist"))
                .expect("sidecar should be JSON")
        };
        assert_eq!(read(&copy), read(&original));
        assert_eq!(extracted.dataset_description, skeleton.dataset_description);

        let reparsed = Skeleton::from_yaml_str(&extracted.to_yaml_string().expect("should serialize"))
            .expect("serialized skeleton should parse");
        assert_eq!(reparsed, extracted);
    }

    #[test]
    fn test_from_index_limits_subjects_and_sessions() {
        let dir = tempdir().expect("Failed to create temp dir");
        let original = dir.path().join("original");
        let skeleton = Skeleton::from_yaml_str(MULTI).expect("skeleton should parse");
        generate_bids_skeleton(&original, &skeleton).expect("skeleton should generate");

        let extracted = Skeleton::from_index(&index_of(&original), 1, 1)
            .expect("skeleton should build from index");
        assert_eq!(extracted.subjects.len(), 1);
        assert_eq!(extracted.subjects[0].label, "01");
        let SubjectSessions::Sessions(sessions) = &extracted.subjects[0].sessions else {
            panic!("expected sessions");
        };
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].label.as_deref(), Some("01"));

        let (datatype, dwi) = &sessions[0].datatypes[1];
        assert_eq!(datatype, "dwi");
        assert_eq!(dwi.len(), 2);
        let nifti = dwi
            .iter()
            .find(|f| f.extension == ".nii.gz")
            .expect("dwi image should be listed");
        assert_eq!(
            nifti.entities,
            vec![
                ("acq".to_string(), "HASC55".to_string()),
                ("dir".to_string(), "AP".to_string())
            ]
        );
        assert_eq!(nifti.metadata, Some(json!({"PhaseEncodingDirection": "j"})));
        assert!(dwi.iter().any(|f| f.extension == ".bval" && f.metadata.is_none()));
    }

    #[test]
    fn test_from_index_without_sessions() {
        let dir = tempdir().expect("Failed to create temp dir");
        let original = dir.path().join("original");
        let skeleton = Skeleton::from_yaml_str("\"01\":\n  anat:\n    - suffix: T1w\n      run: 1\n")
            .expect("skeleton should parse");
        generate_bids_skeleton(&original, &skeleton).expect("skeleton should generate");

        let extracted = Skeleton::from_index(&index_of(&original), 5, 5)
            .expect("skeleton should build from index");
        let SubjectSessions::Sessions(sessions) = &extracted.subjects[0].sessions else {
            panic!("expected sessions");
        };
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].label.is_none());

        let copy = dir.path().join("copy");
        generate_bids_skeleton(&copy, &extracted).expect("skeleton should generate");
        assert_eq!(relative_files(&original), relative_files(&copy));
    }

    #[test]
    fn test_missing_skeleton_file() {
        let result = Skeleton::from_file("/nonexistent/skeleton.yaml");
        assert!(matches!(result, Err(SkeletonError::SkeletonNotFound(_))));
    }
}
