//! In-memory index of the files in a BIDS dataset.
//!
//! The index walks a dataset root once, extracts entities from every file with
//! a [`LayoutConfig`], and answers entity queries against the result.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde_json::Value;
use walkdir::WalkDir;

use crate::error::{ConfigError, IndexError};
use crate::layout::entity::{EntityMap, EntityValue, PaddedInt};
use crate::layout::LayoutConfig;

/// Top-level directories that never hold raw data.
const SKIPPED_DIRS: &[&str] = &["derivatives", "sourcedata", "code"];

/// A file in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedFile {
    /// Absolute (or root-joined) path to the file.
    pub path: PathBuf,
    /// Path relative to the dataset root, with `/` separators.
    pub relative: String,
    pub entities: EntityMap,
}

impl IndexedFile {
    pub fn entity(&self, name: &str) -> Option<&EntityValue> {
        self.entities.get(name)
    }
}

/// Constraint on a single entity in a [`Query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    /// The entity is present with this value.
    Exact(EntityValue),
    /// The entity is present with one of these values.
    AnyOf(Vec<EntityValue>),
    /// The entity is present with any value.
    Any,
    /// The entity is absent.
    None,
}

impl QueryValue {
    fn accepts(&self, name: &str, value: Option<&EntityValue>) -> bool {
        match (self, value) {
            (QueryValue::None, v) => v.is_none(),
            (QueryValue::Any, v) => v.is_some(),
            (QueryValue::Exact(expected), Some(v)) => value_matches(name, expected, v),
            (QueryValue::AnyOf(options), Some(v)) => {
                options.iter().any(|o| value_matches(name, o, v))
            }
            (_, None) => false,
        }
    }
}

fn value_matches(name: &str, expected: &EntityValue, actual: &EntityValue) -> bool {
    if name == "extension" {
        let strip = |v: &EntityValue| v.to_string().trim_start_matches('.').to_string();
        return strip(expected) == strip(actual);
    }
    expected.matches(actual)
}

/// A set of entity constraints. Entities not mentioned are unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    filters: BTreeMap<String, QueryValue>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the constraint on `entity`.
    pub fn with(mut self, entity: impl Into<String>, value: QueryValue) -> Self {
        self.filters.insert(entity.into(), value);
        self
    }

    /// Shorthand for an [`QueryValue::Exact`] constraint.
    pub fn with_exact(self, entity: impl Into<String>, value: impl Into<EntityValue>) -> Self {
        self.with(entity, QueryValue::Exact(value.into()))
    }

    /// Layers the constraints of `other` over this query.
    pub fn merged(mut self, other: &Query) -> Self {
        for (k, v) in &other.filters {
            self.filters.insert(k.clone(), v.clone());
        }
        self
    }

    pub fn get(&self, entity: &str) -> Option<&QueryValue> {
        self.filters.get(entity)
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Returns true if `entities` satisfy every constraint.
    pub fn matches(&self, entities: &EntityMap) -> bool {
        self.filters
            .iter()
            .all(|(name, constraint)| constraint.accepts(name, entities.get(name)))
    }

    /// Parses a JSON object of entity constraints.
    ///
    /// `null` means the entity must be absent, `"*"` means any value, an array
    /// lists accepted values, and a string or integer is an exact value.
    pub fn from_json(value: &Value) -> Result<Self, ConfigError> {
        let Value::Object(map) = value else {
            return Err(ConfigError::InvalidValue {
                key: "bids_filters".to_string(),
                message: "query must be a JSON object".to_string(),
            });
        };

        let mut query = Query::new();
        for (entity, raw) in map {
            let constraint = match raw {
                Value::Null => QueryValue::None,
                Value::String(s) if s == "*" => QueryValue::Any,
                Value::Array(items) => QueryValue::AnyOf(
                    items
                        .iter()
                        .map(|item| json_entity_value(entity, item))
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                other => QueryValue::Exact(json_entity_value(entity, other)?),
            };
            query.filters.insert(entity.clone(), constraint);
        }
        Ok(query)
    }
}

fn json_entity_value(entity: &str, value: &Value) -> Result<EntityValue, ConfigError> {
    match value {
        Value::String(s) => Ok(EntityValue::from(s.as_str())),
        Value::Number(n) => n
            .as_i64()
            .map(|i| EntityValue::Int(PaddedInt::new(i)))
            .ok_or_else(|| ConfigError::InvalidValue {
                key: entity.to_string(),
                message: format!("'{}' is not an integer", n),
            }),
        other => Err(ConfigError::InvalidValue {
            key: entity.to_string(),
            message: format!("unsupported filter value {}", other),
        }),
    }
}

/// Indexed files of one BIDS dataset.
#[derive(Debug, Clone)]
pub struct DatasetIndex {
    root: PathBuf,
    files: Vec<IndexedFile>,
}

impl DatasetIndex {
    /// Walks `root` and extracts entities from every file.
    ///
    /// Hidden entries and the top-level `derivatives`, `sourcedata` and `code`
    /// directories are skipped. Files with malformed entity values are skipped
    /// with a warning.
    pub fn build<P: AsRef<Path>>(root: P, config: &LayoutConfig) -> Result<Self, IndexError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(IndexError::RootNotFound(root.display().to_string()));
        }

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                if entry.depth() == 0 {
                    return true;
                }
                if name.starts_with('.') {
                    return false;
                }
                !(entry.depth() == 1
                    && entry.file_type().is_dir()
                    && SKIPPED_DIRS.contains(&&*name))
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            match config.extract_entities(&relative) {
                Ok(entities) => files.push(IndexedFile {
                    path: entry.path().to_path_buf(),
                    relative,
                    entities,
                }),
                Err(e) => {
                    tracing::warn!(file = %relative, error = %e, "Skipping file with malformed entities");
                }
            }
        }

        tracing::debug!(root = %root.display(), files = files.len(), "Indexed dataset");

        Ok(Self {
            root: root.to_path_buf(),
            files,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[IndexedFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Returns the files matching `query`, sorted by path.
    pub fn get(&self, query: &Query) -> Vec<&IndexedFile> {
        self.files
            .iter()
            .filter(|f| query.matches(&f.entities))
            .collect()
    }

    /// Sorted, de-duplicated subject labels.
    pub fn subjects(&self) -> Vec<String> {
        self.unique_values("subject", &Query::new())
    }

    /// Sorted, de-duplicated session labels, optionally restricted to one subject.
    pub fn sessions(&self, subject: Option<&str>) -> Vec<String> {
        let query = match subject {
            Some(s) => Query::new().with_exact("subject", s),
            None => Query::new(),
        };
        self.unique_values("session", &query)
    }

    fn unique_values(&self, entity: &str, query: &Query) -> Vec<String> {
        self.get(query)
            .into_iter()
            .filter_map(|f| f.entity(entity).map(|v| v.to_string()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
