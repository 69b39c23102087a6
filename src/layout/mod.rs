//! BIDS layout configuration: entity tables and path patterns.
//!
//! A layout configuration is a JSON document with three keys:
//!
//! ```json
//! {
//!     "name": "qsiprep",
//!     "entities": [{"name": "subject", "pattern": "(?:^|/)sub-([a-zA-Z0-9]+)"}],
//!     "default_path_patterns": ["sub-{subject}/{datatype<anat>|anat}/sub-{subject}_{suffix}{extension}"]
//! }
//! ```
//!
//! Configurations are compiled once into an immutable [`LayoutConfig`] which
//! can be shared across threads behind an `Arc`.
//!
//! # Example
//!
//! ```ignore
//! use simbids::layout::LayoutConfig;
//!
//! let config = LayoutConfig::bundled("qsiprep")?;
//! let entities = config.extract_entities("sub-01/anat/sub-01_T1w.nii.gz")?;
//! let path = config.build_path(&entities)?;
//! ```

pub mod entity;
pub mod index;
pub mod pattern;

pub use entity::{Dtype, Entity, EntityDefinition, EntityMap, EntityTable, EntityValue, PaddedInt};
pub use index::{DatasetIndex, IndexedFile, Query, QueryValue};
pub use pattern::{build_path, BuildOptions, PathPattern, Placeholder, Segment};

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PatternError};

/// Base BIDS entity table that every bundled configuration extends.
const BIDS_CONFIG: &str = include_str!("../../data/bids.json");
const SIMBIDS_CONFIG: &str = include_str!("../../data/io_spec.json");
const QSIPREP_CONFIG: &str = include_str!("../../data/qsiprep_io_spec.json");
const QSIRECON_CONFIG: &str = include_str!("../../data/qsirecon_io_spec.json");

/// Names accepted by [`LayoutConfig::bundled`].
pub const BUNDLED_CONFIGS: &[&str] = &["bids", "simbids", "qsiprep", "qsirecon"];

/// Serialized layout configuration, before compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutConfigFile {
    pub name: String,
    #[serde(default)]
    pub entities: Vec<EntityDefinition>,
    #[serde(default)]
    pub default_path_patterns: Vec<String>,
}

impl LayoutConfigFile {
    /// Parses a configuration document. `origin` is only used in error messages.
    pub fn from_json_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Reads a configuration document from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content, &path.display().to_string())
    }

    /// Layers `overlay` on top of this configuration.
    ///
    /// Overlay entities replace base entities with the same name in place; new
    /// entities are appended. A non-empty overlay pattern list replaces the
    /// base patterns. The overlay's name wins.
    pub fn merge(mut self, overlay: LayoutConfigFile) -> Self {
        for def in overlay.entities {
            match self.entities.iter_mut().find(|e| e.name == def.name) {
                Some(existing) => *existing = def,
                None => self.entities.push(def),
            }
        }
        if !overlay.default_path_patterns.is_empty() {
            self.default_path_patterns = overlay.default_path_patterns;
        }
        if !overlay.name.is_empty() {
            self.name = overlay.name;
        }
        self
    }
}

/// A compiled, validated layout configuration.
#[derive(Debug, Clone)]
pub struct LayoutConfig {
    name: String,
    definitions: Vec<EntityDefinition>,
    entities: EntityTable,
    patterns: Vec<PathPattern>,
}

impl LayoutConfig {
    /// Compiles a configuration document.
    ///
    /// Fails if entity names repeat, an entity regex is invalid or does not have
    /// exactly one capture group, a dtype is unknown, a pattern does not parse,
    /// or a pattern references an entity missing from the table.
    pub fn compile(file: LayoutConfigFile) -> Result<Self, ConfigError> {
        let entities = EntityTable::from_definitions(&file.entities)?;

        let patterns = file
            .default_path_patterns
            .iter()
            .map(|p| PathPattern::parse(p))
            .collect::<Result<Vec<_>, PatternError>>()?;

        // Validate placeholder references
        for pattern in &patterns {
            if let Some(unknown) = pattern
                .entity_names()
                .into_iter()
                .find(|name| !entities.contains(name))
            {
                return Err(ConfigError::UnknownEntity {
                    pattern: pattern.as_str().to_string(),
                    entity: unknown.to_string(),
                });
            }
        }

        tracing::debug!(
            name = %file.name,
            entities = entities.len(),
            patterns = patterns.len(),
            "Compiled layout configuration"
        );

        Ok(Self {
            name: file.name,
            definitions: file.entities,
            entities,
            patterns,
        })
    }

    /// Compiles a standalone configuration document.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        Self::compile(LayoutConfigFile::from_json_str(content, "<string>")?)
    }

    /// Loads and compiles a standalone configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::compile(LayoutConfigFile::from_file(path)?)
    }

    /// Loads a configuration file and layers it over the base BIDS entity table.
    pub fn from_overlay_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let base = LayoutConfigFile::from_json_str(BIDS_CONFIG, "bids.json")?;
        Self::compile(base.merge(LayoutConfigFile::from_file(path)?))
    }

    /// Returns one of the bundled configurations.
    ///
    /// `bids` is the raw BIDS table; `simbids`, `qsiprep` and `qsirecon` are
    /// derivative configurations layered over it.
    pub fn bundled(name: &str) -> Result<Self, ConfigError> {
        let base = LayoutConfigFile::from_json_str(BIDS_CONFIG, "bids.json")?;
        let overlay = match name {
            "bids" => return Self::compile(base),
            "simbids" => LayoutConfigFile::from_json_str(SIMBIDS_CONFIG, "io_spec.json")?,
            "qsiprep" => LayoutConfigFile::from_json_str(QSIPREP_CONFIG, "qsiprep_io_spec.json")?,
            "qsirecon" => {
                LayoutConfigFile::from_json_str(QSIRECON_CONFIG, "qsirecon_io_spec.json")?
            }
            other => return Err(ConfigError::NotFound(other.to_string())),
        };
        Self::compile(base.merge(overlay))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }

    pub fn patterns(&self) -> &[PathPattern] {
        &self.patterns
    }

    /// Serialized form of this configuration.
    pub fn to_file(&self) -> LayoutConfigFile {
        LayoutConfigFile {
            name: self.name.clone(),
            entities: self.definitions.clone(),
            default_path_patterns: self
                .patterns
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
        }
    }

    /// Extracts every entity of this configuration from `path`.
    pub fn extract_entities(&self, path: &str) -> Result<EntityMap, PatternError> {
        self.entities.extract(path)
    }

    /// Builds a relative path from entity values with default options.
    pub fn build_path(&self, entities: &EntityMap) -> Result<String, PatternError> {
        build_path(entities, &self.patterns, BuildOptions::default())
    }

    pub fn build_path_with(
        &self,
        entities: &EntityMap,
        options: BuildOptions,
    ) -> Result<String, PatternError> {
        build_path(entities, &self.patterns, options)
    }
}
