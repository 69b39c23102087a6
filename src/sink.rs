//! Derivatives data sink.
//!
//! A sink names an output file from the entities of a source file plus
//! overrides, then writes it under a base directory:
//!
//! ```ignore
//! let sink = DerivativesSink::new(output_dir, config);
//! let request = SinkRequest::new(dwi_file)
//!     .copy_from(dwi_file)
//!     .with_entity("space", "ACPC")
//!     .with_entity("desc", "preproc");
//! let written = sink.write(&request)?;
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::SinkError;
use crate::layout::{EntityMap, EntityValue, LayoutConfig};

/// What to write into the output file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SinkContent {
    /// Create an empty file.
    #[default]
    Empty,
    /// Copy the bytes of an existing file.
    CopyFrom(PathBuf),
    /// Write the given text.
    Text(String),
}

/// One file to be written by a [`DerivativesSink`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SinkRequest {
    /// File whose entities seed the output name.
    pub source_file: PathBuf,
    pub content: SinkContent,
    /// Entity overrides; these win over entities of the source file.
    pub entities: EntityMap,
    /// Written to a `.json` sidecar next to the output when present.
    pub metadata: Option<Map<String, Value>>,
}

impl SinkRequest {
    pub fn new(source_file: impl Into<PathBuf>) -> Self {
        Self {
            source_file: source_file.into(),
            ..Default::default()
        }
    }

    pub fn with_entity(mut self, name: impl Into<String>, value: impl Into<EntityValue>) -> Self {
        self.entities.insert(name.into(), value.into());
        self
    }

    pub fn copy_from(mut self, in_file: impl Into<PathBuf>) -> Self {
        self.content = SinkContent::CopyFrom(in_file.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.content = SinkContent::Text(text.into());
        self
    }

    /// Adds one metadata key for the sidecar.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Writes derivative files named by a layout configuration.
#[derive(Debug, Clone)]
pub struct DerivativesSink {
    base_directory: PathBuf,
    config: Arc<LayoutConfig>,
}

impl DerivativesSink {
    pub fn new(base_directory: impl Into<PathBuf>, config: Arc<LayoutConfig>) -> Self {
        Self {
            base_directory: base_directory.into(),
            config,
        }
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Entities the output of `request` is named from.
    ///
    /// Source entities come first, then the extension of the copied file, then
    /// explicit overrides.
    pub fn entities_for(&self, request: &SinkRequest) -> Result<EntityMap, SinkError> {
        let mut entities = self.config.extract_entities(&source_key(&request.source_file)?)?;

        if let SinkContent::CopyFrom(in_file) = &request.content {
            if let Some(extension) = self.extension_of(in_file)? {
                entities.insert("extension".to_string(), extension);
            }
        }

        for (name, value) in &request.entities {
            entities.insert(name.clone(), value.clone());
        }
        Ok(entities)
    }

    /// Path the output of `request` would be written to, without writing it.
    pub fn resolve(&self, request: &SinkRequest) -> Result<PathBuf, SinkError> {
        let entities = self.entities_for(request)?;
        let relative = self.config.build_path(&entities)?;
        Ok(self.base_directory.join(relative))
    }

    /// Writes the output of `request` and its sidecar. Returns the output path.
    pub fn write(&self, request: &SinkRequest) -> Result<PathBuf, SinkError> {
        let entities = self.entities_for(request)?;
        let relative = self.config.build_path(&entities)?;
        let out_path = self.base_directory.join(&relative);

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        match &request.content {
            SinkContent::Empty => fs::write(&out_path, b"")?,
            SinkContent::CopyFrom(in_file) => {
                fs::copy(in_file, &out_path)?;
            }
            SinkContent::Text(text) => fs::write(&out_path, text)?,
        }

        if let Some(metadata) = &request.metadata {
            // The built name may carry a pattern default, so read it back.
            let extension = self
                .extension_of(&out_path)?
                .map(|e| format!(".{}", e.to_string().trim_start_matches('.')))
                .unwrap_or_default();
            let stem = relative
                .strip_suffix(extension.as_str())
                .filter(|_| !extension.is_empty())
                .unwrap_or(&relative);
            let sidecar = self.base_directory.join(format!("{}.json", stem));
            fs::write(&sidecar, serde_json::to_string_pretty(metadata)?)?;
        }

        tracing::debug!(output = %out_path.display(), "Wrote derivative");
        Ok(out_path)
    }

    fn extension_of(&self, file: &Path) -> Result<Option<EntityValue>, SinkError> {
        let Some(entity) = self.config.entities().get("extension") else {
            return Ok(None);
        };
        let name = file
            .file_name()
            .ok_or_else(|| SinkError::InvalidSource(file.display().to_string()))?;
        Ok(entity.extract(&format!("/{}", name.to_string_lossy()))?)
    }
}

/// `/<parent>/<file name>` of a source file.
///
/// Only the datatype directory and the file name carry entities; the rest of
/// the path is left out so that unrelated directories cannot match.
fn source_key(source: &Path) -> Result<String, SinkError> {
    let name = source
        .file_name()
        .ok_or_else(|| SinkError::InvalidSource(source.display().to_string()))?
        .to_string_lossy();
    let parent = source
        .parent()
        .and_then(|p| p.file_name())
        .map(|p| p.to_string_lossy())
        .unwrap_or_default();
    Ok(format!("/{}/{}", parent, name))
}
