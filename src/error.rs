//! Error types for SimBIDS operations.
//!
//! Defines error types for each subsystem:
//! - Entity extraction and path building
//! - Layout configuration loading
//! - Dataset indexing
//! - Dataset skeleton generation
//! - Derivative sinks and dataset descriptions
//! - Participant workflows

use thiserror::Error;

/// Errors raised while extracting entities from a path or building a path from entities.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("Malformed value '{value}' for entity '{entity}': {reason}")]
    MalformedEntityValue {
        entity: String,
        value: String,
        reason: String,
    },

    #[error("Invalid value '{value}' for entity '{entity}': must be one of [{}]", choices.join(", "))]
    InvalidEnumValue {
        entity: String,
        value: String,
        choices: Vec<String>,
    },

    #[error("No path pattern matches the supplied entities: {0}")]
    NoMatchingPattern(String),

    #[error("Invalid path pattern '{pattern}': {message}")]
    Syntax { pattern: String, message: String },
}

/// Errors that can occur while loading a layout configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Duplicate entity name '{0}' in configuration")]
    DuplicateEntity(String),

    #[error("Invalid regex pattern '{pattern}' for entity '{entity}': {message}")]
    InvalidEntityPattern {
        entity: String,
        pattern: String,
        message: String,
    },

    #[error("Entity '{entity}' pattern must have exactly one capture group, found {found}")]
    CaptureGroupCount { entity: String, found: usize },

    #[error("Unknown dtype '{dtype}' for entity '{entity}': must be 'int' or 'str'")]
    UnknownDtype { entity: String, dtype: String },

    #[error("Path pattern '{pattern}' references unknown entity '{entity}'")]
    UnknownEntity { pattern: String, entity: String },

    #[error("Bundled configuration '{0}' not found")]
    NotFound(String),

    #[error("Failed to parse configuration '{path}': {message}")]
    ParseError { path: String, message: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while indexing a BIDS dataset.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Dataset root does not exist or is not a directory: {0}")]
    RootNotFound(String),

    #[error("Failed to walk dataset: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Errors that can occur while generating a BIDS skeleton.
#[derive(Debug, Error)]
pub enum SkeletonError {
    #[error("Skeleton file '{0}' not found")]
    SkeletonNotFound(String),

    #[error("Target path already exists: {0}")]
    TargetExists(String),

    #[error("Invalid skeleton structure: {0}")]
    InvalidStructure(String),

    #[error("Subject '{0}' uses '*' but no previous subject data exists")]
    NothingToRepeat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur while writing a derivative file.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Source file '{0}' has no file name")]
    InvalidSource(String),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while writing a derivative dataset description.
#[derive(Debug, Error)]
pub enum DescriptionError {
    #[error("Dataset description does not exist: {0}")]
    NotFound(String),

    #[error("Dataset description '{0}' is not a JSON object")]
    NotAnObject(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while running a participant workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("No DWI images found for participant {0}")]
    NoDwiData(String),

    #[error("No anatomical images found for participant {0}")]
    NoAnatData(String),

    #[error("Unknown BIDS-App '{0}': must be 'qsiprep' or 'qsirecon'")]
    UnknownApp(String),

    #[error("Participant task aborted: {0}")]
    TaskAborted(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Description(#[from] DescriptionError),

    #[error(transparent)]
    Skeleton(#[from] SkeletonError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
