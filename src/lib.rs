//! simbids: simulated BIDS datasets and BIDS-App derivatives.
//!
//! The [`layout`] module holds the BIDS entity and path-pattern engine:
//! entities are extracted from file paths with per-entity regular expressions
//! and derivative paths are built from entity values with ordered path
//! patterns. On top of it, [`skeleton`] and [`simulate`] create raw datasets,
//! and [`workflows`] writes the outputs a BIDS-App would produce through
//! [`sink::DerivativesSink`].

pub mod cli;
pub mod config;
pub mod description;
pub mod error;
pub mod layout;
pub mod simulate;
pub mod sink;
pub mod skeleton;
pub mod workflows;

// Re-export commonly used types
pub use config::RunConfig;
pub use error::{
    ConfigError, DescriptionError, IndexError, PatternError, SinkError, SkeletonError,
    WorkflowError,
};
pub use layout::{build_path, BuildOptions, EntityMap, EntityValue, LayoutConfig, PathPattern};
pub use workflows::AppKind;
