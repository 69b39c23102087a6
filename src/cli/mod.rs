//! Command-line interfaces for simbids.
//!
//! `simbids` simulates BIDS-App derivatives for an existing dataset;
//! `simbids-raw-mri` creates a raw dataset from a skeleton.

mod commands;
mod raw_mri;

pub use commands::{parse_cli, run, run_with_cli, Cli};
pub use raw_mri::{run_raw_mri, RawMriCli};
