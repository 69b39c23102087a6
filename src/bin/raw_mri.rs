//! simbids-raw-mri entry point.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> anyhow::Result<()> {
    let cli = <simbids::cli::RawMriCli as clap::Parser>::parse();

    // Priority: RUST_LOG env var > --log-level CLI arg
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .init();

    simbids::cli::run_raw_mri(&cli)?;
    Ok(())
}
