//! `cairn deploy`: Create or update the declared component tree.

use std::path::PathBuf;
use std::time::Instant;

use cairn_common::config::CairnConfig;
use cairn_common::constants::DEFAULT_MANIFEST;
use clap::Args;

use crate::output;

/// Arguments for the `deploy` command.
#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Path to the manifest (YAML or JSON).
    #[arg(default_value = DEFAULT_MANIFEST)]
    pub file: PathBuf,
}

/// Executes the `deploy` command.
///
/// # Errors
///
/// Returns an error if the manifest is invalid, the graph cannot be built,
/// or any instance failed or was skipped.
pub async fn execute(args: DeployArgs, config: &CairnConfig) -> anyhow::Result<()> {
    let started = Instant::now();
    output::print_header();

    tracing::info!(file = %args.file.display(), "deploying manifest");
    let manifest = super::load_manifest(&args.file)?;
    let engine = super::engine(config);
    let report = engine.deploy(&manifest).await?;

    output::print_report(&report, started.elapsed());
    eprintln!();
    eprintln!(
        "  {}State: {}{}",
        output::DIM,
        config.state_file.display(),
        output::RESET
    );
    output::fail_on_errors(&report)
}
