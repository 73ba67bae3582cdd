//! `cairn plan`: Display the changes a deploy would make.

use std::path::PathBuf;

use cairn_common::config::CairnConfig;
use cairn_common::constants::DEFAULT_MANIFEST;
use clap::Args;

use crate::output;

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Path to the manifest (YAML or JSON).
    #[arg(default_value = DEFAULT_MANIFEST)]
    pub file: PathBuf,
}

/// Executes the `plan` command.
///
/// Expands the manifest, builds the dependency graph, and compares every
/// instance against the state file without calling any provisioner.
///
/// # Errors
///
/// Returns an error if the manifest is invalid or the graph cannot be built.
pub async fn execute(args: PlanArgs, config: &CairnConfig) -> anyhow::Result<()> {
    tracing::info!(file = %args.file.display(), "planning manifest");
    let manifest = super::load_manifest(&args.file)?;
    let plan = super::engine(config).plan(&manifest).await?;

    println!("Deployment Plan for: {}", args.file.display());
    println!("{}", "\u{2550}".repeat(35));
    println!();
    output::print_plan(&plan);
    Ok(())
}
