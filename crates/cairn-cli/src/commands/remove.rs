//! `cairn remove`: Tear down everything recorded for a manifest.

use std::path::PathBuf;
use std::time::Instant;

use cairn_common::config::CairnConfig;
use cairn_common::constants::DEFAULT_MANIFEST;
use cairn_common::types::InstanceId;
use clap::Args;

use crate::output;

/// Arguments for the `remove` command.
#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Path to the manifest whose instances should be removed.
    #[arg(default_value = DEFAULT_MANIFEST)]
    pub file: PathBuf,

    /// Remove by root name instead of reading the manifest.
    #[arg(long, conflicts_with = "file")]
    pub name: Option<String>,
}

/// Executes the `remove` command.
///
/// Removal is driven by the state file; the manifest only supplies the
/// root name.
///
/// # Errors
///
/// Returns an error if state cannot be read or any instance failed.
pub async fn execute(args: RemoveArgs, config: &CairnConfig) -> anyhow::Result<()> {
    let started = Instant::now();
    output::print_header();

    let root = match args.name {
        Some(name) => InstanceId::root(&name)?,
        None => super::load_manifest(&args.file)?.root_id()?,
    };
    tracing::info!(root = %root, "removing recorded instances");
    let report = super::engine(config).remove(&root).await?;

    if report.nodes.is_empty() {
        eprintln!("  Nothing recorded for {}{root}{}.", output::BOLD, output::RESET);
        return Ok(());
    }
    output::print_report(&report, started.elapsed());
    output::fail_on_errors(&report)
}
