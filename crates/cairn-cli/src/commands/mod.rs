//! CLI command definitions and dispatch.

pub mod deploy;
pub mod plan;
pub mod remove;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use cairn_common::config::CairnConfig;
use cairn_common::constants::{DEFAULT_CONCURRENCY, DEFAULT_STATE_FILE};
use cairn_compose::spec::Manifest;
use cairn_runtime::engine::{Engine, EngineConfig};
use cairn_runtime::registry::Registry;
use cairn_runtime::state::FileStateStore;
use clap::{Parser, Subcommand};

/// cairn: Declarative component provisioning engine.
#[derive(Parser, Debug)]
#[command(name = "cairn", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to the state file.
    #[arg(long, global = true, default_value = DEFAULT_STATE_FILE)]
    pub state_file: PathBuf,

    /// Maximum number of lifecycle calls in flight.
    #[arg(long, global = true, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Suppress provisioner log output.
    #[arg(long, global = true)]
    pub silent: bool,

    /// Deploy instances even when their inputs are unchanged.
    #[arg(long, global = true)]
    pub force: bool,
}

impl Cli {
    /// Run configuration assembled from the global flags.
    #[must_use]
    pub fn config(&self) -> CairnConfig {
        CairnConfig {
            state_file: self.state_file.clone(),
            concurrency: self.concurrency,
            silent: self.silent,
            force: self.force,
        }
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create or update every component declared in a manifest.
    #[command(alias = "default")]
    Deploy(deploy::DeployArgs),
    /// Tear down every component recorded for a manifest.
    Remove(remove::RemoveArgs),
    /// Display the changes a deploy would make.
    Plan(plan::PlanArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command fails or any instance failed.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config();
    match cli.command {
        Command::Deploy(args) => deploy::execute(args, &config).await,
        Command::Remove(args) => remove::execute(args, &config).await,
        Command::Plan(args) => plan::execute(args, &config).await,
    }
}

/// Builds an engine with the built-in component types over the state file.
pub(crate) fn engine(config: &CairnConfig) -> Engine {
    Engine::new(
        Registry::with_builtins(),
        Arc::new(FileStateStore::new(&config.state_file)),
        EngineConfig::from(config),
    )
}

/// Reads a manifest, pointing at the default name when it is missing.
pub(crate) fn load_manifest(path: &Path) -> anyhow::Result<Manifest> {
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "Manifest not found: {}\n\
             Create a {} file or specify a path: cairn deploy <file>",
            path.display(),
            cairn_common::constants::DEFAULT_MANIFEST
        ));
    }
    Manifest::load(path).with_context(|| format!("failed to load {}", path.display()))
}
