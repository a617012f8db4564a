mod colony;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use snapreg_persist::{CborCodec, SaveConfig, SnapshotManager, verify_artifact};
use snapreg_tools::RegistryInspector;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "snapreg-cli", about = "CLI tool for snapshot registry operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Save config file (.json, .yaml or .yml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the save folder
    #[arg(long)]
    folder: Option<PathBuf>,

    /// Override the artifact file name
    #[arg(long)]
    name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Build a demo colony and save it
    Save {
        /// Number of settlers to create
        #[arg(short, long, default_value = "8")]
        settlers: usize,
    },
    /// Load the artifact and reconnect its references
    Load,
    /// Decode the artifact and print its contents without loading it
    Inspect,
}

fn resolve_config(cli: &Cli) -> anyhow::Result<SaveConfig> {
    let mut config = match &cli.config {
        Some(path) => SaveConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SaveConfig::default(),
    };
    if let Some(folder) = &cli.folder {
        config.folder = folder.clone();
    }
    if let Some(name) = &cli.name {
        config.filename = name.clone();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = resolve_config(&cli)?;
    let types = colony::model_types()?;

    match cli.command {
        Commands::Info => {
            println!("snapreg-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("persist: {}", snapreg_persist::crate_info());
            println!("tools: {}", snapreg_tools::crate_info());
            println!("model types: {}", types.len());
            println!("artifact: {}", config.target().path().display());
        }
        Commands::Save { settlers } => {
            println!("Save demo: building a colony of {settlers} settlers");

            let mut manager = SnapshotManager::with_cbor(types, config);
            let colony = colony::build(manager.registry_mut(), settlers)?;
            manager.on_snapshot_completed(|outcome| match outcome {
                Ok(report) => tracing::info!(sha256 = %report.sha256, "save completed"),
                Err(e) => tracing::warn!(error = %e, "save failed"),
            });

            // Live state moves on before the save; capture picks it up.
            for settler in &colony.settlers {
                settler.update(|s| s.hunger = (s.hunger + 0.25).min(1.0));
            }

            let report = manager.take_snapshot()?.wait()?;
            println!(
                "Saved {} models ({} settlers, {} buildings, ledger of {}) to {}",
                report.model_count,
                colony.settlers.len(),
                colony.buildings.len(),
                colony.ledger.linked().len(),
                report.path.display()
            );
            let order: Vec<String> = report.group_order.iter().map(|t| t.to_string()).collect();
            println!("Group order: {}", order.join(" -> "));
            println!("Size: {} bytes, sha256={}", report.bytes_written, report.sha256);
            println!("{}", RegistryInspector::summary(manager.registry()));
        }
        Commands::Load => {
            let target = config.target();
            let mut manager = SnapshotManager::with_cbor(types, config);
            let report = manager
                .load(&target, colony::revive)
                .with_context(|| format!("loading {}", target.path().display()))?;
            println!(
                "Loaded {} models, {} handles resolved",
                report.model_count, report.resolved
            );
            println!("{}", RegistryInspector::summary(manager.registry()));
            for smri in RegistryInspector::list_models(manager.registry()) {
                if let Some(info) = RegistryInspector::inspect_model(manager.registry(), smri) {
                    tracing::debug!("{info}");
                }
            }
        }
        Commands::Inspect => {
            let path = config.target().path();
            let codec = CborCodec::new(Arc::new(types));
            let summary = verify_artifact(&path, &codec)
                .with_context(|| format!("verifying {}", path.display()))?;
            println!("{summary}");
        }
    }

    Ok(())
}
