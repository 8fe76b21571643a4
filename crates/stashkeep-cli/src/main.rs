//! Stashkeep CLI - inspect and maintain the container registry file.
//!
//! The registry is normally written by an agent process; this binary works on
//! the same JSON document offline.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stashkeep_core::config::default_registry_path;
use stashkeep_core::{RegistryStore, WorldKey};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "stashkeep")]
#[command(about = "Inspect and maintain the stashkeep container registry")]
struct Args {
    /// Registry file (defaults to the per-user data directory)
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List world keys with their record counts
    Worlds,
    /// List live records of a world
    List {
        #[arg(long)]
        world: String,
        /// Include hidden records
        #[arg(long)]
        hidden: bool,
    },
    /// Print one record as JSON
    Show {
        #[arg(long)]
        world: String,
        label: String,
    },
    /// Mark a record destroyed
    Forget {
        #[arg(long)]
        world: String,
        label: String,
    },
    /// Permanently delete destroyed records of a world
    Purge {
        #[arg(long)]
        world: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase())),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let path = args.registry.unwrap_or_else(default_registry_path);
    debug!("Registry: {}", path.display());

    let store = RegistryStore::open(&path);
    store.load().await;

    let output = match args.command {
        Command::Worlds => commands::worlds(&store),
        Command::List { world, hidden } => commands::list(&store, &WorldKey::from_raw(world), hidden),
        Command::Show { world, label } => commands::show(&store, &WorldKey::from_raw(world), &label)?,
        Command::Forget { world, label } => {
            commands::forget(&store, &WorldKey::from_raw(world), &label)?
        }
        Command::Purge { world } => commands::purge(&store, &WorldKey::from_raw(world)),
    };

    store
        .flush()
        .with_context(|| format!("Failed to write registry {}", path.display()))?;

    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}
