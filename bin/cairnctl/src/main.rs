//! ---
//! cairn_section: "05-networking-external-interfaces"
//! cairn_subsection: "binary"
//! cairn_type: "source"
//! cairn_scope: "code"
//! cairn_description: "Control CLI for administrators of Cairn memento stores."
//! cairn_version: "v0.1.0"
//! cairn_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use anyhow::Result;
use cairn_common::{init_tracing, AppConfig, PersistenceConfig};
use clap::{Parser, Subcommand};

mod store;

/// Searched in order when `--config` is not given.
const CONFIG_CANDIDATES: [&str; 2] = ["cairn.toml", "/etc/cairn/cairn.toml"];

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Cairn memento store administrative utility",
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML); the `persistence` and `logging` sections are used.
    #[arg(long, value_name = "FILE", env = AppConfig::ENV_CONFIG_PATH, global = true)]
    config: Option<PathBuf>,

    /// Memento store directory, overriding the configured one.
    #[arg(long, value_name = "DIR", global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the id/type inventory of the store.
    Manifest(store::ManifestCommand),
    /// Load every memento and report graph statistics.
    Inspect,
    /// Delete one memento through the persister.
    Remove(store::RemoveCommand),
    /// Delete temporary files left behind by interrupted writes.
    Sweep,
}

impl Cli {
    fn persistence_config(&self) -> Result<PersistenceConfig> {
        let app = match &self.config {
            Some(path) => Some(AppConfig::from_path(path.clone())?),
            None if CONFIG_CANDIDATES.iter().any(|path| Path::new(path).exists()) => {
                Some(AppConfig::load(&CONFIG_CANDIDATES)?)
            }
            None => None,
        };
        let mut config = match app {
            Some(app) => {
                init_tracing("cairnctl", &app.logging)?;
                app.persistence
            }
            None => {
                cairn_logging::init();
                PersistenceConfig::default()
            }
        };
        if let Some(dir) = &self.dir {
            config.directory = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.persistence_config()?;
    match cli.command {
        Commands::Manifest(cmd) => store::manifest(&config, cmd),
        Commands::Inspect => store::inspect(&config),
        Commands::Remove(cmd) => store::remove(&config, cmd),
        Commands::Sweep => store::sweep(&config),
    }
}
