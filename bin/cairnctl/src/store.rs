//! ---
//! cairn_section: "05-networking-external-interfaces"
//! cairn_subsection: "binary"
//! cairn_type: "source"
//! cairn_scope: "code"
//! cairn_description: "Control CLI for administrators of Cairn memento stores."
//! cairn_version: "v0.1.0"
//! cairn_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use cairn_common::PersistenceConfig;
use cairn_logging::{log_system_event, LogContext, SystemEventOutcome};
use cairn_persistence::{
    Category, Delta, JsonMementoCodec, MementoLoader, MementoPersister, MementoStore, NoLookup,
    PersistenceMetrics, RetryingCodec,
};
use clap::Args;

#[derive(Debug, Args)]
pub struct ManifestCommand {
    /// Emit the manifest as JSON instead of a table.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct RemoveCommand {
    /// Category holding the memento (entities, locations or policies).
    #[arg(long, value_name = "CATEGORY")]
    category: Category,

    /// Identifier of the memento to delete.
    #[arg(long, value_name = "ID")]
    id: String,
}

fn open_context(config: &PersistenceConfig) -> String {
    format!("unable to open memento store {}", config.directory.display())
}

/// Loader over an existing store; nothing in the store is created, written or swept.
fn reader(config: &PersistenceConfig) -> Result<MementoLoader> {
    let store = MementoStore::open_read_only(&config.directory)
        .with_context(|| open_context(config))?;
    let codec = RetryingCodec::new(JsonMementoCodec, config.max_serialization_attempts);
    let metrics = PersistenceMetrics::unregistered()?;
    Ok(
        MementoLoader::new(store, Arc::new(codec), Arc::new(metrics))
            .with_node(config.node.as_deref().map(Arc::from)),
    )
}

pub fn manifest(config: &PersistenceConfig, cmd: ManifestCommand) -> Result<()> {
    let manifest = reader(config)?.load_manifest()?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }
    println!("{:<10} {:<36} TYPE", "CATEGORY", "ID");
    for category in Category::MEMENTOS {
        let Some(ids) = manifest.ids_to_type(category) else {
            continue;
        };
        for (id, kind) in ids {
            println!("{:<10} {:<36} {}", category, id, kind);
        }
    }
    Ok(())
}

pub fn inspect(config: &PersistenceConfig) -> Result<()> {
    let graph = reader(config)?.load_full(&NoLookup)?;

    println!("store:        {}", config.directory.display());
    println!("entities:     {}", graph.entities().len());
    println!("locations:    {}", graph.locations().len());
    println!("policies:     {}", graph.policies().len());
    let applications: Vec<&str> = graph.application_ids().iter().map(String::as_str).collect();
    println!("applications: {}", applications.join(", "));
    if graph.dangling_references().is_empty() {
        println!("dangling:     none");
    } else {
        println!("dangling:     {}", graph.dangling_references().len());
        for dangling in graph.dangling_references() {
            println!("  {}", dangling);
        }
    }
    Ok(())
}

pub fn remove(config: &PersistenceConfig, cmd: RemoveCommand) -> Result<()> {
    if !Category::MEMENTOS.contains(&cmd.category) {
        bail!("{} holds no mementos", cmd.category);
    }
    let persister = MementoPersister::from_config(config, None).with_context(|| open_context(config))?;
    persister.delta(&Delta::new().remove(cmd.category, cmd.id.clone()));
    persister
        .wait_for_writes_completed(config.shutdown_timeout)
        .with_context(|| format!("removal of {}/{} did not finish", cmd.category, cmd.id))?;
    let failures = persister.failed_operations();
    let ctx = LogContext::memento(cmd.category.dir_name(), &cmd.id)
        .with_node(config.node.as_deref())
        .with_operation("remove");
    if failures > 0 || persister.writer_count() == 0 {
        log_system_event(
            Some(&ctx),
            "cli.remove",
            "memento removal failed",
            SystemEventOutcome::Fault,
        );
        persister.stop()?;
        return Err(anyhow!("unable to remove {}/{}", cmd.category, cmd.id));
    }
    persister.stop()?;
    log_system_event(
        Some(&ctx),
        "cli.remove",
        "memento removed",
        SystemEventOutcome::Success,
    );
    println!("removed {}/{}", cmd.category, cmd.id);
    Ok(())
}

pub fn sweep(config: &PersistenceConfig) -> Result<()> {
    let store = MementoStore::open(&config.directory).with_context(|| open_context(config))?;
    let removed = store.sweep_temp_files()?;
    println!("removed {} temporary file(s)", removed);
    Ok(())
}
