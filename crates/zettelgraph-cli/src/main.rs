//! Zettelgraph CLI
//!
//! Command-line access to a note tree:
//! - Inspecting the merged Folgezettel/folder graph (`graph`, `tree`, `resolve`)
//! - Working with IDs (`validate`, `parent`, `ancestors`, `next-id`)
//! - Mutating the tree with reference rewriting (`rename`, `move`, `create`, `delete`, `renumber`)
//!
//! Nodes can be named by stable ID, by path relative to the root, or by Folgezettel ID.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use zettelgraph_graph::{Graph, StableId};
use zettelgraph_store::{MutationOutcome, Vault, VaultConfig};

#[derive(Parser)]
#[command(name = "zettel")]
#[command(author, version, about = "Zettelgraph: Folgezettel note graph")]
struct Cli {
    /// Root directory of the note tree
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `zettelgraph_store=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Print mutation outcomes as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump nodes and edges as JSON
    Graph,

    /// Print the merged hierarchy as an indented tree
    Tree,

    /// Check a Folgezettel ID against the grammar
    Validate { id: String },

    /// Print the derived parent ID
    Parent { id: String },

    /// Print every ancestor ID, nearest first
    Ancestors { id: String },

    /// Next free child ID under a node
    NextId { node: String },

    /// Filesystem path of a node
    Resolve { node: String },

    /// Rename a file or directory (paths relative to the root) and rewrite references to it
    Rename { old: PathBuf, new: PathBuf },

    /// Move nodes under a target, allocating IDs when the target has one
    Move {
        target: String,
        #[arg(required = true)]
        sources: Vec<String>,
    },

    /// Create a note under a parent node
    Create {
        parent: String,
        name: String,
        /// File extension
        #[arg(long, default_value = "md")]
        ext: String,
        /// Initial contents
        #[arg(long, default_value = "")]
        content: String,
    },

    /// Delete a note or an empty directory
    Delete { node: String },

    /// Change the ID of a node and its ID descendants
    Renumber { node: String, new_id: String },

    /// Rebuild the graph whenever the tree changes
    #[cfg(feature = "watch")]
    Watch,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref())?;
    run(&cli)
}

fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => tracing_subscriber::EnvFilter::try_new(level)
            .with_context(|| format!("invalid log level `{level}`"))?,
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("failed to initialise logging: {err}"))
}

fn open_vault(cli: &Cli) -> Result<Vault> {
    let config = match &cli.config {
        Some(path) => VaultConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => VaultConfig::default(),
    };
    tracing::debug!(root = %cli.root.display(), "opening vault");
    Vault::open(&cli.root, config).with_context(|| format!("opening {}", cli.root.display()))
}

fn run(cli: &Cli) -> Result<()> {
    let vault = || open_vault(cli);

    match &cli.command {
        Commands::Validate { id } => cmd_validate(id)?,
        Commands::Parent { id } => cmd_parent(id),
        Commands::Ancestors { id } => cmd_ancestors(id)?,
        Commands::Graph => {
            let vault = vault()?;
            println!("{}", vault.snapshot().to_json()?);
        }
        Commands::Tree => {
            let vault = vault()?;
            print!("{}", vault.snapshot().render_tree());
        }
        Commands::NextId { node } => {
            let vault = vault()?;
            let key = resolve_node(&vault.snapshot(), node)?;
            println!("{}", vault.next_child_id(&key)?);
        }
        Commands::Resolve { node } => {
            let vault = vault()?;
            let key = resolve_node(&vault.snapshot(), node)?;
            println!("{}", vault.resolve_path(&key)?.display());
        }
        Commands::Rename { old, new } => {
            let vault = vault()?;
            let outcome = vault
                .rename(old, new)
                .with_context(|| format!("renaming {}", old.display()))?;
            report(cli.json, "renamed", &outcome)?;
        }
        Commands::Move { target, sources } => {
            let vault = vault()?;
            let graph = vault.snapshot();
            let target = resolve_node(&graph, target)?;
            let sources = sources
                .iter()
                .map(|s| resolve_node(&graph, s))
                .collect::<Result<Vec<_>>>()?;
            let outcome = vault.move_nodes(&sources, &target)?;
            report(cli.json, "moved", &outcome)?;
        }
        Commands::Create {
            parent,
            name,
            ext,
            content,
        } => {
            let vault = vault()?;
            let parent = resolve_node(&vault.snapshot(), parent)?;
            let created = vault.create(&parent, name, ext, content)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&created)?);
            } else {
                eprintln!(
                    "{} created {} ({})",
                    "ok".green().bold(),
                    created.path.display(),
                    created.stable_id
                );
            }
        }
        Commands::Delete { node } => {
            let vault = vault()?;
            let key = resolve_node(&vault.snapshot(), node)?;
            let outcome = vault.delete(&key)?;
            report(cli.json, "deleted", &outcome)?;
        }
        Commands::Renumber { node, new_id } => {
            let vault = vault()?;
            let key = resolve_node(&vault.snapshot(), node)?;
            let outcome = vault.renumber(&key, new_id)?;
            report(cli.json, "renumbered", &outcome)?;
        }
        #[cfg(feature = "watch")]
        Commands::Watch => cmd_watch(vault()?)?,
    }
    Ok(())
}

// ============================================================================
// ID commands
// ============================================================================

fn cmd_validate(id: &str) -> Result<()> {
    if zettelgraph_id::validate(id) {
        println!("{} {id}", "valid".green().bold());
        Ok(())
    } else {
        bail!("invalid Folgezettel ID `{id}`")
    }
}

fn cmd_parent(id: &str) {
    match zettelgraph_id::parent_of(id) {
        Some(parent) => println!("{parent}"),
        None => println!("{}", "(root)".dimmed()),
    }
}

fn cmd_ancestors(id: &str) -> Result<()> {
    if !zettelgraph_id::validate(id) {
        bail!("invalid Folgezettel ID `{id}`");
    }
    for ancestor in zettelgraph_id::all_ancestors(id) {
        println!("{ancestor}");
    }
    Ok(())
}

#[cfg(feature = "watch")]
fn cmd_watch(vault: Vault) -> Result<()> {
    use std::sync::Arc;
    use zettelgraph_store::watch::VaultWatcher;

    let vault = Arc::new(vault);
    let _watcher = VaultWatcher::spawn(Arc::clone(&vault), |graph| {
        eprintln!("{} graph rebuilt ({} nodes)", "changed".cyan().bold(), graph.len());
    })?;
    eprintln!("{} {}", "watching".green().bold(), vault.root().display());
    loop {
        std::thread::park();
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Looks `spec` up as a stable ID, then a root-relative path, then a
/// Folgezettel ID.
fn resolve_node(graph: &Graph, spec: &str) -> Result<StableId> {
    let key = StableId::from(spec);
    if graph.contains(&key) {
        return Ok(key);
    }
    let rel = spec.trim_start_matches("./").trim_end_matches('/');
    if let Some(key) = graph.find_by_path(rel) {
        return Ok(key.clone());
    }
    if let Some(key) = graph.find_by_folgezettel(spec) {
        return Ok(key.clone());
    }
    Err(anyhow!("no node matches `{spec}`"))
}

fn report(json: bool, verb: &str, outcome: &MutationOutcome) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    for entry in &outcome.renamed {
        eprintln!(
            "{} {verb} {} -> {}",
            "ok".green().bold(),
            display(&entry.from),
            display(&entry.to)
        );
    }
    for path in &outcome.removed {
        eprintln!("{} {verb} {}", "ok".green().bold(), display(path));
    }
    for path in &outcome.changed_files {
        eprintln!("   {} {}", "rewrote".blue(), display(path));
    }
    for warning in &outcome.warnings {
        eprintln!("{} {warning}", "warning".yellow().bold());
    }
    Ok(())
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
