//! Zettelgraph Vault
//!
//! Owns the graph of one note directory and performs every mutation on it:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             VAULT                                │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  rename / move / create ──► mutation engine ──► link rewriter    │
//! │  delete / renumber               │                  │            │
//! │                                  ▼                  ▼            │
//! │                      ┌────────────────────────────────────┐      │
//! │                      │ AtomicOps: path locks + FsJournal  │      │
//! │                      └────────────────────────────────────┘      │
//! │                                  │ commit                        │
//! │                                  ▼                               │
//! │                     working graph ──► RwLock<Graph> ──► snapshot │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Features
//!
//! - **Checkpointed**: mutations run against a copy of the graph that only replaces the shared one on success
//! - **Transactional**: filesystem effects are journaled and undone in reverse order on failure
//! - **Link-aware**: `[[id name]]`, `[[id]]` and `[[id name|alias]]` references follow renames
//! - **Synced**: optional watcher rebuilds the graph when files change externally (`watch` feature)

pub mod atomic;
pub mod error;
pub mod links;
mod mutation;
mod vault;
#[cfg(feature = "watch")]
pub mod watch;

#[cfg(test)]
mod tests;

pub use atomic::{AtomicOps, FsJournal, PathGuard, PathLocks};
pub use error::VaultError;
pub use links::{rewrite_content, LinkRewriter, NoteRef, RewriteStatus};
pub use vault::{CreatedNote, MutationOutcome, RenamedEntry, Vault};
pub use zettelgraph_graph::{Graph, Node, StableId};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use zettelgraph_graph::{has_extension, paths, BuildOptions, GraphBuilder};

// ============================================================================
// Vault Configuration
// ============================================================================

/// Configuration for a vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Extensions admitted into the graph (dotless, case-insensitive)
    pub supported_extensions: Vec<String>,
    /// Extensions whose contents take part in link rewriting
    pub rewritable_extensions: Vec<String>,
    /// Ignore entries whose name starts with `.`
    pub skip_hidden: bool,
    /// Descend into symlinked directories (cycles are still refused)
    pub follow_symlinks: bool,
    /// Quiet period before the watcher rebuilds
    pub watch_debounce_ms: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            supported_extensions: vec!["md".into(), "txt".into(), "nb".into(), "pdf".into()],
            rewritable_extensions: vec!["md".into(), "txt".into()],
            skip_hidden: true,
            follow_symlinks: true,
            watch_debounce_ms: 250,
        }
    }
}

impl VaultConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, VaultError> {
        let contents = std::fs::read_to_string(path).map_err(VaultError::io(path))?;
        serde_json::from_str(&contents).map_err(|err| VaultError::InvalidConfig {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            supported_extensions: self.supported_extensions.clone(),
            skip_hidden: self.skip_hidden,
            follow_symlinks: self.follow_symlinks,
        }
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        file_name_of(path).is_some_and(|name| has_extension(name, &self.supported_extensions))
    }

    pub fn is_rewritable(&self, path: &Path) -> bool {
        file_name_of(path).is_some_and(|name| has_extension(name, &self.rewritable_extensions))
    }
}

fn file_name_of(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

// ============================================================================
// Stateless entry points
// ============================================================================

/// Walks `root` with the default configuration.
pub fn build_graph(root: &Path) -> Result<Graph, VaultError> {
    Ok(GraphBuilder::new(root, VaultConfig::default().build_options()).build()?)
}

pub fn validate_id(id: &str) -> bool {
    zettelgraph_id::validate(id)
}

/// Derived parent ID; empty for root-level IDs.
pub fn parent_id(id: &str) -> String {
    zettelgraph_id::parent_of(id).unwrap_or_default().to_string()
}

/// Next free child ID under the node `parent` of `graph`.
pub fn next_child_id(graph: &Graph, parent: &StableId) -> Result<String, VaultError> {
    let node = graph
        .node(parent)
        .ok_or_else(|| VaultError::NotFound(parent.to_string()))?;
    let id = node
        .folgezettel_id()
        .ok_or_else(|| VaultError::MissingId(parent.clone()))?;
    Ok(zettelgraph_id::next_child_id(id.as_str(), graph.folgezettel_ids())?)
}

/// Filesystem path of a real node.
pub fn resolve_path(root: &Path, graph: &Graph, key: &StableId) -> Result<PathBuf, VaultError> {
    graph
        .relative_path(key)
        .map(|rel| paths::to_abs(root, &rel))
        .ok_or_else(|| VaultError::NotFound(key.to_string()))
}

/// Opens a vault with the default configuration.
pub fn open_vault(root: impl Into<PathBuf>) -> Result<Vault, VaultError> {
    Vault::open(root, VaultConfig::default())
}
