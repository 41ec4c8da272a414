//! Zettelgraph: the merged Folgezettel + folder hierarchy
//!
//! ```text
//!   vault/                          graph
//!   ├── 01 Root Note.md             01 Root Note
//!   ├── 01a Child Note.md             └── 01a Child Note      (ID edge)
//!   ├── 03a01 Orphan.md             [03]                      surrogate
//!   └── Regular Folder/               └── [03a]               surrogate
//!       ├── 02 Inside Folder.md           └── 03a01 Orphan    (ID edge)
//!       └── normal_file.txt         Regular Folder
//!                                     ├── 02 Inside Folder    (folder edge)
//!                                     └── normal_file         (folder edge)
//! ```
//!
//! ## Key Features
//!
//! - **Closed node model**: `File`, `Directory` and `Surrogate` variants
//! - **Stable identity**: nodes are keyed by a [`StableId`] that survives renames of files
//! - **Surrogates**: missing ID ancestors are synthesized so every non-root ID has a parent
//! - **Bounded walk**: iterative traversal with a canonical-path visited set
//!
//! The builder only reads the filesystem. Mutations live in `zettelgraph-store`.

pub mod builder;
pub mod graph;
pub mod identity;
pub mod node;
pub mod paths;

pub use builder::{build_graph, has_extension, BuildOptions, GraphBuilder, VisitedSet};
pub use graph::Graph;
pub use node::{DirectoryNode, FileNode, Node, StableId, SurrogateNode};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("invalid root directory: {0}")]
    InvalidRoot(PathBuf),

    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
