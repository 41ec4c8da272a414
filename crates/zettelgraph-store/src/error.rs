use std::io;
use std::path::PathBuf;
use thiserror::Error;
use zettelgraph_graph::{GraphError, StableId};
use zettelgraph_id::IdError;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid root directory: {0}")]
    InvalidRoot(PathBuf),

    #[error("invalid Folgezettel ID `{0}`")]
    InvalidId(String),

    #[error("node {0} carries no Folgezettel ID")]
    MissingId(StableId),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("target node {0} not found")]
    TargetNotFound(StableId),

    #[error("source node {0} not found")]
    SourceNotFound(StableId),

    #[error("cannot move {0} into itself")]
    MoveIntoSelf(StableId),

    #[error("invalid note name `{0}`")]
    InvalidName(String),

    #[error("destination already exists: {}", .0.display())]
    RenameConflict(PathBuf),

    #[error("no free child ID left under `{parent}`")]
    AllocationExhausted { parent: String },

    #[error("unsupported file extension `{0}`")]
    UnsupportedExtension(String),

    #[error("path is outside the vault: {}", .0.display())]
    OutsideRoot(PathBuf),

    #[error("i/o failure at {}: {source}", .path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not rewrite links in {}: {reason}", .path.display())]
    LinkRewriteFailure { path: PathBuf, reason: String },

    #[error("invalid configuration {}: {reason}", .path.display())]
    InvalidConfig { path: PathBuf, reason: String },

    #[cfg(feature = "watch")]
    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),
}

impl VaultError {
    /// Adapter for `map_err` on filesystem calls.
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| VaultError::IoFailure { path, source }
    }

    /// True for transient filesystem failures; false for input that will never succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::IoFailure { .. })
    }
}

impl From<IdError> for VaultError {
    fn from(err: IdError) -> Self {
        match err {
            IdError::InvalidId(id) => VaultError::InvalidId(id),
            IdError::AllocationExhausted { parent } => VaultError::AllocationExhausted { parent },
        }
    }
}

impl From<GraphError> for VaultError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::InvalidRoot(path) => VaultError::InvalidRoot(path),
            GraphError::Io { path, source } => VaultError::IoFailure { path, source },
        }
    }
}
