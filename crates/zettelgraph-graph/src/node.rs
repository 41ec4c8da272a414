use crate::paths::rel_join;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::path::Path;
use zettelgraph_id::{split_file_stem, FolgezettelId};

// ============================================================================
// Stable identity key
// ============================================================================

/// Process-stable key of a node. Opaque to callers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableId(String);

impl StableId {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key of the placeholder standing in for a missing ID ancestor.
    pub fn surrogate_for(folgezettel_id: &str) -> Self {
        Self(format!("surrogate_{folgezettel_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for StableId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StableId {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for StableId {
    fn from(key: String) -> Self {
        Self(key)
    }
}

// ============================================================================
// Node variants
// ============================================================================

/// A note or attachment on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub folgezettel_id: Option<FolgezettelId>,
    /// Display name with the ID prefix and extension stripped.
    pub name: String,
    /// Containing directory relative to the root.
    pub path: String,
    /// Basename on disk.
    pub file_name: String,
    /// Extension including the leading dot, e.g. `.md`.
    pub extension: String,
}

impl FileNode {
    pub fn from_file_name(path: &str, file_name: &str) -> Self {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        let stem = &file_name[..file_name.len() - extension.len()];
        let (folgezettel_id, name) = split_file_stem(stem);
        Self {
            folgezettel_id: folgezettel_id.and_then(|id| FolgezettelId::new(id).ok()),
            name: name.to_string(),
            path: path.to_string(),
            file_name: file_name.to_string(),
            extension,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryNode {
    pub folgezettel_id: Option<FolgezettelId>,
    pub name: String,
    /// Containing directory relative to the root.
    pub path: String,
    pub file_name: String,
}

impl DirectoryNode {
    pub fn from_dir_name(path: &str, file_name: &str) -> Self {
        let (folgezettel_id, name) = split_file_stem(file_name);
        Self {
            folgezettel_id: folgezettel_id.and_then(|id| FolgezettelId::new(id).ok()),
            name: name.to_string(),
            path: path.to_string(),
            file_name: file_name.to_string(),
        }
    }

    /// The directory's own path relative to the root.
    pub fn own_path(&self) -> String {
        rel_join(&self.path, &self.file_name)
    }
}

/// Placeholder for an ID ancestor with no entry on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurrogateNode {
    pub folgezettel_id: FolgezettelId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    File(FileNode),
    Directory(DirectoryNode),
    Surrogate(SurrogateNode),
}

impl Node {
    pub fn folgezettel_id(&self) -> Option<&FolgezettelId> {
        match self {
            Node::File(f) => f.folgezettel_id.as_ref(),
            Node::Directory(d) => d.folgezettel_id.as_ref(),
            Node::Surrogate(s) => Some(&s.folgezettel_id),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Node::File(f) => &f.name,
            Node::Directory(d) => &d.name,
            Node::Surrogate(_) => "",
        }
    }

    /// Containing directory relative to the root; empty for surrogates.
    pub fn path(&self) -> &str {
        match self {
            Node::File(f) => &f.path,
            Node::Directory(d) => &d.path,
            Node::Surrogate(_) => "",
        }
    }

    pub fn extension(&self) -> &str {
        match self {
            Node::File(f) => &f.extension,
            _ => "",
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        match self {
            Node::File(f) => Some(&f.file_name),
            Node::Directory(d) => Some(&d.file_name),
            Node::Surrogate(_) => None,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Node::Directory(_))
    }

    pub fn is_surrogate(&self) -> bool {
        matches!(self, Node::Surrogate(_))
    }

    /// Root-relative path of the entry itself; `None` for surrogates.
    pub fn relative_path(&self) -> Option<String> {
        self.file_name().map(|name| rel_join(self.path(), name))
    }

    /// Directory that entries placed under this node land in.
    pub fn placement_dir(&self) -> String {
        match self {
            Node::Directory(d) => d.own_path(),
            Node::File(f) => f.path.clone(),
            Node::Surrogate(_) => String::new(),
        }
    }

    /// Human label for trees and logs, e.g. `01a Child Note`.
    pub fn label(&self) -> String {
        match (self.folgezettel_id(), self) {
            (Some(id), Node::Surrogate(_)) => format!("[{id}]"),
            (Some(id), _) => format!("{id} {}", self.name()),
            (None, _) => self.name().to_string(),
        }
    }

    pub(crate) fn set_path(&mut self, path: String) {
        match self {
            Node::File(f) => f.path = path,
            Node::Directory(d) => d.path = path,
            Node::Surrogate(_) => {}
        }
    }
}
