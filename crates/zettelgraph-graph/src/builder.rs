//! One-pass tree walk producing a [`Graph`].

use crate::graph::Graph;
use crate::identity::{dir_identity, file_identity};
use crate::node::{DirectoryNode, FileNode, Node, StableId};
use crate::paths::{rel_join, rel_split};
use crate::GraphError;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// What the walk admits into the graph.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Lowercase extensions without the dot.
    pub supported_extensions: Vec<String>,
    pub skip_hidden: bool,
    pub follow_symlinks: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            supported_extensions: ["md", "txt", "nb", "pdf"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            skip_hidden: true,
            follow_symlinks: true,
        }
    }
}

impl BuildOptions {
    /// Case-insensitive extension check on a basename.
    pub fn supports(&self, file_name: &str) -> bool {
        has_extension(file_name, &self.supported_extensions)
    }
}

/// True when `file_name` ends in one of `extensions` (dotless, lowercase).
pub fn has_extension(file_name: &str, extensions: &[String]) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|s| s.eq_ignore_ascii_case(e)))
}

/// Directories already entered, keyed by canonical path.
///
/// Symlinks that lead back into the walked tree resolve to an entered path
/// and are refused, which bounds the walk.
#[derive(Debug, Default)]
pub struct VisitedSet {
    seen: HashSet<PathBuf>,
}

impl VisitedSet {
    /// Records `dir`; false if it (or what it resolves to) was seen before.
    pub fn enter(&mut self, dir: &Path) -> Result<bool, GraphError> {
        let canonical = fs::canonicalize(dir).map_err(|source| GraphError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(self.seen.insert(canonical))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

pub struct GraphBuilder {
    root: PathBuf,
    options: BuildOptions,
}

impl GraphBuilder {
    pub fn new(root: impl Into<PathBuf>, options: BuildOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    pub fn build(&self) -> Result<Graph, GraphError> {
        match fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(GraphError::InvalidRoot(self.root.clone())),
        }

        tracing::info!(root = %self.root.display(), "building graph");

        let mut graph = Graph::new();
        let mut visited = VisitedSet::default();
        let mut worklist: Vec<(PathBuf, String)> = vec![(self.root.clone(), String::new())];

        while let Some((dir, rel)) = worklist.pop() {
            if !visited.enter(&dir)? {
                tracing::warn!(path = %dir.display(), "skipping already visited directory");
                continue;
            }

            if !rel.is_empty() {
                let (parent, name) = rel_split(&rel);
                let key = graph.unique_key(dir_identity(&rel));
                graph.insert_node(key, Node::Directory(DirectoryNode::from_dir_name(parent, name)));
            }

            let mut subdirs = Vec::new();
            for (path, file_name) in self.read_entries(&dir, rel.is_empty())? {
                let meta = match self.entry_metadata(&path) {
                    Some(meta) => meta,
                    None => continue,
                };

                if meta.is_dir() {
                    subdirs.push((path, rel_join(&rel, &file_name)));
                    continue;
                }
                if !meta.is_file() {
                    continue;
                }
                if !self.options.supports(&file_name) {
                    tracing::debug!(path = %path.display(), "skipping unsupported file type");
                    continue;
                }

                let key: StableId = graph.unique_key(file_identity(&meta));
                graph.insert_node(key, Node::File(FileNode::from_file_name(&rel, &file_name)));
            }

            // Reversed so the stack pops subdirectories in name order.
            worklist.extend(subdirs.into_iter().rev());
        }

        graph.relink();
        tracing::info!(nodes = graph.len(), "graph built");
        Ok(graph)
    }

    /// Sorted, filtered children of `dir`. Unreadable subdirectories are skipped.
    fn read_entries(&self, dir: &Path, is_root: bool) -> Result<Vec<(PathBuf, String)>, GraphError> {
        let read = match fs::read_dir(dir) {
            Ok(read) => read,
            Err(source) if is_root => {
                return Err(GraphError::Io {
                    path: dir.to_path_buf(),
                    source,
                })
            }
            Err(err) => {
                tracing::warn!(path = %dir.display(), error = %err, "cannot read directory");
                return Ok(Vec::new());
            }
        };

        let mut entries = Vec::new();
        for entry in read {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(path = %dir.display(), error = %err, "cannot read entry");
                    continue;
                }
            };
            let Ok(file_name) = entry.file_name().into_string() else {
                tracing::warn!(path = %entry.path().display(), "skipping non UTF-8 name");
                continue;
            };
            if self.options.skip_hidden && file_name.starts_with('.') {
                continue;
            }
            entries.push((entry.path(), file_name));
        }
        entries.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(entries)
    }

    fn entry_metadata(&self, path: &Path) -> Option<fs::Metadata> {
        let link_meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "cannot stat entry");
                return None;
            }
        };
        if !link_meta.file_type().is_symlink() {
            return Some(link_meta);
        }
        if !self.options.follow_symlinks {
            return None;
        }
        match fs::metadata(path) {
            Ok(meta) => Some(meta),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "dangling symlink");
                None
            }
        }
    }
}

/// Builds with default options.
pub fn build_graph(root: &Path) -> Result<Graph, GraphError> {
    GraphBuilder::new(root, BuildOptions::default()).build()
}
