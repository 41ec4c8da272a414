//! Compound mutations over graph, filesystem and references.
//!
//! Every function here runs inside a transaction opened by the vault: effects
//! go through the [`FsJournal`] so that a failure anywhere rolls the tree back,
//! and graph changes are made on a working copy the vault discards on error.
//! Edges are recomputed by the caller once the whole operation has succeeded.

use crate::atomic::FsJournal;
use crate::links::{LinkRewriter, NoteRef};
use crate::vault::{MutationOutcome, RenamedEntry};
use crate::{VaultConfig, VaultError};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use zettelgraph_graph::identity::{dir_identity, file_identity};
use zettelgraph_graph::paths::{rel_split, rel_within, to_abs, to_rel};
use zettelgraph_graph::{DirectoryNode, FileNode, Graph, Node, StableId};
use zettelgraph_id::{all_ancestors, next_child_id, validate};

pub(crate) struct Engine<'a> {
    pub root: &'a Path,
    pub config: &'a VaultConfig,
    pub links: &'a LinkRewriter,
}

/// One source of a move, resolved before anything touches the disk.
#[derive(Debug)]
pub(crate) struct MoveStep {
    pub key: StableId,
    pub source: PathBuf,
    pub old_ref: NoteRef,
    pub new_ref: NoteRef,
    pub final_name: String,
    /// Files that mention `old_ref`, found before the move starts.
    pub references: Vec<PathBuf>,
}

#[derive(Debug)]
pub(crate) struct MovePlan {
    pub dest_dir: PathBuf,
    pub steps: Vec<MoveStep>,
}

impl MovePlan {
    pub fn sources(&self) -> Vec<PathBuf> {
        self.steps.iter().map(|s| s.source.clone()).collect()
    }

    /// Where each source ends up once its ID prefix is applied.
    pub fn final_paths(&self) -> Vec<PathBuf> {
        self.steps
            .iter()
            .map(|s| self.dest_dir.join(&s.final_name))
            .collect()
    }

    /// Every path the move touches besides the sources themselves.
    pub fn lock_set(&self) -> Vec<PathBuf> {
        let mut paths = self.final_paths();
        for step in &self.steps {
            paths.extend(step.references.iter().cloned());
        }
        paths
    }
}

#[derive(Debug)]
pub(crate) struct CreatePlan {
    pub path: PathBuf,
    pub folgezettel_id: Option<String>,
}

#[derive(Debug)]
pub(crate) struct RenumberStep {
    pub key: StableId,
    pub new_id: String,
    pub references: Vec<PathBuf>,
}

impl Engine<'_> {
    pub fn abs(&self, rel: &str) -> PathBuf {
        to_abs(self.root, rel)
    }

    pub fn rel(&self, path: &Path) -> Result<String, VaultError> {
        to_rel(self.root, path).ok_or_else(|| VaultError::OutsideRoot(path.to_path_buf()))
    }

    /// Absolute path of a real node.
    pub fn node_path(&self, graph: &Graph, key: &StableId) -> Result<PathBuf, VaultError> {
        graph
            .relative_path(key)
            .map(|rel| self.abs(&rel))
            .ok_or_else(|| VaultError::NotFound(key.to_string()))
    }

    // ========================================================================
    // Rename
    // ========================================================================

    /// Renames `old_abs` to `new_abs` and rewrites `old_ref` to `new_ref` in
    /// `references`, which were collected before the transaction started.
    ///
    /// Returns the key of the renamed node when it is (still) in the graph.
    #[allow(clippy::too_many_arguments)]
    pub fn rename(
        &self,
        graph: &mut Graph,
        journal: &mut FsJournal,
        old_abs: &Path,
        new_abs: &Path,
        old_ref: &NoteRef,
        new_ref: &NoteRef,
        references: &[PathBuf],
        outcome: &mut MutationOutcome,
    ) -> Result<Option<StableId>, VaultError> {
        if fs::symlink_metadata(old_abs).is_err() {
            return Err(VaultError::NotFound(old_abs.display().to_string()));
        }
        if old_abs != new_abs && fs::symlink_metadata(new_abs).is_ok() {
            return Err(VaultError::RenameConflict(new_abs.to_path_buf()));
        }

        journal.rename(old_abs, new_abs)?;
        let key = self.apply_rename(graph, old_abs, new_abs)?;
        self.rewrite_references(journal, references, new_abs, old_ref, new_ref, outcome);

        outcome.renamed.push(RenamedEntry {
            stable_id: key.clone(),
            from: old_abs.to_path_buf(),
            to: new_abs.to_path_buf(),
            folgezettel_id: new_ref.id.clone(),
        });
        Ok(key)
    }

    /// Fails with `RenameConflict` when `new_ref` would give `key` an ID
    /// another real node already carries.
    pub fn check_id_free(
        &self,
        graph: &Graph,
        key: Option<&StableId>,
        old_ref: &NoteRef,
        new_ref: &NoteRef,
    ) -> Result<(), VaultError> {
        let Some(new_id) = new_ref.id.as_deref() else {
            return Ok(());
        };
        if old_ref.id.as_deref() == Some(new_id) {
            return Ok(());
        }
        let holder = graph.nodes().find(|(other, n)| {
            Some(*other) != key
                && !n.is_surrogate()
                && n.folgezettel_id().map(|i| i.as_str()) == Some(new_id)
        });
        match holder {
            Some((other, _)) => Err(VaultError::RenameConflict(self.node_path(graph, other)?)),
            None => Ok(()),
        }
    }

    /// Files that mention `old_ref`. Empty when the renamed entry is not
    /// rewritable or its reference does not change.
    pub fn references_to(
        &self,
        new_abs: &Path,
        old_ref: &NoteRef,
        new_ref: &NoteRef,
    ) -> Result<Vec<PathBuf>, VaultError> {
        if self.links.is_rewritable(new_abs) && old_ref != new_ref {
            self.links.find_references(self.root, old_ref)
        } else {
            Ok(Vec::new())
        }
    }

    /// Rewrites each reference at its current location. Failures become
    /// warnings; the rename they follow stands.
    pub fn rewrite_references(
        &self,
        journal: &mut FsJournal,
        references: &[PathBuf],
        renamed: &Path,
        old_ref: &NoteRef,
        new_ref: &NoteRef,
        outcome: &mut MutationOutcome,
    ) {
        for reference in references {
            let current = journal.current_path(reference);
            if !self.links.is_rewritable(&current) {
                tracing::debug!(path = %current.display(), "not rewriting binary match");
                continue;
            }
            let result = self
                .links
                .transform(&current, old_ref, new_ref)
                .and_then(|updated| match updated {
                    Some(text) => journal.replace_contents(&current, text.as_bytes()).map(|_| true),
                    None => Ok(false),
                });
            match result {
                Ok(true) if current != renamed && !outcome.changed_files.contains(&current) => {
                    outcome.changed_files.push(current);
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(path = %current.display(), error = %err, "link rewrite failed");
                    outcome.warnings.push(VaultError::LinkRewriteFailure {
                        path: current,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    /// Brings the node records in line with a rename that already happened on disk.
    pub fn apply_rename(
        &self,
        graph: &mut Graph,
        old_abs: &Path,
        new_abs: &Path,
    ) -> Result<Option<StableId>, VaultError> {
        let old_rel = self.rel(old_abs)?;
        let new_rel = self.rel(new_abs)?;
        let (new_dir, new_name) = rel_split(&new_rel);
        let supported = self.config.is_supported(new_abs);

        let Some(key) = graph.find_by_path(&old_rel).cloned() else {
            let meta = fs::metadata(new_abs).map_err(VaultError::io(new_abs))?;
            if meta.is_dir() {
                let key = graph.unique_key(dir_identity(&new_rel));
                graph.insert_node(
                    key.clone(),
                    Node::Directory(DirectoryNode::from_dir_name(new_dir, new_name)),
                );
                return Ok(Some(key));
            }
            if meta.is_file() && supported {
                let key = graph.unique_key(file_identity(&meta));
                graph.insert_node(key.clone(), Node::File(FileNode::from_file_name(new_dir, new_name)));
                return Ok(Some(key));
            }
            return Ok(None);
        };

        let is_directory = graph.node(&key).is_some_and(Node::is_directory);
        if is_directory {
            graph.insert_node(
                key.clone(),
                Node::Directory(DirectoryNode::from_dir_name(new_dir, new_name)),
            );
            let moved = graph.rebase_paths(&old_rel, &new_rel);
            tracing::debug!(from = %old_rel, to = %new_rel, entries = moved, "rebased directory");
            Ok(Some(key))
        } else if supported {
            graph.insert_node(key.clone(), Node::File(FileNode::from_file_name(new_dir, new_name)));
            Ok(Some(key))
        } else {
            tracing::debug!(path = %new_rel, "renamed to unsupported extension, dropping node");
            graph.remove_node(&key);
            Ok(None)
        }
    }

    // ========================================================================
    // Move
    // ========================================================================

    /// Resolves sources and allocates their IDs in input order.
    ///
    /// Surrogate IDs count as taken, so a new note never silently fills the
    /// slot of a missing ancestor.
    pub fn plan_move(
        &self,
        graph: &Graph,
        sources: &[StableId],
        target: &StableId,
    ) -> Result<MovePlan, VaultError> {
        let target_node = graph
            .node(target)
            .ok_or_else(|| VaultError::TargetNotFound(target.clone()))?;
        let dest_rel = target_node.placement_dir();
        let dest_dir = self.abs(&dest_rel);
        let target_id = target_node.folgezettel_id().cloned();

        let mut used: Vec<String> = graph.folgezettel_ids().map(str::to_string).collect();
        let mut seen = HashSet::new();
        let mut steps = Vec::new();

        for key in sources {
            if !seen.insert(key) {
                continue;
            }
            let node = graph
                .node(key)
                .filter(|n| !n.is_surrogate())
                .ok_or_else(|| VaultError::SourceNotFound(key.clone()))?;
            if key == target {
                return Err(VaultError::MoveIntoSelf(key.clone()));
            }
            if let Node::Directory(dir) = node {
                if rel_within(&dest_rel, &dir.own_path()) {
                    return Err(VaultError::MoveIntoSelf(key.clone()));
                }
            }

            let rel = node
                .relative_path()
                .ok_or_else(|| VaultError::SourceNotFound(key.clone()))?;
            let old_ref = NoteRef::from_node(node);

            let (new_ref, final_name) = match &target_id {
                Some(parent) => {
                    let id = next_child_id(parent.as_str(), used.iter().map(String::as_str))?;
                    used.push(id.clone());
                    let final_name = format!("{id} {}{}", node.name(), node.extension());
                    (NoteRef::new(Some(&id), node.name()), final_name)
                }
                None => (
                    old_ref.clone(),
                    node.file_name().unwrap_or_default().to_string(),
                ),
            };
            let references = self.references_to(&dest_dir.join(&final_name), &old_ref, &new_ref)?;

            steps.push(MoveStep {
                key: key.clone(),
                source: self.abs(&rel),
                old_ref,
                new_ref,
                final_name,
                references,
            });
        }

        Ok(MovePlan { dest_dir, steps })
    }

    /// Second half of a move: the sources already sit in the destination
    /// directory under their old names.
    pub fn finish_move(
        &self,
        graph: &mut Graph,
        journal: &mut FsJournal,
        plan: &MovePlan,
        moved: &[PathBuf],
        outcome: &mut MutationOutcome,
    ) -> Result<(), VaultError> {
        for (step, moved_path) in plan.steps.iter().zip(moved) {
            self.apply_rename(graph, &step.source, moved_path)?;

            let final_path = plan.dest_dir.join(&step.final_name);
            if &final_path == moved_path {
                outcome.renamed.push(RenamedEntry {
                    stable_id: Some(step.key.clone()),
                    from: step.source.clone(),
                    to: final_path,
                    folgezettel_id: step.new_ref.id.clone(),
                });
                continue;
            }

            self.rename(
                graph,
                journal,
                moved_path,
                &final_path,
                &step.old_ref,
                &step.new_ref,
                &step.references,
                outcome,
            )?;
            if let Some(entry) = outcome.renamed.last_mut() {
                entry.from = step.source.clone();
            }
            tracing::debug!(
                key = %step.key,
                to = %final_path.display(),
                "moved"
            );
        }
        Ok(())
    }

    // ========================================================================
    // Renumber
    // ========================================================================

    /// New IDs for `key` and every node below it in the ID hierarchy,
    /// shallowest first. All IDs are checked before anything is renamed.
    pub fn plan_renumber(
        &self,
        graph: &Graph,
        key: &StableId,
        new_id: &str,
    ) -> Result<Vec<RenumberStep>, VaultError> {
        if !validate(new_id) {
            return Err(VaultError::InvalidId(new_id.to_string()));
        }
        let node = graph
            .node(key)
            .filter(|n| !n.is_surrogate())
            .ok_or_else(|| VaultError::NotFound(key.to_string()))?;
        let old_id = node
            .folgezettel_id()
            .ok_or_else(|| VaultError::MissingId(key.clone()))?
            .to_string();
        if old_id == new_id {
            return Ok(Vec::new());
        }

        let mut subtree: Vec<(StableId, String)> = graph
            .nodes()
            .filter(|(_, n)| !n.is_surrogate())
            .filter_map(|(k, n)| {
                let id = n.folgezettel_id()?.as_str();
                let within = id == old_id || all_ancestors(id).contains(&old_id.as_str());
                within.then(|| (k.clone(), id.to_string()))
            })
            .collect();
        subtree.sort_by(|a, b| a.1.len().cmp(&b.1.len()).then_with(|| a.1.cmp(&b.1)));

        let moving: HashSet<&StableId> = subtree.iter().map(|(k, _)| k).collect();
        let mut steps = Vec::with_capacity(subtree.len());
        for (k, id) in &subtree {
            let renumbered = format!("{new_id}{}", &id[old_id.len()..]);
            if !validate(&renumbered) {
                return Err(VaultError::InvalidId(renumbered));
            }
            let clash = graph.nodes().find(|(other, n)| {
                !n.is_surrogate()
                    && !moving.contains(other)
                    && n.folgezettel_id().map(|i| i.as_str()) == Some(renumbered.as_str())
            });
            if let Some((other, _)) = clash {
                return Err(VaultError::RenameConflict(self.node_path(graph, other)?));
            }
            let node = graph
                .node(k)
                .ok_or_else(|| VaultError::NotFound(k.to_string()))?;
            let references = self.references_to(
                &self.node_path(graph, k)?,
                &NoteRef::from_node(node),
                &NoteRef::new(Some(&renumbered), node.name()),
            )?;
            steps.push(RenumberStep {
                key: k.clone(),
                new_id: renumbered,
                references,
            });
        }
        Ok(steps)
    }

    pub fn renumber(
        &self,
        graph: &mut Graph,
        journal: &mut FsJournal,
        steps: &[RenumberStep],
        outcome: &mut MutationOutcome,
    ) -> Result<(), VaultError> {
        for step in steps {
            let node = graph
                .node(&step.key)
                .ok_or_else(|| VaultError::NotFound(step.key.to_string()))?;
            let old_abs = self.node_path(graph, &step.key)?;
            let old_ref = NoteRef::from_node(node);
            let new_ref = NoteRef::new(Some(&step.new_id), node.name());
            let new_name = format!("{} {}{}", step.new_id, node.name(), node.extension());
            let new_abs = old_abs.with_file_name(new_name.trim_end());
            self.rename(
                graph,
                journal,
                &old_abs,
                &new_abs,
                &old_ref,
                &new_ref,
                &step.references,
                outcome,
            )?;
        }
        Ok(())
    }

    // ========================================================================
    // Create / delete
    // ========================================================================

    pub fn plan_create(
        &self,
        graph: &Graph,
        parent: &StableId,
        name: &str,
        extension: &str,
    ) -> Result<CreatePlan, VaultError> {
        let parent_node = graph
            .node(parent)
            .ok_or_else(|| VaultError::TargetNotFound(parent.clone()))?;

        let name = name.trim();
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Err(VaultError::InvalidName(name.to_string()));
        }
        let extension = extension.trim_start_matches('.');
        if !self
            .config
            .supported_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
        {
            return Err(VaultError::UnsupportedExtension(extension.to_string()));
        }

        let folgezettel_id = match parent_node.folgezettel_id() {
            Some(id) => Some(next_child_id(id.as_str(), graph.folgezettel_ids())?),
            None => None,
        };
        let file_name = match &folgezettel_id {
            Some(id) => format!("{id} {name}.{extension}"),
            None => format!("{name}.{extension}"),
        };
        let dir = self.abs(&parent_node.placement_dir());
        Ok(CreatePlan {
            path: dir.join(file_name),
            folgezettel_id,
        })
    }

    /// Adds a freshly written file to the graph.
    pub fn register_created(&self, graph: &mut Graph, path: &Path) -> Result<StableId, VaultError> {
        let rel = self.rel(path)?;
        let (dir, file_name) = rel_split(&rel);
        let meta = fs::metadata(path).map_err(VaultError::io(path))?;
        let key = graph.unique_key(file_identity(&meta));
        graph.insert_node(key.clone(), Node::File(FileNode::from_file_name(dir, file_name)));
        Ok(key)
    }

    /// Removes a file or an empty directory. ID children of a deleted note
    /// fall back to a surrogate on the next relink.
    pub fn delete(
        &self,
        graph: &mut Graph,
        journal: &mut FsJournal,
        key: &StableId,
    ) -> Result<PathBuf, VaultError> {
        let node = graph
            .node(key)
            .filter(|n| !n.is_surrogate())
            .ok_or_else(|| VaultError::NotFound(key.to_string()))?;
        let path = self.node_path(graph, key)?;
        if node.is_directory() {
            journal.remove_dir(&path)?;
        } else {
            journal.remove_file(&path)?;
        }
        graph.remove_node(key);
        Ok(path)
    }
}
