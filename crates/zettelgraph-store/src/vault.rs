use crate::atomic::AtomicOps;
use crate::links::{LinkRewriter, NoteRef};
use crate::mutation::Engine;
use crate::{VaultConfig, VaultError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zettelgraph_graph::{Graph, GraphBuilder, StableId};

// ============================================================================
// Outcomes
// ============================================================================

/// One entry whose name or location changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenamedEntry {
    pub stable_id: Option<StableId>,
    pub from: PathBuf,
    pub to: PathBuf,
    pub folgezettel_id: Option<String>,
}

/// Result of a successful move, rename, renumber or delete.
#[derive(Debug, Default, Serialize)]
pub struct MutationOutcome {
    /// Files whose contents were rewritten, excluding the renamed entries.
    pub changed_files: Vec<PathBuf>,
    /// Non-fatal failures, e.g. a reference that could not be rewritten.
    #[serde(serialize_with = "serialize_warnings")]
    pub warnings: Vec<VaultError>,
    pub renamed: Vec<RenamedEntry>,
    pub removed: Vec<PathBuf>,
}

impl MutationOutcome {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

fn serialize_warnings<S>(warnings: &[VaultError], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(warnings.iter().map(ToString::to_string))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedNote {
    pub stable_id: StableId,
    pub path: PathBuf,
    pub folgezettel_id: Option<String>,
}

// ============================================================================
// Vault
// ============================================================================

/// Handle owning the graph of one note tree.
///
/// Readers take [`Vault::snapshot`]. Mutations and rebuilds are serialized
/// with each other; each one works on a copy of the graph that replaces the
/// shared graph only when the filesystem transaction commits.
///
/// The serialization covers mutations on disjoint paths too: they queue
/// behind one another even though their path locks would not conflict.
/// Callers that need parallel filesystem work on disjoint paths can use
/// [`AtomicOps`] (via [`Vault::atomic_ops`]) directly and [`Vault::rebuild`]
/// afterwards.
pub struct Vault {
    root: PathBuf,
    config: VaultConfig,
    graph: RwLock<Graph>,
    mutations: Mutex<()>,
    ops: Arc<AtomicOps>,
    links: LinkRewriter,
}

impl Vault {
    pub fn open(root: impl Into<PathBuf>, config: VaultConfig) -> Result<Self, VaultError> {
        let root = root.into();
        let graph = GraphBuilder::new(&root, config.build_options()).build()?;
        let links = LinkRewriter::new(&config);
        Ok(Self {
            root,
            config,
            graph: RwLock::new(graph),
            mutations: Mutex::new(()),
            ops: Arc::new(AtomicOps::new()),
            links,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn atomic_ops(&self) -> Arc<AtomicOps> {
        Arc::clone(&self.ops)
    }

    pub fn links(&self) -> &LinkRewriter {
        &self.links
    }

    /// Immutable copy of the current graph.
    pub fn snapshot(&self) -> Graph {
        self.graph.read().clone()
    }

    /// Re-walks the tree and replaces the graph. Waits for in-flight mutations.
    pub fn rebuild(&self) -> Result<Graph, VaultError> {
        let _serial = self.mutations.lock();
        let graph = GraphBuilder::new(&self.root, self.config.build_options()).build()?;
        *self.graph.write() = graph.clone();
        tracing::info!(nodes = graph.len(), "graph rebuilt");
        Ok(graph)
    }

    pub fn resolve_path(&self, key: &StableId) -> Result<PathBuf, VaultError> {
        crate::resolve_path(&self.root, &self.graph.read(), key)
    }

    pub fn next_child_id(&self, parent: &StableId) -> Result<String, VaultError> {
        crate::next_child_id(&self.graph.read(), parent)
    }

    fn engine(&self) -> Engine<'_> {
        Engine {
            root: &self.root,
            config: &self.config,
            links: &self.links,
        }
    }

    /// Absolute form of `path`; relative paths are taken from the root.
    fn absolute(&self, path: &Path) -> Result<PathBuf, VaultError> {
        let abs = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        if !abs.starts_with(&self.root) || abs == self.root {
            return Err(VaultError::OutsideRoot(path.to_path_buf()));
        }
        Ok(abs)
    }

    fn commit(&self, mut working: Graph, operation: &str) {
        working.relink();
        *self.graph.write() = working;
        tracing::info!(operation, "mutation committed");
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Renames a file or directory, deriving the old and new references from
    /// the two basenames.
    pub fn rename(&self, old: &Path, new: &Path) -> Result<MutationOutcome, VaultError> {
        self.rename_with(old, new, None, None)
    }

    /// Renames with caller-supplied references.
    pub fn rename_with(
        &self,
        old: &Path,
        new: &Path,
        old_ref: Option<NoteRef>,
        new_ref: Option<NoteRef>,
    ) -> Result<MutationOutcome, VaultError> {
        let old_abs = self.absolute(old)?;
        let new_abs = self.absolute(new)?;
        let old_ref = old_ref.unwrap_or_else(|| NoteRef::from_path(&old_abs));
        let new_ref = new_ref.unwrap_or_else(|| NoteRef::from_path(&new_abs));

        let _serial = self.mutations.lock();
        let mut working = self.graph.read().clone();
        let engine = self.engine();
        let renamed_key = engine
            .rel(&old_abs)
            .ok()
            .and_then(|rel| working.find_by_path(&rel).cloned());
        engine.check_id_free(&working, renamed_key.as_ref(), &old_ref, &new_ref)?;
        let references = engine.references_to(&new_abs, &old_ref, &new_ref)?;
        let mut outcome = MutationOutcome::default();

        self.ops.atomic_rename(&old_abs, &new_abs, &references, |journal| {
            let key = engine.apply_rename(&mut working, &old_abs, &new_abs)?;
            engine.rewrite_references(journal, &references, &new_abs, &old_ref, &new_ref, &mut outcome);
            outcome.renamed.push(RenamedEntry {
                stable_id: key,
                from: old_abs.clone(),
                to: new_abs.clone(),
                folgezettel_id: new_ref.id.clone(),
            });
            Ok(())
        })?;

        tracing::info!(
            from = %old_abs.display(),
            to = %new_abs.display(),
            changed = outcome.changed_files.len(),
            "renamed"
        );
        self.commit(working, "rename");
        Ok(outcome)
    }

    /// Moves `sources` under `target`, in the given order.
    ///
    /// With an ID-bearing target each source gets the next free child ID of
    /// the target, sequentially, and references are rewritten. The whole
    /// batch is undone if any source fails.
    pub fn move_nodes(
        &self,
        sources: &[StableId],
        target: &StableId,
    ) -> Result<MutationOutcome, VaultError> {
        let _serial = self.mutations.lock();
        let mut working = self.graph.read().clone();
        let engine = self.engine();
        let plan = engine.plan_move(&working, sources, target)?;
        let mut outcome = MutationOutcome::default();

        self.ops
            .atomic_move(&plan.sources(), &plan.dest_dir, &plan.lock_set(), |journal, moved| {
                engine.finish_move(&mut working, journal, &plan, moved, &mut outcome)
            })?;

        tracing::info!(sources = plan.steps.len(), target = %target, "moved");
        self.commit(working, "move");
        Ok(outcome)
    }

    /// Creates a note under `parent`. It gets the parent's next child ID when
    /// the parent has one.
    pub fn create(
        &self,
        parent: &StableId,
        name: &str,
        extension: &str,
        contents: &str,
    ) -> Result<CreatedNote, VaultError> {
        let _serial = self.mutations.lock();
        let mut working = self.graph.read().clone();
        let engine = self.engine();
        let plan = engine.plan_create(&working, parent, name, extension)?;

        let stable_id = self
            .ops
            .atomic_create(&plan.path, contents.as_bytes(), |_| {
                engine.register_created(&mut working, &plan.path)
            })?;

        self.commit(working, "create");
        Ok(CreatedNote {
            stable_id,
            path: plan.path,
            folgezettel_id: plan.folgezettel_id,
        })
    }

    /// Removes a note, or an empty directory, from disk and graph.
    pub fn delete(&self, key: &StableId) -> Result<MutationOutcome, VaultError> {
        let _serial = self.mutations.lock();
        let mut working = self.graph.read().clone();
        let engine = self.engine();
        let path = engine.node_path(&working, key)?;
        let mut outcome = MutationOutcome::default();

        self.ops.transaction([path], |journal| {
            let removed = engine.delete(&mut working, journal, key)?;
            outcome.removed.push(removed);
            Ok(())
        })?;

        self.commit(working, "delete");
        Ok(outcome)
    }

    /// Changes the ID of `key` and of every node below it in the ID hierarchy.
    pub fn renumber(&self, key: &StableId, new_id: &str) -> Result<MutationOutcome, VaultError> {
        let _serial = self.mutations.lock();
        let mut working = self.graph.read().clone();
        let engine = self.engine();
        let steps = engine.plan_renumber(&working, key, new_id)?;
        let mut outcome = MutationOutcome::default();
        if steps.is_empty() {
            return Ok(outcome);
        }

        let mut touched = steps
            .iter()
            .map(|step| engine.node_path(&working, &step.key))
            .collect::<Result<Vec<_>, _>>()?;
        touched.extend(steps.iter().flat_map(|step| step.references.iter().cloned()));

        self.ops.transaction(touched, |journal| {
            engine.renumber(&mut working, journal, &steps, &mut outcome)
        })?;

        tracing::info!(key = %key, new_id, nodes = steps.len(), "renumbered");
        self.commit(working, "renumber");
        Ok(outcome)
    }
}
