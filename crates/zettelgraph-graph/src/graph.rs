use crate::node::{Node, StableId, SurrogateNode};
use crate::paths::rel_rebase;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;
use zettelgraph_id::FolgezettelId;

/// Nodes keyed by stable identity plus parent -> children edges.
///
/// Every node has at most one parent. `relink` recomputes the whole edge set
/// (and the surrogates) from the node records, so callers that change nodes
/// only need to call it once afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Graph {
    nodes: BTreeMap<StableId, Node>,
    edges: BTreeMap<StableId, BTreeSet<StableId>>,
    #[serde(skip)]
    parents: HashMap<StableId, StableId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, key: &StableId) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn node_mut(&mut self, key: &StableId) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    pub fn contains(&self, key: &StableId) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&StableId, &Node)> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> &BTreeMap<StableId, BTreeSet<StableId>> {
        &self.edges
    }

    /// Inserts or replaces a node. Edges are untouched until the next `relink`.
    pub fn insert_node(&mut self, key: StableId, node: Node) -> Option<Node> {
        self.nodes.insert(key, node)
    }

    /// Removes a node together with every edge touching it.
    pub fn remove_node(&mut self, key: &StableId) -> Option<Node> {
        let node = self.nodes.remove(key)?;
        self.detach(key);
        if let Some(children) = self.edges.remove(key) {
            for child in children {
                self.parents.remove(&child);
            }
        }
        Some(node)
    }

    /// Adds `parent -> child`, replacing any previous parent of `child`.
    pub fn add_edge(&mut self, parent: StableId, child: StableId) {
        self.detach(&child);
        self.edges
            .entry(parent.clone())
            .or_default()
            .insert(child.clone());
        self.parents.insert(child, parent);
    }

    /// Drops the incoming edge of `child`, if any.
    pub fn detach(&mut self, child: &StableId) -> Option<StableId> {
        let parent = self.parents.remove(child)?;
        if let Some(siblings) = self.edges.get_mut(&parent) {
            siblings.remove(child);
            if siblings.is_empty() {
                self.edges.remove(&parent);
            }
        }
        Some(parent)
    }

    pub fn parent(&self, key: &StableId) -> Option<&StableId> {
        self.parents.get(key)
    }

    pub fn children(&self, key: &StableId) -> impl Iterator<Item = &StableId> + '_ {
        self.edges.get(key).into_iter().flatten()
    }

    /// Nodes without a parent, in key order.
    pub fn roots(&self) -> Vec<&StableId> {
        self.nodes
            .keys()
            .filter(|key| !self.parents.contains_key(*key))
            .collect()
    }

    /// All nodes below `key`, depth first.
    pub fn descendants(&self, key: &StableId) -> Vec<StableId> {
        let mut out = Vec::new();
        let mut seen: HashSet<&StableId> = HashSet::from([key]);
        let mut stack: Vec<&StableId> = self.children(key).collect();
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            out.push(next.clone());
            stack.extend(self.children(next));
        }
        out
    }

    /// True when `ancestor` is `key` itself or sits on its parent chain.
    pub fn is_ancestor(&self, ancestor: &StableId, key: &StableId) -> bool {
        let mut current = Some(key);
        while let Some(k) = current {
            if k == ancestor {
                return true;
            }
            current = self.parents.get(k);
        }
        false
    }

    /// Real node carrying `id`, falling back to its surrogate.
    pub fn find_by_folgezettel(&self, id: &str) -> Option<&StableId> {
        let mut surrogate = None;
        for (key, node) in &self.nodes {
            if node.folgezettel_id().map(FolgezettelId::as_str) == Some(id) {
                if !node.is_surrogate() {
                    return Some(key);
                }
                surrogate = Some(key);
            }
        }
        surrogate
    }

    /// Real node whose root-relative path is `rel`.
    pub fn find_by_path(&self, rel: &str) -> Option<&StableId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.relative_path().as_deref() == Some(rel))
            .map(|(key, _)| key)
    }

    /// Every Folgezettel ID in the graph, surrogates included.
    pub fn folgezettel_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .values()
            .filter_map(|node| node.folgezettel_id().map(FolgezettelId::as_str))
    }

    /// `base`, or `base~N` with the smallest N not yet taken.
    pub fn unique_key(&self, base: String) -> StableId {
        let candidate = StableId::new(base.clone());
        if !self.nodes.contains_key(&candidate) {
            return candidate;
        }
        (1u32..)
            .map(|n| StableId::new(format!("{base}~{n}")))
            .find(|key| !self.nodes.contains_key(key))
            .unwrap_or(candidate)
    }

    /// Rewrites the containing path of every entry within `from` to live within `to`.
    pub fn rebase_paths(&mut self, from: &str, to: &str) -> usize {
        let mut moved = 0;
        for node in self.nodes.values_mut() {
            if node.is_surrogate() {
                continue;
            }
            if let Some(path) = rel_rebase(node.path(), from, to) {
                node.set_path(path);
                moved += 1;
            }
        }
        moved
    }

    // ========================================================================
    // Edge computation
    // ========================================================================

    /// Recomputes surrogates and edges from the node records.
    ///
    /// A non-root ID is parented by the node carrying its derived parent ID,
    /// or by a surrogate for it. Everything else is parented by the directory
    /// that contains it, unless that is the root. An ID edge that would close
    /// a cycle (an ID folder holding its own ID ancestor) is replaced by the
    /// folder edge.
    pub fn relink(&mut self) {
        self.nodes.retain(|_, node| !node.is_surrogate());
        self.edges.clear();
        self.parents.clear();

        let mut by_id: HashMap<String, StableId> = HashMap::new();
        let mut dirs: HashMap<String, StableId> = HashMap::new();
        for (key, node) in &self.nodes {
            if let Some(id) = node.folgezettel_id() {
                if let Some(existing) = by_id.get(id.as_str()) {
                    tracing::warn!(
                        folgezettel_id = %id,
                        kept = %existing,
                        duplicate = %key,
                        "duplicate Folgezettel ID"
                    );
                } else {
                    by_id.insert(id.to_string(), key.clone());
                }
            }
            if let Node::Directory(dir) = node {
                dirs.insert(dir.own_path(), key.clone());
            }
        }

        let mut surrogates: BTreeMap<StableId, Node> = BTreeMap::new();
        let mut folder_links: Vec<(StableId, StableId)> = Vec::new();
        let mut surrogate_links: Vec<(StableId, StableId)> = Vec::new();
        let mut id_links: Vec<(StableId, StableId)> = Vec::new();

        for (key, node) in &self.nodes {
            match node.folgezettel_id() {
                Some(id) if !id.is_root() => {
                    let mut child = key.clone();
                    let mut current = id.clone();
                    while let Some(parent_id) = current.parent() {
                        let existing = by_id.get(parent_id.as_str()).cloned();
                        let parent_key = match &existing {
                            Some(found) => found.clone(),
                            None => {
                                let surrogate_key = StableId::surrogate_for(parent_id.as_str());
                                by_id.insert(parent_id.to_string(), surrogate_key.clone());
                                surrogates.insert(
                                    surrogate_key.clone(),
                                    Node::Surrogate(SurrogateNode {
                                        folgezettel_id: parent_id.clone(),
                                    }),
                                );
                                surrogate_key
                            }
                        };
                        if &child == key {
                            id_links.push((parent_key.clone(), child));
                        } else {
                            surrogate_links.push((parent_key.clone(), child));
                        }
                        if existing.is_some() {
                            break;
                        }
                        child = parent_key;
                        current = parent_id;
                    }
                }
                _ => {
                    if let Some(dir_key) = folder_parent(&dirs, key, node) {
                        folder_links.push((dir_key, key.clone()));
                    }
                }
            }
        }

        self.nodes.extend(surrogates);
        for (parent, child) in folder_links.into_iter().chain(surrogate_links) {
            self.add_edge(parent, child);
        }
        for (parent, child) in id_links {
            if !self.is_ancestor(&child, &parent) {
                self.add_edge(parent, child);
                continue;
            }
            tracing::warn!(node = %child, parent = %parent, "ID edge would form a cycle, using folder edge");
            let fallback = self
                .nodes
                .get(&child)
                .and_then(|node| folder_parent(&dirs, &child, node))
                .filter(|dir_key| !self.is_ancestor(&child, dir_key));
            if let Some(dir_key) = fallback {
                self.add_edge(dir_key, child);
            }
        }
        self.prune_childless_surrogates();
    }

    /// Surrogates exist only to hold children; drops the ones left without.
    fn prune_childless_surrogates(&mut self) {
        loop {
            let childless: Vec<StableId> = self
                .nodes
                .iter()
                .filter(|(key, node)| node.is_surrogate() && !self.edges.contains_key(*key))
                .map(|(key, _)| key.clone())
                .collect();
            if childless.is_empty() {
                break;
            }
            for key in childless {
                self.remove_node(&key);
            }
        }
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Indented tree of labels, roots in key order.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        let mut seen: HashSet<&StableId> = HashSet::new();
        let mut stack: Vec<(&StableId, usize)> =
            self.sorted_by_label(self.roots()).into_iter().rev().map(|k| (k, 0)).collect();
        while let Some((key, depth)) = stack.pop() {
            if !seen.insert(key) {
                continue;
            }
            let Some(node) = self.nodes.get(key) else {
                continue;
            };
            let _ = writeln!(out, "{}{}", "  ".repeat(depth), node.label());
            let children = self.sorted_by_label(self.children(key).collect());
            stack.extend(children.into_iter().rev().map(|k| (k, depth + 1)));
        }
        out
    }

    fn sorted_by_label<'a>(&'a self, mut keys: Vec<&'a StableId>) -> Vec<&'a StableId> {
        keys.sort_by_cached_key(|key| {
            self.nodes
                .get(*key)
                .map(|node| (node.folgezettel_id().cloned(), node.label()))
        });
        keys
    }

    /// Root-relative path of a real node.
    pub fn relative_path(&self, key: &StableId) -> Option<String> {
        self.nodes.get(key).and_then(Node::relative_path)
    }

    /// Root-relative directory that entries placed under `key` land in.
    pub fn placement_dir(&self, key: &StableId) -> Option<String> {
        self.nodes.get(key).map(Node::placement_dir)
    }
}

/// Directory holding `node`, unless that is the root or the node itself.
fn folder_parent(dirs: &HashMap<String, StableId>, key: &StableId, node: &Node) -> Option<StableId> {
    let container = node.path();
    if container.is_empty() {
        return None;
    }
    dirs.get(container).filter(|dir_key| *dir_key != key).cloned()
}
