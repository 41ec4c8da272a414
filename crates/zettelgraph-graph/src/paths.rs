//! Root-relative paths.
//!
//! Node paths are stored as `/`-separated strings relative to the vault root,
//! with `""` standing for the root itself.

use std::path::{Component, Path, PathBuf};

/// `dir` + `name`, without a leading separator when `dir` is the root.
pub fn rel_join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        dir.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Splits `a/b/c` into `("a/b", "c")` and `c` into `("", "c")`.
pub fn rel_split(rel: &str) -> (&str, &str) {
    match rel.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", rel),
    }
}

/// True when `rel` equals `dir` or lies beneath it.
pub fn rel_within(rel: &str, dir: &str) -> bool {
    dir.is_empty()
        || rel == dir
        || (rel.len() > dir.len() && rel.starts_with(dir) && rel.as_bytes()[dir.len()] == b'/')
}

/// Rewrites the `from` prefix of `rel` to `to`. Returns `None` when `rel` is not within `from`.
pub fn rel_rebase(rel: &str, from: &str, to: &str) -> Option<String> {
    if !rel_within(rel, from) {
        return None;
    }
    let rest = rel[from.len()..].trim_start_matches('/');
    Some(rel_join(to, rest))
}

/// Converts a path below `root` into its relative string form.
pub fn to_rel(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

/// Absolute path of a relative string under `root`.
pub fn to_abs(root: &Path, rel: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in rel.split('/').filter(|p| !p.is_empty()) {
        path.push(part);
    }
    path
}
