//! Wiki-link discovery and rewriting.
//!
//! A note `01a Test Note.md` is referenced as `[[01a Test Note]]`, `[[01a]]`
//! or `[[01a Test Note|alias]]`. Notes without an ID are referenced by name
//! alone, with or without an alias.

use crate::atomic::write_atomically;
use crate::{VaultConfig, VaultError};
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};
use zettelgraph_graph::Node;
use zettelgraph_id::split_file_stem;

/// How a note is referenced: optional ID plus display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteRef {
    pub id: Option<String>,
    pub name: String,
}

impl NoteRef {
    pub fn new(id: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            id: id.filter(|id| !id.is_empty()).map(str::to_string),
            name: name.into(),
        }
    }

    /// Derives the reference from a basename such as `01a Test Note.md`.
    pub fn from_file_name(file_name: &str) -> Self {
        let stem = match file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => file_name,
        };
        let (id, name) = split_file_stem(stem);
        Self::new(id, name)
    }

    pub fn from_path(path: &Path) -> Self {
        Self::from_file_name(
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default(),
        )
    }

    pub fn from_node(node: &Node) -> Self {
        Self::new(node.folgezettel_id().map(|id| id.as_str()), node.name())
    }

    /// Text of the full link, `id name` or just `name`.
    pub fn link_text(&self) -> String {
        match &self.id {
            Some(id) => format!("{id} {}", self.name),
            None => self.name.clone(),
        }
    }

    /// Text of the short link, `id` or `name` when there is no ID.
    pub fn short_text(&self) -> String {
        self.id.clone().unwrap_or_else(|| self.name.clone())
    }

    fn pattern(&self) -> String {
        let full = regex::escape(&self.link_text());
        match &self.id {
            Some(id) => format!(
                r"\[\[(?:(?P<full>{full})(?:\|(?P<alias>[^\]]*))?|(?P<bare>{}))\]\]",
                regex::escape(id)
            ),
            None => format!(r"\[\[(?P<full>{full})(?:\|(?P<alias>[^\]]*))?\]\]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteStatus {
    /// Extension outside the rewritable set; the file was not opened.
    Skipped,
    Unchanged,
    Rewritten,
}

/// Replaces every reference to `old` in `content` with one to `new`.
/// Returns `None` when nothing changed.
pub fn rewrite_content(
    content: &str,
    old: &NoteRef,
    new: &NoteRef,
) -> Result<Option<String>, regex::Error> {
    let re = Regex::new(&old.pattern())?;
    let full = new.link_text();
    let short = new.short_text();

    let replaced = re.replace_all(content, |caps: &Captures| {
        if caps.name("bare").is_some() {
            format!("[[{short}]]")
        } else if let Some(alias) = caps.name("alias") {
            format!("[[{full}|{}]]", alias.as_str())
        } else {
            format!("[[{full}]]")
        }
    });

    Ok(match replaced {
        Cow::Owned(text) if text != content => Some(text),
        _ => None,
    })
}

#[derive(Debug, Clone)]
pub struct LinkRewriter {
    rewritable_extensions: Vec<String>,
    skip_hidden: bool,
}

impl LinkRewriter {
    pub fn new(config: &VaultConfig) -> Self {
        Self {
            rewritable_extensions: config.rewritable_extensions.clone(),
            skip_hidden: config.skip_hidden,
        }
    }

    pub fn is_rewritable(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| {
                zettelgraph_graph::has_extension(name, &self.rewritable_extensions)
            })
    }

    /// Every file under `root` whose bytes contain a reference to `target`.
    ///
    /// Matches by content regardless of extension; callers decide what to rewrite.
    pub fn find_references(&self, root: &Path, target: &NoteRef) -> Result<Vec<PathBuf>, VaultError> {
        let re = regex::bytes::Regex::new(&target.pattern()).map_err(|err| {
            VaultError::LinkRewriteFailure {
                path: root.to_path_buf(),
                reason: err.to_string(),
            }
        })?;

        let skip_hidden = self.skip_hidden;
        let mut matches = Vec::new();
        for entry in WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !(skip_hidden && is_hidden(e)))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            match std::fs::read(entry.path()) {
                Ok(bytes) if re.is_match(&bytes) => matches.push(entry.into_path()),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(path = %entry.path().display(), error = %err, "cannot scan file");
                }
            }
        }

        tracing::debug!(
            target_ref = %target.link_text(),
            files = matches.len(),
            "found references"
        );
        Ok(matches)
    }

    /// Reads `path` and returns its rewritten content, or `None` when it is
    /// skipped or has nothing to change.
    pub fn transform(
        &self,
        path: &Path,
        old: &NoteRef,
        new: &NoteRef,
    ) -> Result<Option<String>, VaultError> {
        if !self.is_rewritable(path) {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(VaultError::io(path))?;
        rewrite_content(&content, old, new).map_err(|err| VaultError::LinkRewriteFailure {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }

    /// Rewrites `path` in place. The whole file is transformed in memory and
    /// written through a temporary file, so it is never partially written.
    pub fn rewrite(
        &self,
        path: &Path,
        old: &NoteRef,
        new: &NoteRef,
    ) -> Result<RewriteStatus, VaultError> {
        if !self.is_rewritable(path) {
            return Ok(RewriteStatus::Skipped);
        }
        match self.transform(path, old, new)? {
            Some(updated) => {
                write_atomically(path, updated.as_bytes())?;
                Ok(RewriteStatus::Rewritten)
            }
            None => Ok(RewriteStatus::Unchanged),
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}
