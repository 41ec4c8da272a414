//! Grammar, ancestry and sibling allocation.
//!
//! Grammar (`X` is any non-digit, non-whitespace character, `S` a terminator):
//!
//! ```text
//! id := DD (X DD)* (X S?)?
//! ```
//!
//! All functions count characters, not bytes, so hops may be non-ASCII.

use crate::error::IdError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Characters allowed as the final character of an ID in place of a hop's digits.
pub const TERMINATORS: &[char] = &['!', '@', '#', '$', '%', '^', '&', '*', '_'];

pub fn is_terminator(c: char) -> bool {
    TERMINATORS.contains(&c)
}

/// Returns true when `id` conforms to the grammar. Total: never panics.
pub fn validate(id: &str) -> bool {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() < 2 || !chars[0].is_ascii_digit() || !chars[1].is_ascii_digit() {
        return false;
    }

    let mut i = 2;
    while i < chars.len() {
        let hop = chars[i];
        if hop.is_ascii_digit() || hop.is_whitespace() {
            return false;
        }
        match &chars[i + 1..] {
            [] => return true,
            [last] if is_terminator(*last) => return true,
            [a, b, ..] if a.is_ascii_digit() && b.is_ascii_digit() => i += 3,
            _ => return false,
        }
    }
    true
}

/// Derived parent ID, `None` for root-level IDs.
///
/// Purely positional: length 3 keeps the first two characters, a trailing
/// non-digit is dropped, otherwise the trailing two digits are dropped.
pub fn parent_of(id: &str) -> Option<&str> {
    let offsets: Vec<(usize, char)> = id.char_indices().collect();
    let n = offsets.len();
    match n {
        0..=2 => None,
        3 => Some(&id[..offsets[2].0]),
        _ => {
            let (last_at, last) = offsets[n - 1];
            if last.is_ascii_digit() {
                Some(&id[..offsets[n - 2].0])
            } else {
                Some(&id[..last_at])
            }
        }
    }
}

/// Ancestors nearest first, e.g. `08r60e!` -> `[08r60e, 08r60, 08r, 08]`.
pub fn all_ancestors(id: &str) -> Vec<&str> {
    let mut ancestors = Vec::new();
    let mut current = id;
    while let Some(parent) = parent_of(current) {
        ancestors.push(parent);
        current = parent;
    }
    ancestors
}

/// Number of hops between `id` and its root.
pub fn depth(id: &str) -> usize {
    all_ancestors(id).len()
}

/// Allocates the first unused direct child of `parent`.
///
/// A parent ending in a digit gets the next letter `a..=z`; any other parent
/// gets the next two-digit number `01..=99`. Only entries of `existing` whose
/// derived parent is `parent` count as used, so callers may pass every ID in
/// the tree.
pub fn next_child_id<'a, I>(parent: &str, existing: I) -> Result<String, IdError>
where
    I: IntoIterator<Item = &'a str>,
{
    if !validate(parent) {
        return Err(IdError::InvalidId(parent.to_string()));
    }

    let used: HashSet<&str> = existing
        .into_iter()
        .filter(|child| parent_of(child) == Some(parent))
        .collect();

    let ends_in_digit = parent.chars().last().is_some_and(|c| c.is_ascii_digit());
    let candidates: Box<dyn Iterator<Item = String>> = if ends_in_digit {
        Box::new(('a'..='z').map(|c| format!("{parent}{c}")))
    } else {
        Box::new((1..=99).map(|n| format!("{parent}{n:02}")))
    };

    for candidate in candidates {
        if used.contains(candidate.as_str()) {
            continue;
        }
        // Terminated IDs cannot grow children.
        if !validate(&candidate) {
            return Err(IdError::InvalidId(candidate));
        }
        return Ok(candidate);
    }

    Err(IdError::AllocationExhausted {
        parent: parent.to_string(),
    })
}

/// Splits a file stem (or directory name) into an optional ID and display name.
///
/// The leading token becomes the ID only when it validates and a non-empty
/// remainder follows it; otherwise the whole stem is the name.
pub fn split_file_stem(stem: &str) -> (Option<&str>, &str) {
    if let Some((head, rest)) = stem.trim_start().split_once(char::is_whitespace) {
        let rest = rest.trim_start();
        if !rest.is_empty() && validate(head) {
            return (Some(head), rest);
        }
    }
    (None, stem)
}

// ============================================================================
// Validated newtype
// ============================================================================

/// An ID string known to satisfy [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FolgezettelId(String);

impl FolgezettelId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if validate(&id) {
            Ok(Self(id))
        } else {
            Err(IdError::InvalidId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        parent_of(&self.0).is_none()
    }

    pub fn parent(&self) -> Option<FolgezettelId> {
        parent_of(&self.0).map(|p| Self(p.to_string()))
    }

    /// True when `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &FolgezettelId) -> bool {
        all_ancestors(&other.0).contains(&self.0.as_str())
    }
}

impl TryFrom<String> for FolgezettelId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FolgezettelId> for String {
    fn from(id: FolgezettelId) -> Self {
        id.0
    }
}

impl FromStr for FolgezettelId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for FolgezettelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for FolgezettelId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolgezettelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
