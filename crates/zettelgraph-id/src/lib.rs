//! Folgezettel IDs
//!
//! A Folgezettel ID encodes a note's position in a strict hierarchy:
//!
//! ```text
//!   08          root (exactly two digits)
//!   08r         hop: one non-digit character
//!   08r60       ... optionally followed by two digits
//!   08r60e      next hop
//!   08r60e!     terminator from `!@#$%^&*_`, only as the final character
//! ```
//!
//! This crate validates IDs, derives their ancestry and allocates the next
//! free child ID under a parent. It has no filesystem knowledge; the graph
//! and store crates build on it.

pub mod error;
pub mod folgezettel;

pub use error::IdError;
pub use folgezettel::{
    all_ancestors, depth, is_terminator, next_child_id, parent_of, split_file_stem, validate,
    FolgezettelId, TERMINATORS,
};
