// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for the watch service

use std::path::Path;

use crate::error::WatchResult;

/// Kinds of change events a watched directory can report
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A direct child appeared
    Create,
    /// A direct child disappeared
    Delete,
    /// A direct child's modification signature changed
    Modify,
    /// Events were dropped because the key's queue was full
    Overflow,
}

/// An immutable change event delivered through a watch key.
///
/// `name` is the changed child's name relative to the watched directory;
/// it is `None` for [`EventKind::Overflow`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    /// Repeat count, always >= 1
    pub count: u64,
    pub name: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            count: 1,
            name: Some(name.into()),
        }
    }

    /// Sentinel event indicating dropped events
    pub fn overflow() -> Self {
        Self {
            kind: EventKind::Overflow,
            count: 1,
            name: None,
        }
    }
}

/// One row of a directory listing.
///
/// The `(is_dir, mtime)` pair is the entry's modification signature; two
/// listings of the same child compare equal exactly when the signature is
/// unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildEntry {
    pub name: String,
    pub is_dir: bool,
    pub mtime: i64,
}

/// Read-only view of the filesystem the watch service polls.
///
/// This is the seam to the storage layer: the service never touches file
/// content, it only lists direct children and reads attributes. Both
/// operations fail with `NotFound` / `NotADirectory` under the same
/// conditions as registration validation.
#[cfg_attr(test, mockall::automock)]
pub trait FsView: Send + Sync {
    /// Get attributes for a single path
    fn stat(&self, path: &Path) -> WatchResult<ChildEntry>;

    /// List the direct children of a directory with their signatures
    fn list_children(&self, dir: &Path) -> WatchResult<Vec<ChildEntry>>;
}
