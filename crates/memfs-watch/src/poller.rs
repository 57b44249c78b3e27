// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Polling engine: periodic snapshot and diff of watched directories
//!
//! One background thread per POLLING period of a service. Each cycle lists
//! every watched directory through the [`FsView`] collaborator, diffs the
//! listing against the directory's previous snapshot and pushes synthesized
//! events into the owning key's queue. Listings happen without the service
//! lock held; results for keys cancelled mid-listing are discarded when the
//! lock is re-taken.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::WatchError;
use crate::registry::{ServiceState, Shared};
use crate::types::{ChildEntry, Event, EventKind, FsView};

/// Modification signature of one directory child
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct EntrySig {
    pub(crate) is_dir: bool,
    pub(crate) mtime: i64,
}

/// Point-in-time view of a directory's direct children.
///
/// Backed by a `BTreeMap` so a diff emits events in lexicographic child
/// order, which keeps per-cycle event order deterministic.
#[derive(Clone, Debug, Default)]
pub(crate) struct DirSnapshot {
    entries: BTreeMap<String, EntrySig>,
}

impl DirSnapshot {
    pub(crate) fn from_listing(listing: &[ChildEntry]) -> Self {
        let entries = listing
            .iter()
            .map(|child| {
                (
                    child.name.clone(),
                    EntrySig {
                        is_dir: child.is_dir,
                        mtime: child.mtime,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Events taking this snapshot to `new`: CREATE for names only in
    /// `new`, DELETE for names only in `self`, MODIFY for names in both
    /// whose signature changed.
    pub(crate) fn diff(&self, new: &DirSnapshot) -> Vec<Event> {
        let mut events = Vec::new();
        for (name, old_sig) in &self.entries {
            match new.entries.get(name) {
                None => events.push(Event::new(EventKind::Delete, name.clone())),
                Some(new_sig) if new_sig != old_sig => {
                    events.push(Event::new(EventKind::Modify, name.clone()));
                }
                Some(_) => {}
            }
        }
        for name in new.entries.keys() {
            if !self.entries.contains_key(name) {
                events.push(Event::new(EventKind::Create, name.clone()));
            }
        }
        events.sort_by(|a, b| a.name.cmp(&b.name));
        events
    }

    /// Drop a child by name; true if it was present
    pub(crate) fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }
}

/// Poller thread body.
///
/// Runs cycles until the service closes, the key set empties or the
/// generation is superseded by a newer poller. The inter-cycle sleep is a
/// `Condvar` timed wait so cancel/close wake it promptly, and the wait is
/// always the full configured interval regardless of cycle duration.
pub(crate) fn run(shared: Arc<Shared>, generation: u64) {
    debug!(interval = ?shared.config.poll_interval, "poller running");
    let mut state = shared.state.lock().unwrap();
    while state.open && state.polling && state.generation == generation {
        let scans: Vec<(u64, PathBuf)> = state
            .keys
            .iter()
            .filter(|(_, key)| key.valid)
            .map(|(id, key)| (*id, key.dir.clone()))
            .collect();
        drop(state);

        // List outside the lock; registration and consumers stay responsive
        // while the collaborator works.
        let results: Vec<_> = scans
            .into_iter()
            .map(|(id, dir)| {
                let listing = shared.fs.list_children(&dir);
                (id, dir, listing)
            })
            .collect();

        state = shared.state.lock().unwrap();
        if !(state.open && state.generation == generation) {
            break;
        }
        for (id, dir, listing) in results {
            apply_scan(&shared, &mut state, id, &dir, listing);
        }

        let (guard, _) = shared
            .poll_cv
            .wait_timeout(state, shared.config.poll_interval)
            .unwrap();
        state = guard;
    }
    debug!("poller exiting");
}

/// Fold one directory's scan result into the registry.
///
/// Caller holds the state lock and has verified the generation.
fn apply_scan(
    shared: &Shared,
    state: &mut ServiceState,
    id: u64,
    dir: &Path,
    listing: Result<Vec<ChildEntry>, WatchError>,
) {
    match listing {
        Ok(listing) => {
            let new_snapshot = DirSnapshot::from_listing(&listing);
            let (events, kinds) = match state.keys.get_mut(&id) {
                Some(key) if key.valid => {
                    let events = key.snapshot.diff(&new_snapshot);
                    key.snapshot = new_snapshot;
                    (events, key.kinds.clone())
                }
                // Cancelled while the listing was in flight: discard.
                _ => return,
            };
            for event in events {
                if kinds.contains(&event.kind) {
                    shared.signal_locked(state, id, event);
                }
            }
        }
        Err(WatchError::NotFound) | Err(WatchError::NotADirectory) => {
            directory_gone(shared, state, id, dir);
        }
        Err(err) => {
            // Transient: skip this directory for the cycle, retry next one.
            warn!(dir = %dir.display(), error = %err, "directory scan failed, skipping this cycle");
        }
    }
}

/// Terminal handling for a watched directory that no longer exists (or is
/// no longer a directory): synthesize a DELETE on any registration of the
/// parent directory, then invalidate the key.
fn directory_gone(shared: &Shared, state: &mut ServiceState, id: u64, dir: &Path) {
    match state.keys.get(&id) {
        Some(key) if key.valid => {}
        _ => return,
    }
    debug!(dir = %dir.display(), "watched directory disappeared, cancelling key");

    if let (Some(parent), Some(name)) = (
        dir.parent(),
        dir.file_name().and_then(|name| name.to_str()),
    ) {
        let parent_ids: Vec<u64> = state
            .keys
            .iter()
            .filter(|(&parent_id, key)| {
                parent_id != id
                    && key.valid
                    && key.dir.as_path() == parent
                    && key.kinds.contains(&EventKind::Delete)
            })
            .map(|(parent_id, _)| *parent_id)
            .collect();
        for parent_id in parent_ids {
            // Only synthesize if the parent's snapshot still lists the
            // name, and retire it there so the parent's own next diff does
            // not report the deletion a second time.
            let seen = match state.keys.get_mut(&parent_id) {
                Some(parent_key) => parent_key.snapshot.remove(name),
                None => false,
            };
            if seen {
                shared.signal_locked(
                    state,
                    parent_id,
                    Event::new(EventKind::Delete, name),
                );
            }
        }
    }

    shared.invalidate_locked(state, id);
}
