// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Watch key registry and event queue delivery
//!
//! This module owns all shared mutable state of a watch service: the key
//! table, each key's bounded pending-event queue, and the ready queue that
//! `take`/`poll` consumers drain. Everything is guarded by a single mutex so
//! that key state transitions and ready-queue membership stay atomic with
//! respect to each other; the invariant is that a signalled key is present
//! in the ready queue exactly once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::WatchConfig;
use crate::error::{WatchError, WatchResult};
use crate::poller::{self, DirSnapshot};
use crate::types::{Event, EventKind, FsView};

/// Per-key registry entry
pub(crate) struct KeyData {
    pub(crate) dir: PathBuf,
    pub(crate) kinds: HashSet<EventKind>,
    pub(crate) queue: VecDeque<Event>,
    /// True while the key has pending events; implies ready-queue membership
    /// until a consumer takes it.
    pub(crate) signalled: bool,
    pub(crate) valid: bool,
    /// Previous listing of the watched directory, owned by the poller.
    pub(crate) snapshot: DirSnapshot,
}

/// All mutable service state, behind the one service mutex
pub(crate) struct ServiceState {
    pub(crate) open: bool,
    /// POLLING/IDLE engine state; flips synchronously inside register,
    /// cancel and close rather than when the poller thread notices.
    pub(crate) polling: bool,
    /// Bumped every time polling stops so a stale poller thread can tell it
    /// has been superseded.
    pub(crate) generation: u64,
    next_key_id: u64,
    pub(crate) keys: HashMap<u64, KeyData>,
    pub(crate) ready: VecDeque<u64>,
    poller: Option<thread::JoinHandle<()>>,
}

/// State shared between the service handle, its keys and the poller thread
pub(crate) struct Shared {
    pub(crate) state: Mutex<ServiceState>,
    /// Wakes consumers blocked in `take`/`poll`
    pub(crate) ready_cv: Condvar,
    /// Wakes the poller out of its inter-cycle sleep on cancel/close
    pub(crate) poll_cv: Condvar,
    pub(crate) fs: Arc<dyn FsView>,
    pub(crate) config: WatchConfig,
}

impl Shared {
    /// Append an event to a key's queue, applying the capacity/overflow
    /// policy, and signal the key if it was in READY state.
    ///
    /// Caller holds the state lock.
    pub(crate) fn signal_locked(&self, state: &mut ServiceState, id: u64, event: Event) {
        let key = match state.keys.get_mut(&id) {
            Some(key) if key.valid => key,
            _ => return,
        };

        let at_capacity = key.queue.len() >= self.config.queue_capacity;
        match key.queue.back_mut() {
            // Once the queue has overflowed, fold every further event into
            // the sentinel instead of growing.
            Some(last) if last.kind == EventKind::Overflow => last.count += 1,
            _ if at_capacity => key.queue.push_back(Event::overflow()),
            _ => key.queue.push_back(event),
        }

        if !key.signalled {
            key.signalled = true;
            state.ready.push_back(id);
            self.ready_cv.notify_one();
        }
    }

    /// Invalidate a key and stop the poller if no valid keys remain.
    ///
    /// Pending events stay drainable; the entry is dropped from the key
    /// table once the queue is empty. Caller holds the state lock.
    pub(crate) fn invalidate_locked(&self, state: &mut ServiceState, id: u64) {
        if let Some(key) = state.keys.get_mut(&id) {
            if key.valid {
                key.valid = false;
                key.signalled = false;
                state.ready.retain(|&ready_id| ready_id != id);
                if key.queue.is_empty() {
                    state.keys.remove(&id);
                }
            }
        }

        if state.polling && !state.keys.values().any(|key| key.valid) {
            state.polling = false;
            state.generation += 1;
            self.poll_cv.notify_all();
            debug!("last watch key invalidated, stopping poller");
        }
    }
}

/// A directory-watch service driven by periodic polling.
///
/// The service emulates native directory-watch semantics over any
/// [`FsView`]: callers register directories, then block in [`take`] (or
/// bounded-wait in [`poll`]) for keys whose directories have changed. All
/// events are synthesized by diffing successive directory snapshots on a
/// fixed cadence, so changes are observed with up to one poll interval of
/// latency and changes reverted within a single interval can be missed.
///
/// [`take`]: WatchService::take
/// [`poll`]: WatchService::poll
pub struct WatchService {
    shared: Arc<Shared>,
}

impl WatchService {
    pub fn new(fs: Arc<dyn FsView>, config: WatchConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ServiceState {
                    open: true,
                    polling: false,
                    generation: 0,
                    next_key_id: 1,
                    keys: HashMap::new(),
                    ready: VecDeque::new(),
                    poller: None,
                }),
                ready_cv: Condvar::new(),
                poll_cv: Condvar::new(),
                fs,
                config,
            }),
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().unwrap().open
    }

    /// Whether the background poller is running (at least one valid key)
    pub fn is_polling(&self) -> bool {
        self.shared.state.lock().unwrap().polling
    }

    /// Register a directory for the given event kinds.
    ///
    /// Fails with `NotFound` if the target does not exist, `NotADirectory`
    /// if it is not a directory and `Closed` after [`close`]. Every call
    /// returns a fresh independent key, also when the directory is already
    /// registered. Registration takes the initial snapshot and starts the
    /// poller if it is idle.
    ///
    /// [`close`]: WatchService::close
    pub fn register(&self, dir: &Path, kinds: &[EventKind]) -> WatchResult<WatchKey> {
        if kinds.is_empty() {
            return Err(WatchError::InvalidArgument);
        }
        if !self.is_open() {
            return Err(WatchError::Closed);
        }

        let meta = self.shared.fs.stat(dir)?;
        if !meta.is_dir {
            return Err(WatchError::NotADirectory);
        }
        let listing = self.shared.fs.list_children(dir)?;
        let snapshot = DirSnapshot::from_listing(&listing);

        let mut state = self.shared.state.lock().unwrap();
        // Re-check: the service may have closed while we were listing.
        if !state.open {
            return Err(WatchError::Closed);
        }

        let id = state.next_key_id;
        state.next_key_id += 1;
        state.keys.insert(
            id,
            KeyData {
                dir: dir.to_path_buf(),
                kinds: kinds.iter().copied().collect(),
                queue: VecDeque::new(),
                signalled: false,
                valid: true,
                snapshot,
            },
        );

        if !state.polling {
            state.generation += 1;
            let generation = state.generation;
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name("memfs-watch-poller".into())
                .spawn(move || poller::run(shared, generation))?;
            state.polling = true;
            // A superseded handle is dropped here; its thread exits on its
            // own once it observes the generation bump.
            state.poller = Some(handle);
            debug!(dir = %dir.display(), "first watch key registered, starting poller");
        }

        Ok(WatchKey {
            id,
            dir: dir.to_path_buf(),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Block until a key with pending events is available.
    ///
    /// Returns `Err(Closed)` if the service is closed, including when the
    /// close happens while blocked.
    pub fn take(&self) -> WatchResult<WatchKey> {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if !state.open {
                return Err(WatchError::Closed);
            }
            if let Some(key) = Self::pop_ready(&mut state, &self.shared) {
                return Ok(key);
            }
            state = self.shared.ready_cv.wait(state).unwrap();
        }
    }

    /// Bounded-wait variant of [`take`]; a zero timeout is a non-blocking
    /// poll.
    ///
    /// [`take`]: WatchService::take
    pub fn poll(&self, timeout: Duration) -> WatchResult<Option<WatchKey>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if !state.open {
                return Err(WatchError::Closed);
            }
            if let Some(key) = Self::pop_ready(&mut state, &self.shared) {
                return Ok(Some(key));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self
                .shared
                .ready_cv
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
        }
    }

    fn pop_ready(state: &mut ServiceState, shared: &Arc<Shared>) -> Option<WatchKey> {
        while let Some(id) = state.ready.pop_front() {
            if let Some(key) = state.keys.get(&id) {
                return Some(WatchKey {
                    id,
                    dir: key.dir.clone(),
                    shared: Arc::clone(shared),
                });
            }
        }
        None
    }

    /// Close the service: invalidate all keys, wake all blocked consumers
    /// and stop the poller. Idempotent.
    pub fn close(&self) {
        let handle = {
            let mut state = self.shared.state.lock().unwrap();
            if !state.open {
                return;
            }
            state.open = false;
            state.polling = false;
            state.generation += 1;
            state.keys.clear();
            state.ready.clear();
            self.shared.ready_cv.notify_all();
            self.shared.poll_cv.notify_all();
            state.poller.take()
        };
        // Join outside the lock: the poller needs it to observe the close.
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        debug!("watch service closed");
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handle for one directory registration.
///
/// The handle stays usable after cancellation or service close; operations
/// on an invalid key degrade to no-ops (`poll_events` still drains whatever
/// was pending at invalidation time, once).
#[derive(Clone)]
pub struct WatchKey {
    id: u64,
    dir: PathBuf,
    shared: Arc<Shared>,
}

impl WatchKey {
    /// The watched directory this key was registered for
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn is_valid(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.keys.get(&self.id).is_some_and(|key| key.valid)
    }

    /// Cancel the registration. Non-blocking and idempotent; stops the
    /// poller when this was the last valid key.
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock().unwrap();
        self.shared.invalidate_locked(&mut state, self.id);
    }

    /// Atomically drain and return the pending events, in detection order.
    pub fn poll_events(&self) -> Vec<Event> {
        let mut state = self.shared.state.lock().unwrap();
        let Some(key) = state.keys.get_mut(&self.id) else {
            return Vec::new();
        };
        let events: Vec<Event> = key.queue.drain(..).collect();
        if !key.valid {
            // Invalid and now drained: the entry is garbage.
            state.keys.remove(&self.id);
        }
        events
    }

    /// Return the key to READY state after draining.
    ///
    /// If events arrived since the drain the key is immediately re-signalled
    /// instead. Returns whether the key is still valid.
    pub fn reset(&self) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        let Some(key) = state.keys.get_mut(&self.id) else {
            return false;
        };
        if !key.valid {
            return false;
        }
        if key.signalled {
            if key.queue.is_empty() {
                key.signalled = false;
            } else if !state.ready.contains(&self.id) {
                state.ready.push_back(self.id);
                self.shared.ready_cv.notify_one();
            }
        }
        true
    }
}

impl PartialEq for WatchKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for WatchKey {}

impl fmt::Debug for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchKey")
            .field("id", &self.id)
            .field("dir", &self.dir)
            .finish()
    }
}
