// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Polling-based directory watch service for in-memory filesystems
//!
//! Storage backends without a native change-notification mechanism still
//! need to offer directory-watch semantics: blocking retrieval of change
//! events, per-registration event queues, overflow handling and key
//! lifecycle. This crate provides that contract by polling. A background
//! thread snapshots every watched directory on a fixed cadence through the
//! [`FsView`] seam and diffs each listing against the previous one to
//! synthesize create/delete/modify events.
//!
//! The trade-off is inherent to polling: events arrive with up to one poll
//! interval of latency, and a change reverted within a single interval is
//! never observed.

pub mod config;
pub mod error;
mod poller;
pub mod registry;
pub mod testing;
pub mod types;

pub use config::WatchConfig;
pub use error::{WatchError, WatchResult};
pub use registry::{WatchKey, WatchService};
pub use types::{ChildEntry, Event, EventKind, FsView};
