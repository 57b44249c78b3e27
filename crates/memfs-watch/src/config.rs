// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Watch service configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Construction-time configuration for a [`crate::WatchService`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Cadence between directory scans. Smaller intervals reduce event
    /// latency at proportional CPU cost.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// Maximum number of pending events per key before overflow coalescing
    /// kicks in.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            queue_capacity: default_queue_capacity(),
        }
    }
}
