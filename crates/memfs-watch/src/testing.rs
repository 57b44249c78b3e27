// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Test-only utilities and mock implementations for the watch service
//!
//! This module provides an in-memory [`crate::FsView`] implementation so
//! tests can drive the poller without the production storage layer.
