// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the watch service

use std::io;

/// Watch service error type
#[derive(thiserror::Error, Debug)]
pub enum WatchError {
    #[error("not found")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("watch service closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type WatchResult<T> = Result<T, WatchError>;
