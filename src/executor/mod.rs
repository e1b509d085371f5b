// Copyright 2026 Limelight Project Authors. Licensed under Apache-2.0.

//! # Execution Model
//!
//! Operators follow a push-based sink model: the surrounding pipeline calls
//! `sink` with input chunks on any number of worker threads (one local sink
//! state per thread), `combine` once per thread, `finalize` once, and then
//! pulls result chunks through `get_chunk` with per-thread operator states.

use crate::buffer::BufferError;
use crate::types::ConvertError;

pub mod evaluator;
pub mod order;

/// The error type of execution.
#[derive(thiserror::Error, Debug)]
pub enum ExecutorError {
    #[error("buffer error: {0}")]
    Buffer(
        #[from]
        #[source]
        BufferError,
    ),
    #[error("conversion error: {0}")]
    Convert(#[from] ConvertError),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("tuple length mismatch: expected {expected} but got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("internal error: {0}")]
    Internal(String),
}

/// The result type of execution.
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// The maximum chunk length produced by an operator at a time.
pub const VECTOR_SIZE: usize = 1024;
