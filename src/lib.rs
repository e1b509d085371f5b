// Copyright 2026 Limelight Project Authors. Licensed under Apache-2.0.

//! Limelight is the external sort core of a vectorized analytical query
//! engine: a push-based `ORDER BY` operator over a memcmp-comparable row
//! encoding, backed by a spillable buffer manager.
//!
//! The crate is organized bottom-up:
//!
//! - [`types`] and [`array`] provide the vectorized type system:
//!   [`DataChunk`](array::DataChunk) batches of typed, nullable arrays.
//! - [`buffer`] provides fixed-capacity, pinnable blocks that spill to
//!   disk when unpinned and memory runs short.
//! - [`executor::order`] implements the operator itself: ingestion
//!   serializes key columns into a sortable row format, sorts runs with
//!   an in-memory radix sort, merges runs at finalize, and scans the
//!   result back out as data chunks, optionally in parallel.

#![deny(unused_must_use)]

pub mod array;
pub mod buffer;
pub mod executor;
pub mod types;
