//! The batch merge core.
//!
//! Turns a set of possibly-overlapping compressed chunks covering one
//! series into a single non-overlapping, monotonically ordered stream of
//! fixed-size sample batches, with no allocation in steady state.

mod merge;
mod non_overlapping;
mod stream;

pub use merge::{partition_chunks, MergeIterator};
pub use non_overlapping::NonOverlappingIterator;
pub use stream::{merge_batches, merge_streams, Batch, BatchStream, BATCH_SIZE};
