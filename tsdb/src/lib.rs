//! Tephra TSDB - the per-tenant local time-series database engine.
//!
//! Each tenant of the ingester owns one [`Tsdb`] opened against its own
//! directory. Writes go through an [`Appender`] with atomic commit or
//! rollback; reads go through a point-in-time [`Querier`] over a
//! `[from, through]` range. The head is periodically compacted into sealed
//! on-disk blocks which a shipper can upload to object storage.
//!
//! The [`batch`] module holds the merge core: given any set of
//! possibly-overlapping compressed chunks for one series, it produces a
//! single strictly ordered stream of fixed-size sample batches.

pub mod batch;
mod block;
mod chunk;
mod db;
mod error;
mod head;
mod matcher;
mod model;
mod querier;

pub use block::{BlockMeta, BlockStats, list_blocks, BLOCK_CHUNKS_FILENAME, BLOCK_META_FILENAME};
pub use chunk::{Chunk, ChunkIter, CHUNK_MAX_SAMPLES};
pub use db::{Appender, Tsdb, TsdbOptions};
pub use error::{Result, TsdbError};
pub use matcher::Matcher;
pub use model::{Label, LabelSet, Sample, SeriesFingerprint};
pub use querier::{Querier, Series};
