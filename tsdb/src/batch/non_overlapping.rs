//! Iterator over a sorted list of non-overlapping chunks.

use crate::batch::Batch;
use crate::chunk::{Chunk, ChunkIter};
use crate::error::TsdbError;

/// Emits batches across a list of chunks known to be sorted by `from` and
/// pairwise non-overlapping, advancing to the next chunk as each one is
/// exhausted.
///
/// Handing it an unsorted or overlapping list is a programmer error and
/// panics at construction.
pub struct NonOverlappingIterator {
    chunks: Vec<Chunk>,
    curr: usize,
    iter: Option<ChunkIter>,
    err: Option<TsdbError>,
}

impl NonOverlappingIterator {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        for pair in chunks.windows(2) {
            assert!(
                pair[0].through < pair[1].from,
                "non-overlapping iterator given overlapping or unsorted chunks: \
                 [{}, {}] then [{}, {}]",
                pair[0].from,
                pair[0].through,
                pair[1].from,
                pair[1].through,
            );
        }
        Self {
            chunks,
            curr: 0,
            iter: None,
            err: None,
        }
    }

    /// Advances one batch of up to `size` samples. Returns false on
    /// exhaustion or error.
    pub fn next(&mut self, size: usize) -> bool {
        loop {
            let Some(iter) = self.current_iter() else {
                return false;
            };
            if iter.next(size) {
                return true;
            }
            if let Some(err) = iter.err().cloned() {
                self.err = Some(err);
                return false;
            }
            if !self.advance_chunk() {
                return false;
            }
        }
    }

    /// Skips forward until a batch ending at or after `t` is available.
    /// Chunks wholly before `t` are skipped without decompression.
    pub fn seek(&mut self, t: i64, size: usize) -> bool {
        loop {
            while self.iter.is_none()
                && self.curr < self.chunks.len()
                && self.chunks[self.curr].through < t
            {
                self.curr += 1;
            }
            let Some(iter) = self.current_iter() else {
                return false;
            };
            if iter.seek(t, size) {
                return true;
            }
            if let Some(err) = iter.err().cloned() {
                self.err = Some(err);
                return false;
            }
            if !self.advance_chunk() {
                return false;
            }
        }
    }

    /// Timestamp of the first entry of the current batch.
    pub fn at_time(&self) -> i64 {
        self.iter
            .as_ref()
            .expect("at_time called before a successful next")
            .at_time()
    }

    pub fn batch(&self) -> Batch {
        self.iter
            .as_ref()
            .expect("batch called before a successful next")
            .batch()
    }

    pub fn err(&self) -> Option<&TsdbError> {
        self.err.as_ref()
    }

    fn current_iter(&mut self) -> Option<&mut ChunkIter> {
        if self.iter.is_none() {
            let chunk = self.chunks.get(self.curr)?;
            self.iter = Some(chunk.iter());
        }
        self.iter.as_mut()
    }

    fn advance_chunk(&mut self) -> bool {
        self.iter = None;
        if self.curr + 1 >= self.chunks.len() {
            self.curr = self.chunks.len();
            return false;
        }
        self.curr += 1;
        true
    }
}
