//! K-way merge over an arbitrary chunk set for one series.
//!
//! The chunk set is first partitioned into the minimum number of
//! pairwise non-overlapping lists, one [`NonOverlappingIterator`] per list.
//! A min-heap over the iterators (keyed by their current batch's first
//! timestamp) then drives the merge: batches are pulled from the heap and
//! folded into the current stream until the stream's head batch is
//! "committed", i.e. no iterator can still contribute a timestamp at or
//! before its last entry.

use crate::batch::non_overlapping::NonOverlappingIterator;
use crate::batch::stream::{merge_streams, Batch, BatchStream};
use crate::chunk::Chunk;
use crate::error::TsdbError;

/// Merging iterator over possibly-overlapping, possibly-unsorted chunks of
/// one series. Emits batches in strictly increasing timestamp order with
/// duplicate timestamps collapsed (left/earlier-partition value wins, per
/// [`merge_streams`]).
pub struct MergeIterator {
    its: Vec<NonOverlappingIterator>,
    /// Min-heap of indices into `its`, keyed by `at_time()`.
    heap: Vec<usize>,

    /// The current sorted stream; `batches.first()` is the next batch to
    /// hand out once built.
    batches: BatchStream,

    // Scratch streams rotated through the merge to keep the hot path free
    // of allocation.
    next_batches: BatchStream,
    merge_buf: BatchStream,

    curr_err: Option<TsdbError>,
}

impl MergeIterator {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        let partitions = partition_chunks(chunks);
        let its: Vec<NonOverlappingIterator> = partitions
            .into_iter()
            .map(NonOverlappingIterator::new)
            .collect();

        let k = its.len();
        let mut c = Self {
            its,
            heap: Vec::with_capacity(k),
            // The build loop keeps at most one live batch per partition plus
            // the in-flight pair, so 2K bounds steady-state usage.
            batches: BatchStream::with_capacity(k * 2),
            next_batches: BatchStream::with_capacity(k * 2),
            merge_buf: BatchStream::with_capacity(k * 2),
            curr_err: None,
        };

        for i in 0..c.its.len() {
            if c.its[i].next(1) {
                c.heap.push(i);
                continue;
            }
            if let Some(err) = c.its[i].err() {
                c.curr_err = Some(err.clone());
            }
        }

        c.heap_init();
        c
    }

    /// Repositions the iterator so the next batch ends at or after `t`.
    pub fn seek(&mut self, t: i64, size: usize) -> bool {
        self.heap.clear();
        self.batches.clear();

        for i in 0..self.its.len() {
            if self.its[i].seek(t, size) {
                self.heap.push(i);
                continue;
            }
            if let Some(err) = self.its[i].err() {
                self.curr_err = Some(err.clone());
                return false;
            }
        }

        self.heap_init();
        self.build_next_batch(size)
    }

    /// Advances to the next batch of up to `size` samples.
    pub fn next(&mut self, size: usize) -> bool {
        self.batches.pop_front();
        self.build_next_batch(size)
    }

    pub fn at_time(&self) -> i64 {
        self.batches.first().first_time()
    }

    pub fn batch(&self) -> Batch {
        *self.batches.first()
    }

    pub fn err(&self) -> Option<&TsdbError> {
        self.curr_err.as_ref()
    }

    fn next_batch_end_time(&self) -> i64 {
        self.batches.first().last_time()
    }

    /// Pulls just enough batches from the heap that the head of `batches`
    /// is committed: no live iterator can contribute a timestamp before its
    /// last entry.
    fn build_next_batch(&mut self, size: usize) -> bool {
        if self.curr_err.is_some() {
            return false;
        }

        while !self.heap.is_empty()
            && (self.batches.is_empty()
                || self.next_batch_end_time() >= self.its[self.heap[0]].at_time())
        {
            let top = self.heap[0];
            let b = self.its[top].batch();

            self.next_batches.clear();
            self.next_batches.push_batch(b);
            merge_streams(
                &mut self.batches,
                &mut self.next_batches,
                &mut self.merge_buf,
                size,
            );
            std::mem::swap(&mut self.batches, &mut self.merge_buf);

            if self.its[top].next(size) {
                self.heap_fix_top();
            } else {
                if let Some(err) = self.its[top].err() {
                    self.curr_err = Some(err.clone());
                    return false;
                }
                self.heap_pop_top();
            }
        }

        !self.batches.is_empty()
    }

    // Indexable array heap over iterator indices, keyed by at_time().

    fn heap_less(&self, a: usize, b: usize) -> bool {
        self.its[self.heap[a]].at_time() < self.its[self.heap[b]].at_time()
    }

    fn heap_init(&mut self) {
        let n = self.heap.len();
        for i in (0..n / 2).rev() {
            self.heap_sift_down(i);
        }
    }

    /// Restores the heap property after the top iterator advanced.
    fn heap_fix_top(&mut self) {
        self.heap_sift_down(0);
    }

    fn heap_pop_top(&mut self) {
        let n = self.heap.len();
        self.heap.swap(0, n - 1);
        self.heap.pop();
        if !self.heap.is_empty() {
            self.heap_sift_down(0);
        }
    }

    fn heap_sift_down(&mut self, mut i: usize) {
        let n = self.heap.len();
        loop {
            let left = 2 * i + 1;
            if left >= n {
                return;
            }
            let mut smallest = left;
            let right = left + 1;
            if right < n && self.heap_less(right, left) {
                smallest = right;
            }
            if !self.heap_less(smallest, i) {
                return;
            }
            self.heap.swap(i, smallest);
            i = smallest;
        }
    }
}

/// Greedily partitions a chunk set into the minimum number of lists of
/// pairwise non-overlapping chunks (first-fit interval coloring; the number
/// of lists equals the maximum overlap depth). Touching bounds count as
/// overlap.
pub fn partition_chunks(mut chunks: Vec<Chunk>) -> Vec<Vec<Chunk>> {
    chunks.sort_by_key(|c| c.from);

    let mut partitions: Vec<Vec<Chunk>> = Vec::new();
    'outer: for chunk in chunks {
        for partition in partitions.iter_mut() {
            if partition.last().expect("partitions are never empty").through < chunk.from {
                partition.push(chunk);
                continue 'outer;
            }
        }
        let prealloc = partitions
            .first()
            .map(|p| p.len() / (partitions.len() + 1))
            .unwrap_or(0);
        let mut partition = Vec::with_capacity(prealloc.max(1));
        partition.push(chunk);
        partitions.push(partition);
    }

    partitions
}
