//! Fixed-size sample batches and sorted batch streams.
//!
//! The merge machinery moves samples around in [`Batch`]es of
//! [`BATCH_SIZE`] entries rather than one at a time. A [`BatchStream`] is a
//! sequence of batches whose timestamps increase strictly across and within
//! batches; the stream owns its buffer, and the merge routines consume
//! their inputs through read cursors and rebuild into caller-provided
//! streams so the hot path never allocates once the buffers are warm.

/// Number of samples per batch. The same constant is used by every layer
/// that touches batches.
pub const BATCH_SIZE: usize = 12;

/// A fixed-capacity record of samples.
///
/// `length` is the number of populated entries; `index` is the read cursor
/// used while a stream is being consumed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Batch {
    pub timestamps: [i64; BATCH_SIZE],
    pub values: [f64; BATCH_SIZE],
    pub index: usize,
    pub length: usize,
}

impl Default for Batch {
    fn default() -> Self {
        Self {
            timestamps: [0; BATCH_SIZE],
            values: [0.0; BATCH_SIZE],
            index: 0,
            length: 0,
        }
    }
}

impl Batch {
    /// Timestamp of the first populated entry.
    pub fn first_time(&self) -> i64 {
        self.timestamps[0]
    }

    /// Timestamp of the last populated entry.
    pub fn last_time(&self) -> i64 {
        self.timestamps[self.length - 1]
    }
}

/// An ordered sequence of batches with strictly increasing timestamps.
///
/// Monotonicity is an invariant the caller upholds through [`append`]; it
/// is not enforced here.
///
/// [`append`]: BatchStream::append
#[derive(Debug, Clone, Default)]
pub struct BatchStream {
    batches: Vec<Batch>,
    /// Index of the first unconsumed batch while the stream is being read.
    head: usize,
}

impl BatchStream {
    pub fn with_capacity(batches: usize) -> Self {
        Self {
            batches: Vec::with_capacity(batches),
            head: 0,
        }
    }

    /// Appends a sample, starting a new batch when the current one is full.
    pub fn append(&mut self, t: i64, v: f64) {
        self.append_limited(t, v, BATCH_SIZE);
    }

    /// Appends with a per-batch fill limit, used when the consumer asked
    /// for smaller batches.
    fn append_limited(&mut self, t: i64, v: f64, fill: usize) {
        match self.batches.last_mut() {
            Some(b) if b.length < fill => {
                b.timestamps[b.length] = t;
                b.values[b.length] = v;
                b.length += 1;
            }
            _ => {
                let mut b = Batch::default();
                b.timestamps[0] = t;
                b.values[0] = v;
                b.length = 1;
                self.batches.push(b);
            }
        }
    }

    /// Rewinds all read cursors without dropping data.
    pub fn reset(&mut self) {
        for b in &mut self.batches {
            b.index = 0;
        }
        self.head = 0;
    }

    /// Drops all batches, keeping the allocation.
    pub fn clear(&mut self) {
        self.batches.clear();
        self.head = 0;
    }

    pub fn has_next(&self) -> bool {
        self.head < self.batches.len()
    }

    /// Advances the read cursor by one sample; a fully consumed batch is
    /// popped from the front of the view.
    pub fn next(&mut self) {
        let b = &mut self.batches[self.head];
        b.index += 1;
        if b.index >= b.length {
            self.head += 1;
        }
    }

    pub fn at_time(&self) -> i64 {
        let b = &self.batches[self.head];
        b.timestamps[b.index]
    }

    pub fn at(&self) -> (i64, f64) {
        let b = &self.batches[self.head];
        (b.timestamps[b.index], b.values[b.index])
    }

    /// Number of built batches.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// The batch at the front of the stream.
    pub fn first(&self) -> &Batch {
        &self.batches[0]
    }

    /// Removes the front batch by shifting the rest down, keeping capacity.
    pub fn pop_front(&mut self) {
        if !self.batches.is_empty() {
            self.batches.remove(0);
        }
    }

    /// Pushes an already-built batch onto the back of the stream.
    pub fn push_batch(&mut self, batch: Batch) {
        self.batches.push(batch);
    }
}

/// Merges two sorted streams into `result`, consuming both inputs.
///
/// Duplicate timestamps are collapsed to a single entry carrying the left
/// stream's value; both sides advance past the duplicate. `size` bounds the
/// fill of each produced batch (capped at [`BATCH_SIZE`]). On return the
/// inputs are exhausted and `result` holds the merged stream with its
/// cursors rewound.
pub fn merge_streams(
    left: &mut BatchStream,
    right: &mut BatchStream,
    result: &mut BatchStream,
    size: usize,
) {
    let fill = size.clamp(1, BATCH_SIZE);
    result.clear();

    while left.has_next() && right.has_next() {
        let (t1, t2) = (left.at_time(), right.at_time());
        if t1 < t2 {
            let (t, v) = left.at();
            result.append_limited(t, v, fill);
            left.next();
        } else if t1 > t2 {
            let (t, v) = right.at();
            result.append_limited(t, v, fill);
            right.next();
        } else {
            // Equal timestamps collapse; the left stream's value wins.
            let (t, v) = left.at();
            result.append_limited(t, v, fill);
            left.next();
            right.next();
        }
    }
    while left.has_next() {
        let (t, v) = left.at();
        result.append_limited(t, v, fill);
        left.next();
    }
    while right.has_next() {
        let (t, v) = right.at();
        result.append_limited(t, v, fill);
        right.next();
    }

    result.reset();
}

/// Merges `batches`, where every batch is its own sorted run, into a single
/// sorted non-overlapping run in `result`.
///
/// Divide-and-conquer: each half is merged into the matching half of
/// `result`, then the two halves are merged back through `batches` as
/// scratch, so the recursion reuses the two buffers without allocating.
/// The caller must provide `result` at least as long as `batches`. Returns
/// the number of batches written to the front of `result`.
pub fn merge_batches(batches: &mut [Batch], result: &mut [Batch]) -> usize {
    match batches.len() {
        0 => 0,
        1 => {
            result[0] = batches[0];
            1
        }
        2 => merge_batch_runs(&batches[..1], &batches[1..2], result),
        n => {
            let mid = n / 2;
            let hi_len = merge_batches(&mut batches[mid..], &mut result[mid..]);
            let lo_len = merge_batches(&mut batches[..mid], &mut result[..mid]);

            let total = {
                let (lo, hi) = result.split_at(mid);
                merge_batch_runs(&hi[..hi_len], &lo[..lo_len], batches)
            };
            result[..total].copy_from_slice(&batches[..total]);
            total
        }
    }
}

/// Merges two sorted batch runs into `out` with full repacking, using local
/// cursors so the inputs stay untouched. Ties collapse to `left`'s value.
fn merge_batch_runs(left: &[Batch], right: &[Batch], out: &mut [Batch]) -> usize {
    let mut lc = RunCursor::new(left);
    let mut rc = RunCursor::new(right);
    let mut w = RunWriter::new(out);

    while let (Some((lt, lv)), Some((rt, rv))) = (lc.peek(), rc.peek()) {
        if lt < rt {
            w.push(lt, lv);
            lc.advance();
        } else if lt > rt {
            w.push(rt, rv);
            rc.advance();
        } else {
            w.push(lt, lv);
            lc.advance();
            rc.advance();
        }
    }
    while let Some((t, v)) = lc.peek() {
        w.push(t, v);
        lc.advance();
    }
    while let Some((t, v)) = rc.peek() {
        w.push(t, v);
        rc.advance();
    }

    w.finish()
}

struct RunCursor<'a> {
    run: &'a [Batch],
    batch: usize,
    sample: usize,
}

impl<'a> RunCursor<'a> {
    fn new(run: &'a [Batch]) -> Self {
        let mut cursor = Self {
            run,
            batch: 0,
            sample: 0,
        };
        cursor.skip_empty();
        cursor
    }

    fn peek(&self) -> Option<(i64, f64)> {
        let b = self.run.get(self.batch)?;
        Some((b.timestamps[self.sample], b.values[self.sample]))
    }

    fn advance(&mut self) {
        self.sample += 1;
        if self.sample >= self.run[self.batch].length {
            self.sample = 0;
            self.batch += 1;
            self.skip_empty();
        }
    }

    fn skip_empty(&mut self) {
        while self.batch < self.run.len() && self.run[self.batch].length == 0 {
            self.batch += 1;
        }
    }
}

struct RunWriter<'a> {
    out: &'a mut [Batch],
    written: usize,
    cur: Batch,
}

impl<'a> RunWriter<'a> {
    fn new(out: &'a mut [Batch]) -> Self {
        Self {
            out,
            written: 0,
            cur: Batch::default(),
        }
    }

    fn push(&mut self, t: i64, v: f64) {
        self.cur.timestamps[self.cur.length] = t;
        self.cur.values[self.cur.length] = v;
        self.cur.length += 1;
        if self.cur.length == BATCH_SIZE {
            self.out[self.written] = self.cur;
            self.written += 1;
            self.cur = Batch::default();
        }
    }

    fn finish(mut self) -> usize {
        if self.cur.length > 0 {
            self.out[self.written] = self.cur;
            self.written += 1;
        }
        self.written
    }
}
