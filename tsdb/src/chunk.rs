//! Compressed sample chunks.
//!
//! A [`Chunk`] is an opaque Gorilla-compressed container for the samples of
//! one series, carrying its inclusive `[from, through]` time bounds in the
//! clear so the merge machinery can partition and skip chunks without
//! decompressing them. Chunks decode through [`ChunkIter`], which emits
//! fixed-size [`Batch`]es for the merge core.

use bytes::Bytes;
use tsz::stream::{BufferedWriter, Error as TszError, Read as TszRead};
use tsz::{Bit, DataPoint, Decode, Encode, StdDecoder, StdEncoder};

use crate::batch::{Batch, BATCH_SIZE};
use crate::error::{Result, TsdbError};
use crate::model::Sample;

/// Maximum number of samples encoded into a single chunk.
pub const CHUNK_MAX_SAMPLES: usize = 120;

/// A Gorilla-compressed run of samples for one series.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Timestamp of the first sample (inclusive).
    pub from: i64,
    /// Timestamp of the last sample (inclusive).
    pub through: i64,
    data: Bytes,
}

impl Chunk {
    /// Encodes sorted samples into one or more chunks of at most
    /// [`CHUNK_MAX_SAMPLES`] samples each.
    ///
    /// The input must be strictly sorted by timestamp and timestamps must be
    /// non-negative; the compression layer stores them as unsigned deltas.
    pub fn build(samples: &[Sample]) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::with_capacity(samples.len().div_ceil(CHUNK_MAX_SAMPLES));
        for run in samples.chunks(CHUNK_MAX_SAMPLES) {
            chunks.push(Self::encode_run(run)?);
        }
        Ok(chunks)
    }

    fn encode_run(samples: &[Sample]) -> Result<Chunk> {
        let first = samples
            .first()
            .ok_or_else(|| TsdbError::InvalidInput("cannot build an empty chunk".to_string()))?;
        if first.timestamp_ms < 0 {
            return Err(TsdbError::InvalidInput(format!(
                "negative timestamp {} cannot be encoded",
                first.timestamp_ms
            )));
        }

        let writer = BufferedWriter::new();
        let mut encoder = StdEncoder::new(first.timestamp_ms as u64, writer);

        let mut prev = i64::MIN;
        for sample in samples {
            if sample.timestamp_ms <= prev {
                return Err(TsdbError::InvalidInput(format!(
                    "chunk samples out of order: {} after {}",
                    sample.timestamp_ms, prev
                )));
            }
            prev = sample.timestamp_ms;
            encoder.encode(DataPoint::new(sample.timestamp_ms as u64, sample.value));
        }

        let compressed = encoder.close();
        Ok(Chunk {
            from: first.timestamp_ms,
            through: prev,
            data: Bytes::from(compressed.to_vec()),
        })
    }

    /// Number of bytes in the compressed payload.
    pub fn encoded_len(&self) -> usize {
        self.data.len()
    }

    pub fn encoded_bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// Rebuilds a chunk from its stored representation.
    pub fn from_encoded(from: i64, through: i64, data: Bytes) -> Chunk {
        Chunk {
            from,
            through,
            data,
        }
    }

    /// Whether this chunk's bounds intersect `[from, through]` (inclusive).
    pub fn overlaps(&self, from: i64, through: i64) -> bool {
        self.from <= through && self.through >= from
    }

    /// Decodes the full chunk. Mostly useful in tests; the query path goes
    /// through [`Chunk::iter`] instead.
    pub fn samples(&self) -> Result<Vec<Sample>> {
        let mut out = Vec::new();
        let mut iter = self.iter();
        while iter.next(BATCH_SIZE) {
            let batch = iter.batch();
            for i in 0..batch.length {
                out.push(Sample::new(batch.timestamps[i], batch.values[i]));
            }
        }
        if let Some(err) = iter.err() {
            return Err(err.clone());
        }
        Ok(out)
    }

    /// A batch-producing iterator over this chunk.
    pub fn iter(&self) -> ChunkIter {
        ChunkIter::new(self.data.clone())
    }
}

/// Batch-level iterator over one chunk's decompressed samples.
pub struct ChunkIter {
    decoder: StdDecoder<BitReader>,
    batch: Batch,
    filled: bool,
    exhausted: bool,
    err: Option<TsdbError>,
}

impl ChunkIter {
    fn new(data: Bytes) -> Self {
        Self {
            decoder: StdDecoder::new(BitReader::new(data)),
            batch: Batch::default(),
            filled: false,
            exhausted: false,
            err: None,
        }
    }

    /// Advances to the next batch of up to `size` samples (capped at
    /// [`BATCH_SIZE`]). Returns false when the chunk is exhausted or a
    /// decode error occurred.
    pub fn next(&mut self, size: usize) -> bool {
        let size = size.clamp(1, BATCH_SIZE);
        self.batch = Batch::default();
        self.filled = false;

        while self.batch.length < size && !self.exhausted {
            match self.decoder.next() {
                Ok(dp) => {
                    let i = self.batch.length;
                    self.batch.timestamps[i] = dp.get_time() as i64;
                    self.batch.values[i] = dp.get_value();
                    self.batch.length += 1;
                }
                Err(tsz::decode::Error::EndOfStream) => {
                    self.exhausted = true;
                }
                Err(e) => {
                    self.exhausted = true;
                    self.err = Some(TsdbError::Encoding(format!(
                        "gorilla decoding failed: {}",
                        e
                    )));
                    return false;
                }
            }
        }

        self.filled = self.batch.length > 0;
        self.filled
    }

    /// Skips forward until a batch ending at or after `t` is available.
    pub fn seek(&mut self, t: i64, size: usize) -> bool {
        if self.filled && self.batch.last_time() >= t {
            return true;
        }
        while self.next(size) {
            if self.batch.last_time() >= t {
                return true;
            }
        }
        false
    }

    pub fn at_time(&self) -> i64 {
        self.batch.timestamps[0]
    }

    pub fn batch(&self) -> Batch {
        self.batch
    }

    pub fn err(&self) -> Option<&TsdbError> {
        self.err.as_ref()
    }
}

/// A `tsz::stream::Read` over an owned byte buffer.
///
/// Tracks a single bit-level cursor into the buffer; every trait method is
/// a thin wrapper around [`BitReader::take`]. Owning the buffer (a
/// refcounted `Bytes`) keeps the iterator free of lifetimes, which the
/// merge machinery relies on.
struct BitReader {
    bytes: Bytes,
    /// Read position in bits from the start of the buffer.
    pos: usize,
}

impl BitReader {
    fn new(bytes: Bytes) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining_bits(&self) -> usize {
        self.bytes.len() * 8 - self.pos
    }

    /// Consumes `count` bits (at most 64), MSB-first, into the low end of
    /// a u64. Fails without consuming anything if the buffer runs short.
    fn take(&mut self, count: usize) -> std::result::Result<u64, TszError> {
        if count > self.remaining_bits() {
            return Err(TszError::EOF);
        }

        let mut out = 0u64;
        let mut left = count;
        while left > 0 {
            let byte = self.bytes[self.pos / 8];
            let offset = self.pos % 8;
            let width = left.min(8 - offset);

            // Slice `width` bits starting `offset` bits into this byte.
            let slice = (byte as u64 >> (8 - offset - width)) & ((1 << width) - 1);
            out = (out << width) | slice;

            self.pos += width;
            left -= width;
        }
        Ok(out)
    }
}

impl TszRead for BitReader {
    fn read_bit(&mut self) -> std::result::Result<Bit, TszError> {
        match self.take(1)? {
            0 => Ok(Bit::Zero),
            _ => Ok(Bit::One),
        }
    }

    fn read_byte(&mut self) -> std::result::Result<u8, TszError> {
        self.take(8).map(|byte| byte as u8)
    }

    fn read_bits(&mut self, num: u32) -> std::result::Result<u64, TszError> {
        self.take(num.min(64) as usize)
    }

    fn peak_bits(&mut self, num: u32) -> std::result::Result<u64, TszError> {
        let saved = self.pos;
        let bits = self.read_bits(num);
        self.pos = saved;
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(points: &[(i64, f64)]) -> Vec<Sample> {
        points.iter().map(|&(t, v)| Sample::new(t, v)).collect()
    }

    #[test]
    fn should_round_trip_samples_through_a_chunk() {
        // given
        let input = samples(&[(1000, 10.0), (2000, 20.5), (3500, -3.25)]);

        // when
        let chunks = Chunk::build(&input).unwrap();

        // then
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].from, 1000);
        assert_eq!(chunks[0].through, 3500);
        assert_eq!(chunks[0].samples().unwrap(), input);
    }

    #[test]
    fn should_split_long_runs_into_multiple_chunks() {
        // given
        let input: Vec<Sample> = (0..250).map(|i| Sample::new(i * 1000, i as f64)).collect();

        // when
        let chunks = Chunk::build(&input).unwrap();

        // then - 120 + 120 + 10 samples
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].from, 0);
        assert_eq!(chunks[0].through, 119_000);
        assert_eq!(chunks[1].from, 120_000);
        assert_eq!(chunks[2].through, 249_000);

        let decoded: Vec<Sample> = chunks
            .iter()
            .flat_map(|c| c.samples().unwrap())
            .collect();
        assert_eq!(decoded, input);
    }

    #[test]
    fn should_reject_unsorted_samples() {
        // given
        let input = samples(&[(2000, 1.0), (1000, 2.0)]);

        // when
        let err = Chunk::build(&input).unwrap_err();

        // then
        assert!(matches!(err, TsdbError::InvalidInput(_)));
    }

    #[test]
    fn should_reject_negative_timestamps() {
        // given
        let input = samples(&[(-5, 1.0)]);

        // then
        assert!(Chunk::build(&input).is_err());
    }

    #[test]
    fn should_iterate_in_fixed_size_batches() {
        // given
        let input: Vec<Sample> = (0..30).map(|i| Sample::new(i, i as f64)).collect();
        let chunk = Chunk::build(&input).unwrap().remove(0);

        // when
        let mut iter = chunk.iter();
        let mut lengths = Vec::new();
        while iter.next(BATCH_SIZE) {
            lengths.push(iter.batch().length);
        }

        // then - 12 + 12 + 6, no empty batches
        assert_eq!(lengths, vec![12, 12, 6]);
        assert!(iter.err().is_none());
    }

    #[test]
    fn should_respect_requested_batch_size() {
        // given
        let input: Vec<Sample> = (0..10).map(|i| Sample::new(i, 0.0)).collect();
        let chunk = Chunk::build(&input).unwrap().remove(0);

        // when
        let mut iter = chunk.iter();
        assert!(iter.next(4));

        // then
        assert_eq!(iter.batch().length, 4);
        assert_eq!(iter.at_time(), 0);
    }

    #[test]
    fn should_seek_to_batch_ending_at_or_after_target() {
        // given
        let input: Vec<Sample> = (0..48).map(|i| Sample::new(i * 10, i as f64)).collect();
        let chunk = Chunk::build(&input).unwrap().remove(0);

        // when - batches span 0..110, 120..230, 240..350, 360..470
        let mut iter = chunk.iter();
        let found = iter.seek(250, BATCH_SIZE);

        // then
        assert!(found);
        assert_eq!(iter.batch().last_time(), 350);
        assert!(iter.batch().last_time() >= 250);
    }

    #[test]
    fn should_fail_seek_past_end() {
        // given
        let input = samples(&[(10, 1.0), (20, 2.0)]);
        let chunk = Chunk::build(&input).unwrap().remove(0);

        // when
        let mut iter = chunk.iter();

        // then
        assert!(!iter.seek(1000, BATCH_SIZE));
    }

    #[test]
    fn should_check_overlap_inclusively() {
        // given
        let chunk = Chunk::build(&samples(&[(100, 1.0), (200, 2.0)]))
            .unwrap()
            .remove(0);

        // then
        assert!(chunk.overlaps(200, 300));
        assert!(chunk.overlaps(0, 100));
        assert!(!chunk.overlaps(201, 300));
        assert!(!chunk.overlaps(0, 99));
    }
}
