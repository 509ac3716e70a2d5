//! Sealed on-disk blocks.
//!
//! A block is a directory named by a UUID containing `meta.json` (bounds
//! and stats, JSON so the shipper and humans can read it) and `chunks.dat`
//! (length-prefixed label sets and compressed chunks for every series in
//! the block). Blocks are written to a temporary directory and renamed into
//! place so a reader or shipper never observes a half-written block.

use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunk::Chunk;
use crate::error::{Result, TsdbError};
use crate::model::{Label, LabelSet};

pub const BLOCK_META_FILENAME: &str = "meta.json";
pub const BLOCK_CHUNKS_FILENAME: &str = "chunks.dat";

/// Block-level metadata, stored as `meta.json` in the block directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub id: Uuid,
    /// Earliest sample timestamp in the block (inclusive, ms).
    pub min_time: i64,
    /// Latest sample timestamp in the block (inclusive, ms).
    pub max_time: i64,
    pub stats: BlockStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStats {
    pub num_series: u64,
    pub num_samples: u64,
    pub num_chunks: u64,
}

impl BlockMeta {
    pub fn overlaps(&self, from: i64, through: i64) -> bool {
        self.min_time <= through && self.max_time >= from
    }

    pub fn dir(&self, root: &Path) -> PathBuf {
        root.join(self.id.to_string())
    }
}

/// Writes the given per-series chunk sets as a new sealed block under
/// `root`. Series must be non-empty; the caller provides them sorted.
pub(crate) async fn write_block(
    root: &Path,
    series: &[(LabelSet, Vec<Chunk>)],
) -> Result<BlockMeta> {
    let id = Uuid::new_v4();
    let mut stats = BlockStats::default();
    let mut min_time = i64::MAX;
    let mut max_time = i64::MIN;

    for (_, chunks) in series {
        for chunk in chunks {
            min_time = min_time.min(chunk.from);
            max_time = max_time.max(chunk.through);
            stats.num_chunks += 1;
        }
        stats.num_series += 1;
    }
    if stats.num_chunks == 0 {
        return Err(TsdbError::InvalidInput(
            "refusing to write an empty block".to_string(),
        ));
    }

    let meta = BlockMeta {
        id,
        min_time,
        max_time,
        stats: BlockStats {
            num_samples: count_samples(series)?,
            ..stats
        },
    };

    let tmp = root.join(format!("tmp-{}", id));
    tokio::fs::create_dir_all(&tmp).await?;
    tokio::fs::write(
        tmp.join(BLOCK_CHUNKS_FILENAME),
        encode_chunks_file(series),
    )
    .await?;
    tokio::fs::write(
        tmp.join(BLOCK_META_FILENAME),
        serde_json::to_vec_pretty(&meta)?,
    )
    .await?;
    tokio::fs::rename(&tmp, meta.dir(root)).await?;

    Ok(meta)
}

fn count_samples(series: &[(LabelSet, Vec<Chunk>)]) -> Result<u64> {
    let mut n = 0u64;
    for (_, chunks) in series {
        for chunk in chunks {
            n += chunk.samples()?.len() as u64;
        }
    }
    Ok(n)
}

/// Lists the metadata of every sealed block under `root`, sorted by
/// `min_time`. Non-block entries (including in-flight `tmp-` directories)
/// are ignored.
pub async fn list_blocks(root: &Path) -> Result<Vec<BlockMeta>> {
    let mut metas = Vec::new();
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(metas),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if Uuid::parse_str(name).is_err() {
            continue;
        }
        let meta_path = entry.path().join(BLOCK_META_FILENAME);
        let raw = match tokio::fs::read(&meta_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        metas.push(serde_json::from_slice::<BlockMeta>(&raw)?);
    }

    metas.sort_by_key(|m| m.min_time);
    Ok(metas)
}

/// Reads the series of one block, keeping only chunks overlapping
/// `[from, through]`. Series left with no chunks are dropped.
pub(crate) async fn read_block_series(
    root: &Path,
    meta: &BlockMeta,
    from: i64,
    through: i64,
) -> Result<Vec<(LabelSet, Vec<Chunk>)>> {
    let raw = tokio::fs::read(meta.dir(root).join(BLOCK_CHUNKS_FILENAME)).await?;
    let mut series = decode_chunks_file(Bytes::from(raw))?;
    series.retain_mut(|(_, chunks)| {
        chunks.retain(|c| c.overlaps(from, through));
        !chunks.is_empty()
    });
    Ok(series)
}

/// Deletes a block directory.
pub(crate) async fn delete_block(root: &Path, meta: &BlockMeta) -> Result<()> {
    tokio::fs::remove_dir_all(meta.dir(root)).await?;
    Ok(())
}

// chunks.dat layout: u32 series count, then per series a label count with
// length-prefixed name/value pairs, then a chunk count with per-chunk
// (from, through, payload length, payload).

fn encode_chunks_file(series: &[(LabelSet, Vec<Chunk>)]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32(series.len() as u32);
    for (labels, chunks) in series {
        buf.put_u32(labels.len() as u32);
        for label in labels.labels() {
            put_str(&mut buf, &label.name);
            put_str(&mut buf, &label.value);
        }
        buf.put_u32(chunks.len() as u32);
        for chunk in chunks {
            buf.put_i64(chunk.from);
            buf.put_i64(chunk.through);
            let data = chunk.encoded_bytes();
            buf.put_u32(data.len() as u32);
            buf.put_slice(&data);
        }
    }
    buf.freeze()
}

fn decode_chunks_file(mut buf: Bytes) -> Result<Vec<(LabelSet, Vec<Chunk>)>> {
    let series_count = get_u32(&mut buf)? as usize;
    let mut series = Vec::with_capacity(series_count);
    for _ in 0..series_count {
        let label_count = get_u32(&mut buf)? as usize;
        let mut labels = Vec::with_capacity(label_count);
        for _ in 0..label_count {
            let name = get_str(&mut buf)?;
            let value = get_str(&mut buf)?;
            labels.push(Label::new(name, value));
        }

        let chunk_count = get_u32(&mut buf)? as usize;
        let mut chunks = Vec::with_capacity(chunk_count);
        for _ in 0..chunk_count {
            if buf.remaining() < 20 {
                return Err(truncated());
            }
            let from = buf.get_i64();
            let through = buf.get_i64();
            let len = buf.get_u32() as usize;
            if buf.remaining() < len {
                return Err(truncated());
            }
            chunks.push(Chunk::from_encoded(from, through, buf.split_to(len)));
        }
        series.push((LabelSet::from_labels(labels), chunks));
    }
    Ok(series)
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn get_str(buf: &mut Bytes) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(truncated());
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(truncated());
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|e| TsdbError::Encoding(format!("invalid utf-8 in block labels: {}", e)))
}

fn get_u32(buf: &mut Bytes) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(truncated());
    }
    Ok(buf.get_u32())
}

fn truncated() -> TsdbError {
    TsdbError::Encoding("truncated block chunks file".to_string())
}
