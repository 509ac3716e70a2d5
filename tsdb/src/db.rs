//! The per-tenant database: head, sealed blocks, appender and querier.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tephra_common::{Clock, SystemClock};

use crate::block::{self, BlockMeta};
use crate::chunk::Chunk;
use crate::error::{Result, TsdbError};
use crate::head::Head;
use crate::model::{LabelSet, Sample, SeriesFingerprint};
use crate::querier::{Querier, SeriesEntry};

/// Options for opening a [`Tsdb`].
#[derive(Debug, Clone)]
pub struct TsdbOptions {
    /// Data older than this is deleted, whole blocks at a time.
    pub retention: Duration,
    /// Block range sizes in milliseconds, smallest first. The head is cut
    /// into blocks of the smallest range.
    pub block_ranges_ms: Vec<i64>,
    /// Upper bound on resident series, enforced at append time.
    /// `None` disables the limit.
    pub max_series: Option<usize>,
}

impl Default for TsdbOptions {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
            block_ranges_ms: vec![2 * 60 * 60 * 1000],
            max_series: None,
        }
    }
}

impl TsdbOptions {
    fn smallest_range(&self) -> i64 {
        self.block_ranges_ms
            .iter()
            .copied()
            .filter(|r| *r > 0)
            .min()
            .unwrap_or(2 * 60 * 60 * 1000)
    }
}

/// One tenant's local time-series database.
///
/// The process owns the directory by convention; no lock file is written.
pub struct Tsdb {
    dir: PathBuf,
    opts: TsdbOptions,
    head: RwLock<Head>,
    blocks: RwLock<Vec<BlockMeta>>,
    clock: Arc<dyn Clock>,
    closed: AtomicBool,
}

impl Tsdb {
    /// Opens (or creates) the database at `dir`, loading sealed block
    /// metadata from disk.
    pub async fn open(dir: impl Into<PathBuf>, opts: TsdbOptions) -> Result<Tsdb> {
        Self::open_with_clock(dir, opts, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        dir: impl Into<PathBuf>,
        opts: TsdbOptions,
        clock: Arc<dyn Clock>,
    ) -> Result<Tsdb> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let blocks = block::list_blocks(&dir).await?;

        Ok(Tsdb {
            dir,
            opts,
            head: RwLock::new(Head::default()),
            blocks: RwLock::new(blocks),
            clock,
            closed: AtomicBool::new(false),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of series currently resident in the head.
    pub fn head_series(&self) -> usize {
        self.head.read().expect("head lock poisoned").num_series()
    }

    /// Starts a staged write. Nothing is visible until [`Appender::commit`].
    pub fn appender(&self) -> Appender<'_> {
        Appender {
            db: self,
            staged: Vec::new(),
            staged_last: HashMap::new(),
            staged_new_series: 0,
        }
    }

    /// A point-in-time snapshot over `[from, through]` (inclusive ms),
    /// covering both the head and any overlapping sealed blocks.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn querier(&self, from: i64, through: i64) -> Result<Querier> {
        self.check_open()?;
        if through < from {
            return Err(TsdbError::InvalidInput(format!(
                "through {} precedes from {}",
                through, from
            )));
        }

        let mut by_fp: HashMap<SeriesFingerprint, SeriesEntry> = HashMap::new();

        let overlapping: Vec<BlockMeta> = {
            let blocks = self.blocks.read().expect("blocks lock poisoned");
            blocks
                .iter()
                .filter(|m| m.overlaps(from, through))
                .cloned()
                .collect()
        };
        for meta in &overlapping {
            let series = block::read_block_series(&self.dir, meta, from, through).await?;
            for (labels, chunks) in series {
                by_fp
                    .entry(labels.fingerprint())
                    .or_insert_with(|| SeriesEntry::new(labels))
                    .chunks
                    .extend(chunks);
            }
        }

        let head_series = {
            let head = self.head.read().expect("head lock poisoned");
            head.snapshot_range(from, through)
        };
        for (labels, samples) in head_series {
            let chunks = Chunk::build(&samples)?;
            by_fp
                .entry(labels.fingerprint())
                .or_insert_with(|| SeriesEntry::new(labels))
                .chunks
                .extend(chunks);
        }

        let mut series: Vec<SeriesEntry> = by_fp.into_values().collect();
        series.sort_by(|a, b| a.labels.cmp(&b.labels));

        Ok(Querier::new(from, through, series))
    }

    /// Cuts head samples older than the current block window into sealed
    /// blocks and drops blocks that fell out of retention. Returns the
    /// number of blocks written.
    #[tracing::instrument(level = "debug", skip(self), fields(dir = %self.dir.display()))]
    pub async fn compact(&self) -> Result<usize> {
        self.check_open()?;
        let range = self.opts.smallest_range();

        let cut = {
            let mut head = self.head.write().expect("head lock poisoned");
            match (head.min_time(), head.max_time()) {
                (Some(min), Some(max)) if max - min >= range => {
                    // Everything below the window containing max is sealed.
                    let cutoff = (max / range) * range;
                    if min < cutoff {
                        head.truncate_below(cutoff)
                    } else {
                        Vec::new()
                    }
                }
                _ => Vec::new(),
            }
        };

        let written = self.write_windowed_blocks(cut, range).await?;
        self.enforce_retention().await?;
        Ok(written)
    }

    /// Flushes the remaining head into sealed blocks and marks the database
    /// closed. Further operations fail with [`TsdbError::Closed`].
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let range = self.opts.smallest_range();
        let cut = {
            let mut head = self.head.write().expect("head lock poisoned");
            head.truncate_below(i64::MAX)
        };
        let written = self.write_windowed_blocks(cut, range).await?;
        tracing::debug!(dir = %self.dir.display(), blocks = written, "closed tsdb");
        Ok(())
    }

    /// Sealed block metadata, sorted by minimum time.
    pub fn blocks(&self) -> Vec<BlockMeta> {
        self.blocks.read().expect("blocks lock poisoned").clone()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TsdbError::Closed);
        }
        Ok(())
    }

    /// Groups the cut samples into windows of `range` ms and writes one
    /// block per non-empty window.
    async fn write_windowed_blocks(
        &self,
        cut: Vec<(LabelSet, Vec<Sample>)>,
        range: i64,
    ) -> Result<usize> {
        if cut.is_empty() {
            return Ok(0);
        }

        let mut windows: std::collections::BTreeMap<i64, Vec<(LabelSet, Vec<Chunk>)>> =
            std::collections::BTreeMap::new();
        for (labels, samples) in cut {
            let mut start = 0;
            while start < samples.len() {
                let window = samples[start].timestamp_ms.div_euclid(range);
                let end = samples[start..]
                    .partition_point(|s| s.timestamp_ms.div_euclid(range) == window)
                    + start;
                let chunks = Chunk::build(&samples[start..end])?;
                windows
                    .entry(window)
                    .or_default()
                    .push((labels.clone(), chunks));
                start = end;
            }
        }

        let mut written = 0;
        for (_, series) in windows {
            let meta = block::write_block(&self.dir, &series).await?;
            self.blocks
                .write()
                .expect("blocks lock poisoned")
                .push(meta);
            written += 1;
        }
        self.blocks
            .write()
            .expect("blocks lock poisoned")
            .sort_by_key(|m| m.min_time);
        Ok(written)
    }

    async fn enforce_retention(&self) -> Result<()> {
        let retention_ms = self.opts.retention.as_millis() as i64;
        if retention_ms <= 0 {
            return Ok(());
        }
        let cutoff = self.clock.now_ms() - retention_ms;

        let expired: Vec<BlockMeta> = {
            let blocks = self.blocks.read().expect("blocks lock poisoned");
            blocks
                .iter()
                .filter(|m| m.max_time < cutoff)
                .cloned()
                .collect()
        };

        for meta in expired {
            if let Err(err) = block::delete_block(&self.dir, &meta).await {
                tracing::warn!(block = %meta.id, error = %err, "failed to delete expired block");
                continue;
            }
            tracing::debug!(block = %meta.id, max_time = meta.max_time, "dropped expired block");
            self.blocks
                .write()
                .expect("blocks lock poisoned")
                .retain(|m| m.id != meta.id);
        }
        Ok(())
    }
}

struct StagedSample {
    fp: SeriesFingerprint,
    labels: LabelSet,
    sample: Sample,
}

/// A staged write against one [`Tsdb`].
///
/// Samples accumulate in the appender and become visible atomically on
/// [`commit`]; [`rollback`] (or drop) discards them. An appender is owned
/// by a single request and is not shared.
///
/// [`commit`]: Appender::commit
/// [`rollback`]: Appender::rollback
pub struct Appender<'a> {
    db: &'a Tsdb,
    staged: Vec<StagedSample>,
    /// Last staged timestamp per series, for ordering checks within the
    /// staged batch itself.
    staged_last: HashMap<SeriesFingerprint, i64>,
    staged_new_series: usize,
}

impl<'a> Appender<'a> {
    /// Stages one sample. Rejects negative timestamps, samples at or before
    /// the series' last committed or staged timestamp, and new series that
    /// would exceed the configured series limit.
    pub fn add(&mut self, labels: &LabelSet, timestamp_ms: i64, value: f64) -> Result<()> {
        if labels.is_empty() {
            return Err(TsdbError::InvalidInput(
                "series must have at least one label".to_string(),
            ));
        }
        if timestamp_ms < 0 {
            return Err(TsdbError::InvalidInput(format!(
                "negative timestamp {}",
                timestamp_ms
            )));
        }

        let fp = labels.fingerprint();
        let head = self.db.head.read().expect("head lock poisoned");

        let last = self
            .staged_last
            .get(&fp)
            .copied()
            .or_else(|| head.last_timestamp(fp));
        if let Some(last) = last {
            if timestamp_ms <= last {
                return Err(TsdbError::InvalidInput(format!(
                    "out of order sample for {}: {} is not after {}",
                    labels, timestamp_ms, last
                )));
            }
        }

        let is_new = !head.contains(fp) && !self.staged_last.contains_key(&fp);
        if is_new {
            if let Some(limit) = self.db.opts.max_series {
                if head.num_series() + self.staged_new_series + 1 > limit {
                    return Err(TsdbError::SeriesLimitExceeded { limit });
                }
            }
        }
        drop(head);

        if is_new {
            self.staged_new_series += 1;
        }
        self.staged_last.insert(fp, timestamp_ms);
        self.staged.push(StagedSample {
            fp,
            labels: labels.clone(),
            sample: Sample::new(timestamp_ms, value),
        });
        Ok(())
    }

    /// Applies every staged sample atomically, or none of them.
    ///
    /// Staged samples are revalidated under the head write lock, since
    /// another appender may have committed between [`Appender::add`] and
    /// here; a conflict fails the whole batch.
    pub async fn commit(self) -> Result<()> {
        self.db.check_open()?;
        if self.staged.is_empty() {
            return Ok(());
        }

        {
            let mut head = self.db.head.write().expect("head lock poisoned");

            let mut applying_last: HashMap<SeriesFingerprint, i64> = HashMap::new();
            for staged in &self.staged {
                let last = applying_last
                    .get(&staged.fp)
                    .copied()
                    .or_else(|| head.last_timestamp(staged.fp));
                if let Some(last) = last {
                    if staged.sample.timestamp_ms <= last {
                        return Err(TsdbError::InvalidInput(format!(
                            "out of order sample for {} at commit: {} is not after {}",
                            staged.labels, staged.sample.timestamp_ms, last
                        )));
                    }
                }
                applying_last.insert(staged.fp, staged.sample.timestamp_ms);
            }

            for staged in &self.staged {
                head.append(staged.fp, &staged.labels, staged.sample);
            }
        }

        // Compaction failure is not a commit failure: the samples are in
        // the head and will be retried on the next cut.
        if let Err(err) = self.db.compact().await {
            tracing::warn!(error = %err, "post-commit compaction failed");
        }
        Ok(())
    }

    /// Discards every staged sample.
    pub fn rollback(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};
    use tephra_common::MockClock;

    fn labels(job: &str) -> LabelSet {
        LabelSet::from_pairs([("__name__", "up"), ("job", job)])
    }

    async fn open_tmp(opts: TsdbOptions) -> (tempfile::TempDir, Tsdb) {
        let dir = tempfile::tempdir().unwrap();
        let db = Tsdb::open(dir.path().join("t"), opts).await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn should_commit_and_query_samples() {
        // given
        let (_tmp, db) = open_tmp(TsdbOptions::default()).await;
        let mut app = db.appender();
        app.add(&labels("api"), 1000, 1.0).unwrap();
        app.add(&labels("api"), 2000, 2.0).unwrap();

        // when
        app.commit().await.unwrap();

        // then
        let q = db.querier(0, 10_000).await.unwrap();
        let series = q.select(&[]).unwrap();
        assert_eq!(series.len(), 1);
        let samples = series[0].samples().unwrap();
        assert_eq!(
            samples.iter().map(|s| s.timestamp_ms).collect::<Vec<_>>(),
            vec![1000, 2000]
        );
    }

    #[tokio::test]
    async fn should_not_expose_staged_samples_before_commit() {
        // given
        let (_tmp, db) = open_tmp(TsdbOptions::default()).await;
        let mut app = db.appender();
        app.add(&labels("api"), 1000, 1.0).unwrap();

        // then
        let q = db.querier(0, 10_000).await.unwrap();
        assert!(q.select(&[]).unwrap().is_empty());
        app.rollback();
    }

    #[tokio::test]
    async fn should_discard_everything_on_rollback() {
        // given
        let (_tmp, db) = open_tmp(TsdbOptions::default()).await;
        let mut app = db.appender();
        app.add(&labels("a"), 1000, 1.0).unwrap();
        app.add(&labels("b"), 1000, 2.0).unwrap();

        // when
        app.rollback();

        // then
        let q = db.querier(0, 10_000).await.unwrap();
        assert!(q.select(&[]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_reject_out_of_order_samples() {
        // given
        let (_tmp, db) = open_tmp(TsdbOptions::default()).await;
        let mut app = db.appender();
        app.add(&labels("api"), 2000, 1.0).unwrap();
        app.commit().await.unwrap();

        // when
        let mut app = db.appender();
        let before = app.add(&labels("api"), 1000, 1.0);
        let duplicate = {
            let mut app2 = db.appender();
            app2.add(&labels("api"), 2000, 9.0)
        };

        // then
        assert!(matches!(before, Err(TsdbError::InvalidInput(_))));
        assert!(matches!(duplicate, Err(TsdbError::InvalidInput(_))));
        app.rollback();
    }

    #[tokio::test]
    async fn should_reject_negative_timestamps_and_empty_labels() {
        // given
        let (_tmp, db) = open_tmp(TsdbOptions::default()).await;
        let mut app = db.appender();

        // then
        assert!(app.add(&labels("api"), -1, 1.0).is_err());
        assert!(app.add(&LabelSet::default(), 1, 1.0).is_err());
        app.rollback();
    }

    #[tokio::test]
    async fn should_enforce_series_limit() {
        // given
        let opts = TsdbOptions {
            max_series: Some(2),
            ..Default::default()
        };
        let (_tmp, db) = open_tmp(opts).await;
        let mut app = db.appender();
        app.add(&labels("a"), 1000, 1.0).unwrap();
        app.add(&labels("b"), 1000, 1.0).unwrap();

        // when
        let err = app.add(&labels("c"), 1000, 1.0).unwrap_err();

        // then - existing series still accept samples
        assert!(matches!(err, TsdbError::SeriesLimitExceeded { limit: 2 }));
        app.add(&labels("a"), 2000, 2.0).unwrap();
        app.commit().await.unwrap();
    }

    #[tokio::test]
    async fn should_cut_blocks_once_head_exceeds_range() {
        // given - 1s block range, clock pinned near the sample timestamps
        // so retention leaves the sealed blocks alone
        let opts = TsdbOptions {
            block_ranges_ms: vec![1000],
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(MockClock::with_time(UNIX_EPOCH + Duration::from_secs(60)));
        let db = Tsdb::open_with_clock(dir.path().join("t"), opts, clock)
            .await
            .unwrap();

        // when - samples spanning four windows
        let mut app = db.appender();
        for t in [100, 600, 1100, 2500, 3700] {
            app.add(&labels("api"), t, t as f64).unwrap();
        }
        app.commit().await.unwrap();

        // then - windows 0, 1 and 2 are sealed, window 3 stays in the head
        let block_bounds: Vec<(i64, i64)> = db
            .blocks()
            .iter()
            .map(|m| (m.min_time, m.max_time))
            .collect();
        assert_eq!(block_bounds, vec![(100, 600), (1100, 1100), (2500, 2500)]);
        assert_eq!(db.head_series(), 1);

        // and queries see head and blocks stitched together
        let q = db.querier(0, 10_000).await.unwrap();
        let series = q.select(&[]).unwrap();
        let times: Vec<i64> = series[0]
            .samples()
            .unwrap()
            .iter()
            .map(|s| s.timestamp_ms)
            .collect();
        assert_eq!(times, vec![100, 600, 1100, 2500, 3700]);
    }

    #[tokio::test]
    async fn should_reload_blocks_on_reopen() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(MockClock::with_time(UNIX_EPOCH + Duration::from_secs(60)));
        let opts = TsdbOptions {
            block_ranges_ms: vec![1000],
            ..Default::default()
        };
        {
            let db = Tsdb::open_with_clock(dir.path().join("t"), opts.clone(), clock.clone())
                .await
                .unwrap();
            let mut app = db.appender();
            app.add(&labels("api"), 100, 1.0).unwrap();
            app.add(&labels("api"), 5000, 5.0).unwrap();
            app.commit().await.unwrap();
            db.close().await.unwrap();
        }

        // when
        let db = Tsdb::open_with_clock(dir.path().join("t"), opts, clock)
            .await
            .unwrap();

        // then
        assert!(!db.blocks().is_empty());
        let q = db.querier(0, 10_000).await.unwrap();
        let series = q.select(&[]).unwrap();
        let times: Vec<i64> = series[0]
            .samples()
            .unwrap()
            .iter()
            .map(|s| s.timestamp_ms)
            .collect();
        assert_eq!(times, vec![100, 5000]);
    }

    #[tokio::test]
    async fn should_flush_head_to_block_on_close_and_reject_after() {
        // given
        let (_tmp, db) = open_tmp(TsdbOptions::default()).await;
        let mut app = db.appender();
        app.add(&labels("api"), 1000, 1.0).unwrap();
        app.commit().await.unwrap();

        // when
        db.close().await.unwrap();

        // then
        assert_eq!(db.blocks().len(), 1);
        assert!(matches!(db.querier(0, 10).await, Err(TsdbError::Closed)));
        let mut app = db.appender();
        app.add(&labels("api"), 2000, 1.0).unwrap();
        assert!(matches!(app.commit().await, Err(TsdbError::Closed)));
    }

    #[tokio::test]
    async fn should_drop_blocks_past_retention() {
        // given - a clock we control and 10s retention
        let clock = Arc::new(MockClock::with_time(UNIX_EPOCH + Duration::from_secs(5)));
        let dir = tempfile::tempdir().unwrap();
        let opts = TsdbOptions {
            retention: Duration::from_secs(10),
            block_ranges_ms: vec![1000],
            ..Default::default()
        };
        let db = Tsdb::open_with_clock(dir.path().join("t"), opts, clock.clone())
            .await
            .unwrap();

        let mut app = db.appender();
        app.add(&labels("api"), 1000, 1.0).unwrap();
        app.add(&labels("api"), 5000, 5.0).unwrap();
        app.commit().await.unwrap();
        assert!(!db.blocks().is_empty());

        // when - time moves past retention for the sealed block
        clock.set_time(UNIX_EPOCH + Duration::from_secs(1000));
        db.compact().await.unwrap();

        // then
        assert!(db.blocks().is_empty());
    }
}
