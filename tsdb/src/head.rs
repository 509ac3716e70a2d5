//! The in-memory head: samples not yet compacted into a sealed block.

use std::collections::HashMap;

use crate::model::{LabelSet, Sample, SeriesFingerprint};

pub(crate) struct MemSeries {
    pub(crate) labels: LabelSet,
    /// Sorted by timestamp; appends are validated against the tail.
    pub(crate) samples: Vec<Sample>,
}

/// All uncompacted series of one tenant, keyed by label fingerprint.
#[derive(Default)]
pub(crate) struct Head {
    series: HashMap<SeriesFingerprint, MemSeries>,
}

impl Head {
    /// Timestamp of the series' last committed sample, if the series exists.
    pub(crate) fn last_timestamp(&self, fp: SeriesFingerprint) -> Option<i64> {
        self.series
            .get(&fp)
            .and_then(|s| s.samples.last())
            .map(|s| s.timestamp_ms)
    }

    pub(crate) fn contains(&self, fp: SeriesFingerprint) -> bool {
        self.series.contains_key(&fp)
    }

    pub(crate) fn num_series(&self) -> usize {
        self.series.len()
    }

    /// Appends a sample. The caller has already validated ordering against
    /// [`Head::last_timestamp`].
    pub(crate) fn append(&mut self, fp: SeriesFingerprint, labels: &LabelSet, sample: Sample) {
        self.series
            .entry(fp)
            .or_insert_with(|| MemSeries {
                labels: labels.clone(),
                samples: Vec::new(),
            })
            .samples
            .push(sample);
    }

    /// Earliest timestamp held by the head, if any.
    pub(crate) fn min_time(&self) -> Option<i64> {
        self.series
            .values()
            .filter_map(|s| s.samples.first())
            .map(|s| s.timestamp_ms)
            .min()
    }

    /// Latest timestamp held by the head, if any.
    pub(crate) fn max_time(&self) -> Option<i64> {
        self.series
            .values()
            .filter_map(|s| s.samples.last())
            .map(|s| s.timestamp_ms)
            .max()
    }

    /// Splits out all samples strictly below `cutoff`, dropping series that
    /// become empty. Returns the removed per-series runs, sorted by label
    /// set for deterministic block layout.
    pub(crate) fn truncate_below(&mut self, cutoff: i64) -> Vec<(LabelSet, Vec<Sample>)> {
        let mut cut = Vec::new();
        self.series.retain(|_, series| {
            let split = series
                .samples
                .partition_point(|s| s.timestamp_ms < cutoff);
            if split > 0 {
                let rest = series.samples.split_off(split);
                let removed = std::mem::replace(&mut series.samples, rest);
                cut.push((series.labels.clone(), removed));
            }
            !series.samples.is_empty()
        });
        cut.sort_by(|a, b| a.0.cmp(&b.0));
        cut
    }

    /// Per-series samples intersecting `[from, through]`, sorted by label
    /// set. Series with no samples in range are omitted.
    pub(crate) fn snapshot_range(&self, from: i64, through: i64) -> Vec<(LabelSet, Vec<Sample>)> {
        let mut out = Vec::new();
        for series in self.series.values() {
            let lo = series.samples.partition_point(|s| s.timestamp_ms < from);
            let hi = series
                .samples
                .partition_point(|s| s.timestamp_ms <= through);
            if lo < hi {
                out.push((series.labels.clone(), series.samples[lo..hi].to_vec()));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(name: &str) -> LabelSet {
        LabelSet::from_pairs([("__name__", name)])
    }

    fn fill(head: &mut Head, name: &str, times: &[i64]) {
        let ls = labels(name);
        let fp = ls.fingerprint();
        for &t in times {
            head.append(fp, &ls, Sample::new(t, t as f64));
        }
    }

    #[test]
    fn should_track_last_timestamp_per_series() {
        // given
        let mut head = Head::default();
        fill(&mut head, "a", &[10, 20]);

        // then
        assert_eq!(head.last_timestamp(labels("a").fingerprint()), Some(20));
        assert_eq!(head.last_timestamp(labels("b").fingerprint()), None);
    }

    #[test]
    fn should_truncate_samples_below_cutoff() {
        // given
        let mut head = Head::default();
        fill(&mut head, "a", &[10, 20, 30]);
        fill(&mut head, "b", &[5, 15]);

        // when
        let cut = head.truncate_below(20);

        // then - a keeps [20, 30], b is emptied and dropped
        assert_eq!(cut.len(), 2);
        assert_eq!(cut[0].1.iter().map(|s| s.timestamp_ms).collect::<Vec<_>>(), vec![10]);
        assert_eq!(cut[1].1.iter().map(|s| s.timestamp_ms).collect::<Vec<_>>(), vec![5, 15]);
        assert_eq!(head.num_series(), 1);
        assert_eq!(head.min_time(), Some(20));
    }

    #[test]
    fn should_snapshot_only_in_range_samples() {
        // given
        let mut head = Head::default();
        fill(&mut head, "a", &[10, 20, 30, 40]);

        // when
        let snap = head.snapshot_range(15, 30);

        // then - inclusive bounds
        assert_eq!(snap.len(), 1);
        let times: Vec<i64> = snap[0].1.iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(times, vec![20, 30]);
    }

    #[test]
    fn should_omit_series_outside_range_from_snapshot() {
        // given
        let mut head = Head::default();
        fill(&mut head, "a", &[10]);
        fill(&mut head, "b", &[100]);

        // when
        let snap = head.snapshot_range(50, 200);

        // then
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].0, labels("b"));
    }
}
