//! Range queries over a point-in-time snapshot.

use crate::batch::{MergeIterator, BATCH_SIZE};
use crate::chunk::Chunk;
use crate::error::Result;
use crate::matcher::Matcher;
use crate::model::{LabelSet, Sample};

pub(crate) struct SeriesEntry {
    pub(crate) labels: LabelSet,
    pub(crate) chunks: Vec<Chunk>,
}

impl SeriesEntry {
    pub(crate) fn new(labels: LabelSet) -> Self {
        Self {
            labels,
            chunks: Vec::new(),
        }
    }
}

/// A consistent read-only view of one tenant's data over `[from, through]`.
///
/// The snapshot is taken when the querier is created; later commits are
/// not visible through it. Dropping the querier releases the snapshot.
pub struct Querier {
    from: i64,
    through: i64,
    series: Vec<SeriesEntry>,
}

impl Querier {
    pub(crate) fn new(from: i64, through: i64, series: Vec<SeriesEntry>) -> Self {
        Self {
            from,
            through,
            series,
        }
    }

    pub fn from(&self) -> i64 {
        self.from
    }

    pub fn through(&self) -> i64 {
        self.through
    }

    /// Series whose labels satisfy every matcher, in label order. An empty
    /// matcher list selects everything in range.
    pub fn select(&self, matchers: &[Matcher]) -> Result<Vec<Series<'_>>> {
        Ok(self
            .series
            .iter()
            .filter(|entry| matchers.iter().all(|m| m.matches(&entry.labels)))
            .map(|entry| Series {
                entry,
                from: self.from,
                through: self.through,
            })
            .collect())
    }

    /// Sorted unique values of the named label across the snapshot.
    pub fn label_values(&self, name: &str) -> Vec<String> {
        let mut values: Vec<String> = self
            .series
            .iter()
            .filter_map(|entry| entry.labels.get(name))
            .map(|v| v.to_string())
            .collect();
        values.sort();
        values.dedup();
        values
    }

    /// Sorted unique label names across the snapshot.
    pub fn label_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .series
            .iter()
            .flat_map(|entry| entry.labels.labels().iter().map(|l| l.name.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// One selected series: its labels plus a merged view over its chunks.
pub struct Series<'a> {
    entry: &'a SeriesEntry,
    from: i64,
    through: i64,
}

impl<'a> Series<'a> {
    pub fn labels(&self) -> &LabelSet {
        &self.entry.labels
    }

    /// A merging batch iterator over the series' chunks. Chunks may overlap
    /// (head vs block boundaries); the merge collapses them into one
    /// ordered stream.
    pub fn iterator(&self) -> MergeIterator {
        MergeIterator::new(self.entry.chunks.clone())
    }

    /// All samples of the series within the query range, in order.
    pub fn samples(&self) -> Result<Vec<Sample>> {
        let mut out = Vec::new();
        let mut iter = self.iterator();
        while iter.next(BATCH_SIZE) {
            let batch = iter.batch();
            for i in 0..batch.length {
                let t = batch.timestamps[i];
                if t < self.from {
                    continue;
                }
                if t > self.through {
                    return Ok(out);
                }
                out.push(Sample::new(t, batch.values[i]));
            }
        }
        if let Some(err) = iter.err() {
            return Err(err.clone());
        }
        Ok(out)
    }
}
