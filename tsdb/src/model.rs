//! Core data types: samples, labels and label sets.

use blake3::Hasher;
use serde::{Deserialize, Serialize};

/// A single data point: millisecond timestamp plus value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp_ms: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp_ms: i64, value: f64) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }
}

/// A name/value pair identifying one dimension of a series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Identity of a series, derived from its label set.
pub type SeriesFingerprint = u128;

/// A lexicographically sorted, deduplicated sequence of labels uniquely
/// identifying a series.
///
/// Construction sorts by name and drops later duplicates of the same name,
/// so two label sets describing the same series always compare (and
/// fingerprint) equal regardless of input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelSet(Vec<Label>);

impl LabelSet {
    /// Builds a label set from arbitrary pairs, sorting and deduplicating.
    pub fn from_pairs<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        let mut labels: Vec<Label> = pairs
            .into_iter()
            .map(|(n, v)| Label::new(n, v))
            .collect();
        labels.sort();
        labels.dedup_by(|a, b| a.name == b.name);
        LabelSet(labels)
    }

    pub fn from_labels(labels: Vec<Label>) -> Self {
        Self::from_pairs(labels.into_iter().map(|l| (l.name, l.value)))
    }

    /// Value of the named label, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    pub fn labels(&self) -> &[Label] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A copy of this label set without the named label. Used to strip
    /// internal labels before series go back out over the wire.
    pub fn without(&self, name: &str) -> LabelSet {
        LabelSet(self.0.iter().filter(|l| l.name != name).cloned().collect())
    }

    /// Computes a truncated Blake3 digest of the sorted labels, used as the
    /// series identity everywhere in the engine.
    pub fn fingerprint(&self) -> SeriesFingerprint {
        let mut hasher = Hasher::new();
        for label in &self.0 {
            hasher.update(label.name.as_bytes());
            hasher.update(&[0xff]);
            hasher.update(label.value.as_bytes());
            hasher.update(&[0xff]);
        }

        let digest = hasher.finalize();
        let mut first16 = [0u8; 16];
        first16.copy_from_slice(&digest.as_bytes()[..16]);

        u128::from_le_bytes(first16)
    }
}

impl std::fmt::Display for LabelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}=\"{}\"", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}
