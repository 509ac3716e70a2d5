//! JSON wire types for the ingester API.
//!
//! These mirror what producers and queriers exchange with the service and
//! convert into the engine's own types at this boundary only; nothing below
//! the transport sees a wire struct.

use serde::{Deserialize, Serialize};

use tephra_tsdb::{Label, LabelSet, Matcher, Sample};

use crate::error::{IngestError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteRequest {
    pub series: Vec<WireSeries>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSeries {
    pub labels: Vec<WireLabel>,
    pub samples: Vec<WireSample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireLabel {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WireSample {
    pub ts_ms: i64,
    pub value: f64,
}

/// Acknowledgement of an accepted write. Carries no fields today.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub start_ms: i64,
    pub end_ms: i64,
    #[serde(default)]
    pub matchers: Vec<WireMatcher>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMatcher {
    #[serde(rename = "type")]
    pub matcher_type: MatcherType,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherType {
    Eq,
    Neq,
    Re,
    Nre,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    pub series: Vec<WireSeries>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelValuesResponse {
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelNamesResponse {
    pub names: Vec<String>,
}

impl WireSeries {
    pub fn label_set(&self) -> LabelSet {
        LabelSet::from_pairs(
            self.labels
                .iter()
                .map(|l| (l.name.clone(), l.value.clone())),
        )
    }

    /// Builds a wire series from engine types.
    pub fn from_series(labels: &LabelSet, samples: &[Sample]) -> WireSeries {
        WireSeries {
            labels: labels
                .labels()
                .iter()
                .map(|l: &Label| WireLabel {
                    name: l.name.clone(),
                    value: l.value.clone(),
                })
                .collect(),
            samples: samples
                .iter()
                .map(|s| WireSample {
                    ts_ms: s.timestamp_ms,
                    value: s.value,
                })
                .collect(),
        }
    }
}

impl WireMatcher {
    /// Translates the wire matcher into the store's matcher algebra. Regex
    /// patterns are anchored during compilation; a malformed pattern is an
    /// invalid request.
    pub fn to_matcher(&self) -> Result<Matcher> {
        let matcher = match self.matcher_type {
            MatcherType::Eq => Matcher::equal(&self.name, &self.value),
            MatcherType::Neq => Matcher::not_equal(&self.name, &self.value),
            MatcherType::Re => Matcher::regex(&self.name, &self.value)
                .map_err(|e| IngestError::InvalidRequest(e.to_string()))?,
            MatcherType::Nre => Matcher::not_regex(&self.name, &self.value)
                .map_err(|e| IngestError::InvalidRequest(e.to_string()))?,
        };
        Ok(matcher)
    }
}
