//! Configuration for the ingester.

use std::path::PathBuf;
use std::time::Duration;

use tephra_common::ObjectStoreConfig;

/// Settings for the per-tenant local TSDBs and the block shipper.
#[derive(Debug, Clone)]
pub struct TsdbConfig {
    /// Root directory; each tenant gets `<dir>/<tenant_id>`.
    pub dir: PathBuf,
    /// How long samples are kept before their blocks are deleted.
    pub retention: Duration,
    /// Block range sizes, smallest first.
    pub block_ranges: Vec<Duration>,
    /// How often each tenant's shipper uploads sealed blocks. Zero disables
    /// shipping entirely.
    pub ship_interval: Duration,
}

impl Default for TsdbConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data"),
            retention: Duration::from_secs(24 * 60 * 60),
            block_ranges: vec![Duration::from_secs(2 * 60 * 60)],
            ship_interval: Duration::from_secs(60),
        }
    }
}

impl TsdbConfig {
    /// Block ranges converted to the millisecond granularity the engine
    /// works in.
    pub fn block_ranges_ms(&self) -> Vec<i64> {
        self.block_ranges
            .iter()
            .map(|d| d.as_millis() as i64)
            .collect()
    }
}

/// Limits applied per tenant.
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Global cap on series per tenant across the whole ring. Zero
    /// disables the limit.
    pub max_series_per_tenant: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_series_per_tenant: 0,
        }
    }
}

/// Top-level ingester configuration.
#[derive(Debug, Clone, Default)]
pub struct IngesterConfig {
    pub tsdb: TsdbConfig,
    /// Where the shipper uploads sealed blocks.
    pub object_store: ObjectStoreConfig,
    pub limits: LimitsConfig,
    /// Replication factor of the ring this ingester belongs to; consumed by
    /// the series limiter.
    pub replication_factor: usize,
    /// Whether the distributor shards series by all labels; consumed by the
    /// series limiter.
    pub shard_by_all_labels: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_convert_block_ranges_to_milliseconds() {
        // given
        let config = TsdbConfig {
            block_ranges: vec![Duration::from_secs(2), Duration::from_secs(6)],
            ..Default::default()
        };

        // then
        assert_eq!(config.block_ranges_ms(), vec![2000, 6000]);
    }
}
