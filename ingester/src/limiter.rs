//! Converts the global per-tenant series limit into a local one.

/// Translates the cluster-wide series limit into the limit this single
/// replica should enforce.
///
/// The ring itself is an external collaborator, so the limiter only sees
/// the replication factor: when series are sharded by all labels a tenant's
/// series spread across the ring and every sample lands on
/// `replication_factor` replicas, so the local bound is the global limit
/// scaled by the replication factor (an upper bound for any ring size).
/// Without shard-by-all-labels a tenant's whole series set can land here,
/// so the global limit applies as-is.
#[derive(Debug, Clone)]
pub struct SeriesLimiter {
    max_global_series_per_tenant: usize,
    replication_factor: usize,
    shard_by_all_labels: bool,
}

impl SeriesLimiter {
    pub fn new(
        max_global_series_per_tenant: usize,
        replication_factor: usize,
        shard_by_all_labels: bool,
    ) -> Self {
        Self {
            max_global_series_per_tenant,
            replication_factor: replication_factor.max(1),
            shard_by_all_labels,
        }
    }

    /// The series limit to enforce locally, or `None` when unlimited.
    pub fn local_limit(&self) -> Option<usize> {
        if self.max_global_series_per_tenant == 0 {
            return None;
        }
        if self.shard_by_all_labels {
            Some(self.max_global_series_per_tenant * self.replication_factor)
        } else {
            Some(self.max_global_series_per_tenant)
        }
    }
}
