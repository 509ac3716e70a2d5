//! Tephra ingester - a multi-tenant time-series ingestion and query
//! service.
//!
//! Producers push labeled samples over HTTP with a tenant id header; each
//! tenant gets its own local TSDB under the configured root directory, a
//! per-tenant shipper uploads sealed blocks to object storage, and range
//! queries stream merged samples back out. Shutdown drains in-flight
//! writes, stops the shippers and closes every tenant database.

pub mod config;
mod error;
mod ingester;
mod limiter;
mod metrics;
pub mod server;
mod shipper;
pub mod wire;

/// The single external label qualifying uploaded blocks in object storage.
/// It is stripped from series before they go back out over the wire.
pub const TENANT_EXTERNAL_LABEL: &str = "__tenant_id__";

pub use config::{IngesterConfig, LimitsConfig, TsdbConfig};
pub use error::{IngestError, Result};
pub use ingester::Ingester;
pub use limiter::SeriesLimiter;
pub use metrics::Metrics;
pub use shipper::{Shipper, SyncResult};
