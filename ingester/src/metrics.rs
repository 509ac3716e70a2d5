//! Prometheus metrics for the ingester.

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for HTTP request metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabelsWithStatus {
    pub method: HttpMethod,
    pub endpoint: String,
    pub status: u16,
}

/// HTTP method label value.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum HttpMethod {
    Get,
    Post,
    Other,
}

impl From<&axum::http::Method> for HttpMethod {
    fn from(method: &axum::http::Method) -> Self {
        match *method {
            axum::http::Method::GET => HttpMethod::Get,
            axum::http::Method::POST => HttpMethod::Post,
            _ => HttpMethod::Other,
        }
    }
}

/// Labels for the latency histogram (status is unknown when the timer
/// starts).
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    pub method: HttpMethod,
    pub endpoint: String,
}

/// Container for all ingester metrics.
pub struct Metrics {
    registry: Registry,

    /// Counter of samples successfully ingested.
    pub ingested_samples_total: Counter,

    /// Counter of write requests that failed.
    pub ingest_failures_total: Counter,

    /// Counter of queries served.
    pub queries_total: Counter,

    /// Gauge of tenants with an open local TSDB.
    pub memory_tenants: Gauge,

    /// Counter of blocks uploaded by the shippers.
    pub shipper_uploads_total: Counter,

    /// Counter of shipper sync attempts that failed.
    pub shipper_sync_failures_total: Counter,

    /// Counter of HTTP requests.
    pub http_requests_total: Family<HttpLabelsWithStatus, Counter>,

    /// Histogram of HTTP request latency in seconds.
    pub http_request_duration_seconds: Family<HttpLabels, Histogram>,

    /// Gauge of currently in-flight requests.
    pub http_requests_in_flight: Gauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics registry with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let ingested_samples_total = Counter::default();
        registry.register(
            "ingester_ingested_samples_total",
            "Total number of samples ingested",
            ingested_samples_total.clone(),
        );

        let ingest_failures_total = Counter::default();
        registry.register(
            "ingester_ingest_failures_total",
            "Total number of write requests that failed",
            ingest_failures_total.clone(),
        );

        let queries_total = Counter::default();
        registry.register(
            "ingester_queries_total",
            "Total number of queries served",
            queries_total.clone(),
        );

        let memory_tenants = Gauge::default();
        registry.register(
            "ingester_memory_tenants",
            "Number of tenants with an open local TSDB",
            memory_tenants.clone(),
        );

        let shipper_uploads_total = Counter::default();
        registry.register(
            "ingester_shipper_uploads_total",
            "Total number of blocks uploaded to object storage",
            shipper_uploads_total.clone(),
        );

        let shipper_sync_failures_total = Counter::default();
        registry.register(
            "ingester_shipper_sync_failures_total",
            "Total number of shipper sync attempts that failed",
            shipper_sync_failures_total.clone(),
        );

        let http_requests_total = Family::<HttpLabelsWithStatus, Counter>::default();
        registry.register(
            "http_requests_total",
            "Total number of HTTP requests",
            http_requests_total.clone(),
        );

        // Buckets from 1ms to ~8s
        let http_request_duration_seconds =
            Family::<HttpLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 14))
            });
        registry.register(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
            http_request_duration_seconds.clone(),
        );

        let http_requests_in_flight = Gauge::default();
        registry.register(
            "http_requests_in_flight",
            "Number of HTTP requests currently being processed",
            http_requests_in_flight.clone(),
        );

        Self {
            registry,
            ingested_samples_total,
            ingest_failures_total,
            queries_total,
            memory_tenants,
            shipper_uploads_total,
            shipper_sync_failures_total,
            http_requests_total,
            http_request_duration_seconds,
            http_requests_in_flight,
        }
    }

    /// Encode all metrics to Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)
            .expect("encoding metrics should not fail");
        buffer
    }
}
