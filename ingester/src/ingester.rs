//! The multi-tenant ingester core.
//!
//! Owns the per-tenant store registry, admits write requests, serves range
//! queries, spawns one shipper per tenant, and drives the graceful
//! shutdown protocol: stop admitting writes, drain in-flight ones, stop
//! the shippers, then close every tenant database.

use std::collections::HashMap;
use std::sync::Arc;

use object_store::ObjectStore;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use tephra_common::{create_object_store, Clock, RequestContext, SystemClock};
use tephra_tsdb::{Matcher, Tsdb, TsdbOptions};

use crate::config::IngesterConfig;
use crate::error::{IngestError, Result};
use crate::limiter::SeriesLimiter;
use crate::metrics::Metrics;
use crate::shipper::Shipper;
use crate::wire::{
    LabelNamesResponse, LabelValuesResponse, QueryRequest, QueryResponse, WireSeries, WriteRequest,
};
use crate::TENANT_EXTERNAL_LABEL;

struct TenantSet {
    dbs: HashMap<String, Arc<Tsdb>>,
    /// Once set no new write may begin; guarded by the same lock as the
    /// map so admission and shutdown cannot race.
    stopped: bool,
}

pub struct Ingester {
    cfg: IngesterConfig,
    bucket: Arc<dyn ObjectStore>,
    tenants: RwLock<TenantSet>,
    /// In-flight write requests; shutdown waits for this to drain before
    /// stopping the shippers.
    inflight: TaskTracker,
    /// All shipper tasks, one per tenant.
    shippers: TaskTracker,
    /// Process-wide quit signal observed by every shipper.
    quit: CancellationToken,
    limiter: SeriesLimiter,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
}

impl Ingester {
    pub fn new(cfg: IngesterConfig, metrics: Arc<Metrics>) -> Result<Ingester> {
        Self::new_with_clock(cfg, metrics, Arc::new(SystemClock))
    }

    pub fn new_with_clock(
        cfg: IngesterConfig,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
    ) -> Result<Ingester> {
        let bucket = create_object_store(&cfg.object_store).map_err(IngestError::Fatal)?;
        let limiter = SeriesLimiter::new(
            cfg.limits.max_series_per_tenant,
            cfg.replication_factor,
            cfg.shard_by_all_labels,
        );

        Ok(Ingester {
            cfg,
            bucket,
            tenants: RwLock::new(TenantSet {
                dbs: HashMap::new(),
                stopped: false,
            }),
            inflight: TaskTracker::new(),
            shippers: TaskTracker::new(),
            quit: CancellationToken::new(),
            limiter,
            metrics,
            clock,
        })
    }

    /// Appends every sample of the request to the tenant's database,
    /// all-or-nothing.
    pub async fn push(&self, ctx: &RequestContext, req: WriteRequest) -> Result<()> {
        let tenant = extract_tenant(ctx)?;
        tracing::trace!(
            tenant = %tenant,
            source = ctx.source().unwrap_or(""),
            series = req.series.len(),
            "push"
        );
        let db = self.get_or_create(tenant).await?;

        // Admission and the in-flight token are taken under the same lock
        // that shutdown uses to set `stopped`, so every admitted write is
        // visible to the drain.
        let _token = {
            let tenants = self.tenants.read().await;
            if tenants.stopped {
                return Err(IngestError::Unavailable("ingester stopping".to_string()));
            }
            self.inflight.token()
        };

        let mut app = db.appender();
        let mut samples = 0u64;
        for series in &req.series {
            let labels = series.label_set();
            for sample in &series.samples {
                if let Err(err) = app.add(&labels, sample.ts_ms, sample.value) {
                    // A rollback failure would be logged here rather than
                    // replace the append error; ours cannot fail.
                    app.rollback();
                    self.metrics.ingest_failures_total.inc();
                    return Err(err.into());
                }
                samples += 1;
            }
        }

        if let Err(err) = app.commit().await {
            self.metrics.ingest_failures_total.inc();
            return Err(err.into());
        }

        self.metrics.ingested_samples_total.inc_by(samples);
        Ok(())
    }

    /// Serves a range query over `[start_ms, end_ms]` for the request's
    /// tenant.
    pub async fn query(&self, ctx: &RequestContext, req: QueryRequest) -> Result<QueryResponse> {
        let tenant = extract_tenant(ctx)?;
        tracing::trace!(
            tenant = %tenant,
            source = ctx.source().unwrap_or(""),
            start_ms = req.start_ms,
            end_ms = req.end_ms,
            "query"
        );
        self.metrics.queries_total.inc();

        let matchers: Vec<Matcher> = req
            .matchers
            .iter()
            .map(|m| m.to_matcher())
            .collect::<Result<_>>()?;

        let db = self.get_or_create(tenant).await?;
        let querier = db.querier(req.start_ms, req.end_ms).await?;

        let mut response = QueryResponse::default();
        for series in querier.select(&matchers)? {
            let samples = series.samples()?;
            if samples.is_empty() {
                continue;
            }
            // Blocks are qualified with the tenant external label in object
            // storage; make sure it never reaches the wire.
            let labels = series.labels().without(TENANT_EXTERNAL_LABEL);
            response
                .series
                .push(WireSeries::from_series(&labels, &samples));
        }
        Ok(response)
    }

    /// Sorted unique values of a label over the retention window.
    pub async fn label_values(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> Result<LabelValuesResponse> {
        let querier = self.retention_querier(ctx).await?;
        Ok(LabelValuesResponse {
            values: querier.label_values(name),
        })
    }

    /// Sorted unique label names over the retention window.
    pub async fn label_names(&self, ctx: &RequestContext) -> Result<LabelNamesResponse> {
        let querier = self.retention_querier(ctx).await?;
        Ok(LabelNamesResponse {
            names: querier.label_names(),
        })
    }

    async fn retention_querier(&self, ctx: &RequestContext) -> Result<tephra_tsdb::Querier> {
        let tenant = extract_tenant(ctx)?;
        let db = self.get_or_create(tenant).await?;
        let through = self.clock.now_ms();
        let from = (through - self.cfg.tsdb.retention.as_millis() as i64).max(0);
        Ok(db.querier(from, through).await?)
    }

    /// Looks up the tenant's database, opening it (and spawning its
    /// shipper) on first use.
    pub async fn get_or_create(&self, tenant: &str) -> Result<Arc<Tsdb>> {
        {
            let tenants = self.tenants.read().await;
            if let Some(db) = tenants.dbs.get(tenant) {
                return Ok(db.clone());
            }
        }

        let mut tenants = self.tenants.write().await;
        // Check again: another request may have opened it between locks.
        if let Some(db) = tenants.dbs.get(tenant) {
            return Ok(db.clone());
        }
        validate_tenant_id(tenant)?;

        let dir = self.cfg.tsdb.dir.join(tenant);
        let opts = TsdbOptions {
            retention: self.cfg.tsdb.retention,
            block_ranges_ms: self.cfg.tsdb.block_ranges_ms(),
            max_series: self.limiter.local_limit(),
        };
        let db = Tsdb::open_with_clock(&dir, opts, self.clock.clone())
            .await
            .map_err(|e| IngestError::Fatal(format!("opening tsdb for {}: {}", tenant, e)))?;
        let db = Arc::new(db);

        if !self.cfg.tsdb.ship_interval.is_zero() {
            let shipper = Shipper::new(tenant, &dir, self.bucket.clone(), self.metrics.clone());
            self.shippers
                .spawn(shipper.run(self.cfg.tsdb.ship_interval, self.quit.clone()));
        }

        tenants.dbs.insert(tenant.to_string(), db.clone());
        self.metrics.memory_tenants.set(tenants.dbs.len() as i64);
        tracing::info!(tenant = %tenant, dir = %dir.display(), "opened tenant tsdb");
        Ok(db)
    }

    /// Concurrently closes every tenant database, removing each from the
    /// registry only after its close succeeded; failed closes stay visible.
    pub async fn close_all(self: &Arc<Self>) {
        let snapshot: Vec<(String, Arc<Tsdb>)> = {
            let tenants = self.tenants.write().await;
            tenants
                .dbs
                .iter()
                .map(|(tenant, db)| (tenant.clone(), db.clone()))
                .collect()
            // The map lock is released here, before any close is awaited;
            // close tasks re-take it to remove their entry.
        };

        let mut handles = Vec::with_capacity(snapshot.len());
        for (tenant, db) in snapshot {
            let ingester = self.clone();
            handles.push(tokio::spawn(async move {
                if let Err(err) = db.close().await {
                    tracing::warn!(tenant = %tenant, error = %err, "unable to close tsdb");
                    return;
                }
                let mut tenants = ingester.tenants.write().await;
                tenants.dbs.remove(&tenant);
                ingester
                    .metrics
                    .memory_tenants
                    .set(tenants.dbs.len() as i64);
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// The graceful shutdown protocol. Safe to call more than once.
    pub async fn shutdown(self: &Arc<Self>) {
        {
            let mut tenants = self.tenants.write().await;
            if tenants.stopped {
                return;
            }
            tenants.stopped = true;
        }

        tracing::info!("draining in-flight write requests");
        self.inflight.close();
        self.inflight.wait().await;

        tracing::info!("stopping shippers");
        self.quit.cancel();
        self.shippers.close();
        self.shippers.wait().await;

        tracing::info!("closing tenant databases");
        self.close_all().await;
        tracing::info!("ingester stopped");
    }

    /// Number of tenants with an open database.
    pub async fn tenant_count(&self) -> usize {
        self.tenants.read().await.dbs.len()
    }
}

fn extract_tenant(ctx: &RequestContext) -> Result<&str> {
    ctx.tenant()
        .ok_or_else(|| IngestError::InvalidRequest("no tenant id".to_string()))
}

/// Tenant ids become directory names; anything that could escape the root
/// is rejected outright.
fn validate_tenant_id(tenant: &str) -> Result<()> {
    if tenant.is_empty()
        || tenant == "."
        || tenant == ".."
        || tenant.contains('/')
        || tenant.contains('\\')
    {
        return Err(IngestError::InvalidRequest(format!(
            "invalid tenant id {:?}",
            tenant
        )));
    }
    Ok(())
}
