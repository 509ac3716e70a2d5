//! Tephra ingester binary entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tephra_common::{LocalConfig, ObjectStoreConfig};
use tephra_ingester::server::{IngesterServer, ServerConfig};
use tephra_ingester::{Ingester, IngesterConfig, LimitsConfig, Metrics, TsdbConfig};

#[derive(Debug, Parser)]
#[command(name = "tephra-ingester", about = "Multi-tenant time-series ingester")]
struct CliArgs {
    /// Root directory for per-tenant TSDBs.
    #[arg(long, default_value = "./data")]
    tsdb_dir: PathBuf,

    /// Retention of local data, in seconds.
    #[arg(long, default_value_t = 86_400)]
    tsdb_retention_secs: u64,

    /// Block range sizes, in seconds, smallest first.
    #[arg(long, value_delimiter = ',', default_value = "7200")]
    tsdb_block_ranges_secs: Vec<u64>,

    /// How often each tenant's shipper runs, in seconds. 0 disables it.
    #[arg(long, default_value_t = 60)]
    tsdb_ship_interval_secs: u64,

    /// Directory backing the block object store. In-memory when omitted.
    #[arg(long)]
    object_store_dir: Option<PathBuf>,

    /// Global cap on series per tenant. 0 disables the limit.
    #[arg(long, default_value_t = 0)]
    max_series_per_tenant: usize,

    /// Replication factor of the ring this ingester belongs to.
    #[arg(long, default_value_t = 1)]
    replication_factor: usize,

    /// Whether the distributor shards series by all labels.
    #[arg(long)]
    shard_by_all_labels: bool,

    /// HTTP listen port.
    #[arg(long, default_value_t = 9009)]
    port: u16,
}

impl CliArgs {
    fn to_config(&self) -> IngesterConfig {
        IngesterConfig {
            tsdb: TsdbConfig {
                dir: self.tsdb_dir.clone(),
                retention: Duration::from_secs(self.tsdb_retention_secs),
                block_ranges: self
                    .tsdb_block_ranges_secs
                    .iter()
                    .map(|&s| Duration::from_secs(s))
                    .collect(),
                ship_interval: Duration::from_secs(self.tsdb_ship_interval_secs),
            },
            object_store: match &self.object_store_dir {
                Some(dir) => ObjectStoreConfig::Local(LocalConfig {
                    path: dir.display().to_string(),
                }),
                None => ObjectStoreConfig::InMemory,
            },
            limits: LimitsConfig {
                max_series_per_tenant: self.max_series_per_tenant,
            },
            replication_factor: self.replication_factor,
            shard_by_all_labels: self.shard_by_all_labels,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI arguments
    let args = CliArgs::parse();
    let config = args.to_config();
    let server_config = ServerConfig { port: args.port };

    tracing::info!("Starting ingester with config: {:?}", config);

    let metrics = Arc::new(Metrics::new());
    let ingester = Arc::new(
        Ingester::new(config, metrics.clone()).expect("Failed to initialize ingester"),
    );

    let server = IngesterServer::new(ingester, metrics, server_config);
    server.run().await;
}
