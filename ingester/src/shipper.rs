//! Per-tenant background shipper.
//!
//! One shipper task runs per tenant, uploading that tenant's sealed blocks
//! to the tenant-scoped prefix of the object store on a fixed interval.
//! Sync failures are logged together with the number of blocks uploaded in
//! the attempt and never stop the loop; only the process-wide quit signal
//! does.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tephra_tsdb::{list_blocks, BlockMeta, BLOCK_CHUNKS_FILENAME, BLOCK_META_FILENAME};

use crate::metrics::Metrics;
use crate::TENANT_EXTERNAL_LABEL;

/// Source tag stamped into uploaded block metadata.
const BLOCK_SOURCE: &str = "receive";

/// Name of the local file tracking which blocks were already uploaded.
const STATE_FILENAME: &str = "shipper.json";

/// Outcome of one sync attempt.
pub struct SyncResult {
    pub uploaded: usize,
    pub error: Option<String>,
}

/// Block metadata as uploaded: the local meta plus the external labels and
/// source tag that qualify the block in object storage.
#[derive(Debug, Serialize, Deserialize)]
struct ShippedMeta {
    #[serde(flatten)]
    meta: BlockMeta,
    external_labels: BTreeMap<String, String>,
    source: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ShipperState {
    uploaded: Vec<Uuid>,
}

pub struct Shipper {
    tenant: String,
    /// The tenant's local TSDB directory holding sealed blocks.
    dir: PathBuf,
    bucket: Arc<dyn ObjectStore>,
    metrics: Arc<Metrics>,
}

impl Shipper {
    pub fn new(
        tenant: impl Into<String>,
        dir: impl Into<PathBuf>,
        bucket: Arc<dyn ObjectStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            dir: dir.into(),
            bucket,
            metrics,
        }
    }

    /// Runs the upload loop until `quit` fires. The first sync happens one
    /// interval after start, not immediately.
    pub async fn run(self, interval: Duration, quit: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = self.sync().await;
                    match result.error {
                        None => {
                            if result.uploaded > 0 {
                                tracing::debug!(
                                    tenant = %self.tenant,
                                    uploaded = result.uploaded,
                                    "shipped blocks"
                                );
                            }
                        }
                        Some(error) => {
                            self.metrics.shipper_sync_failures_total.inc();
                            tracing::warn!(
                                tenant = %self.tenant,
                                uploaded = result.uploaded,
                                error = %error,
                                "shipper sync failed"
                            );
                        }
                    }
                }
                _ = quit.cancelled() => {
                    tracing::debug!(tenant = %self.tenant, "shipper stopping");
                    return;
                }
            }
        }
    }

    /// Uploads every sealed block not yet recorded in the local state file.
    /// Returns how many blocks were uploaded, plus the first error hit.
    pub async fn sync(&self) -> SyncResult {
        let mut uploaded = 0;

        let blocks = match list_blocks(&self.dir).await {
            Ok(blocks) => blocks,
            Err(e) => {
                return SyncResult {
                    uploaded,
                    error: Some(format!("listing local blocks: {}", e)),
                }
            }
        };

        let mut state = match self.read_state().await {
            Ok(state) => state,
            Err(e) => {
                return SyncResult {
                    uploaded,
                    error: Some(format!("reading shipper state: {}", e)),
                }
            }
        };

        for meta in blocks {
            if state.uploaded.contains(&meta.id) {
                continue;
            }
            if let Err(e) = self.upload_block(&meta).await {
                return SyncResult {
                    uploaded,
                    error: Some(format!("uploading block {}: {}", meta.id, e)),
                };
            }

            // Record each upload as it lands so a later failure in the same
            // sync never causes a re-upload.
            state.uploaded.push(meta.id);
            if let Err(e) = self.write_state(&state).await {
                return SyncResult {
                    uploaded,
                    error: Some(format!("writing shipper state: {}", e)),
                };
            }

            uploaded += 1;
            self.metrics.shipper_uploads_total.inc();
        }

        SyncResult {
            uploaded,
            error: None,
        }
    }

    async fn upload_block(&self, meta: &BlockMeta) -> Result<(), String> {
        let block_dir = self.dir.join(meta.id.to_string());

        let chunks = tokio::fs::read(block_dir.join(BLOCK_CHUNKS_FILENAME))
            .await
            .map_err(|e| e.to_string())?;
        self.bucket
            .put(
                &self.object_path(meta, BLOCK_CHUNKS_FILENAME),
                Bytes::from(chunks).into(),
            )
            .await
            .map_err(|e| e.to_string())?;

        // The uploaded meta carries exactly one external label, the tenant
        // id; readers filter it back out before returning series.
        let shipped = ShippedMeta {
            meta: meta.clone(),
            external_labels: BTreeMap::from([(
                TENANT_EXTERNAL_LABEL.to_string(),
                self.tenant.clone(),
            )]),
            source: BLOCK_SOURCE.to_string(),
        };
        let encoded = serde_json::to_vec_pretty(&shipped).map_err(|e| e.to_string())?;
        self.bucket
            .put(
                &self.object_path(meta, BLOCK_META_FILENAME),
                Bytes::from(encoded).into(),
            )
            .await
            .map_err(|e| e.to_string())?;

        Ok(())
    }

    fn object_path(&self, meta: &BlockMeta, file: &str) -> ObjectPath {
        ObjectPath::from(format!("{}/{}/{}", self.tenant, meta.id, file))
    }

    async fn read_state(&self) -> Result<ShipperState, String> {
        match tokio::fs::read(self.dir.join(STATE_FILENAME)).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| e.to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ShipperState::default()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn write_state(&self, state: &ShipperState) -> Result<(), String> {
        let encoded = serde_json::to_vec(state).map_err(|e| e.to_string())?;
        tokio::fs::write(self.dir.join(STATE_FILENAME), encoded)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tephra_tsdb::{Tsdb, TsdbOptions};

    async fn seal_one_block(db: &Tsdb) {
        let labels = tephra_tsdb::LabelSet::from_pairs([("__name__", "up")]);
        let mut app = db.appender();
        app.add(&labels, 1000, 1.0).unwrap();
        app.commit().await.unwrap();
        db.close().await.unwrap();
        assert_eq!(db.blocks().len(), 1);
    }

    fn shipper(dir: &std::path::Path) -> (Shipper, Arc<dyn ObjectStore>) {
        let bucket: Arc<dyn ObjectStore> = Arc::new(object_store::memory::InMemory::new());
        let shipper = Shipper::new(
            "team-a",
            dir.to_path_buf(),
            bucket.clone(),
            Arc::new(Metrics::new()),
        );
        (shipper, bucket)
    }

    async fn list_keys(bucket: &Arc<dyn ObjectStore>) -> Vec<String> {
        let mut keys: Vec<String> = bucket
            .list(None)
            .try_collect::<Vec<_>>()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.location.to_string())
            .collect();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn should_upload_sealed_blocks_under_tenant_prefix() {
        // given
        let tmp = tempfile::tempdir().unwrap();
        let db = Tsdb::open(tmp.path().join("t"), TsdbOptions::default())
            .await
            .unwrap();
        seal_one_block(&db).await;
        let block_id = db.blocks()[0].id;
        let (shipper, bucket) = self::shipper(&tmp.path().join("t"));

        // when
        let result = shipper.sync().await;

        // then
        assert!(result.error.is_none());
        assert_eq!(result.uploaded, 1);
        assert_eq!(
            list_keys(&bucket).await,
            vec![
                format!("team-a/{}/chunks.dat", block_id),
                format!("team-a/{}/meta.json", block_id),
            ]
        );
    }

    #[tokio::test]
    async fn should_stamp_uploaded_meta_with_tenant_label_and_source() {
        // given
        let tmp = tempfile::tempdir().unwrap();
        let db = Tsdb::open(tmp.path().join("t"), TsdbOptions::default())
            .await
            .unwrap();
        seal_one_block(&db).await;
        let block_id = db.blocks()[0].id;
        let (shipper, bucket) = self::shipper(&tmp.path().join("t"));

        // when
        shipper.sync().await;

        // then
        let raw = bucket
            .get(&ObjectPath::from(format!("team-a/{}/meta.json", block_id)))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        let shipped: ShippedMeta = serde_json::from_slice(&raw).unwrap();
        assert_eq!(shipped.source, "receive");
        assert_eq!(
            shipped.external_labels,
            BTreeMap::from([(TENANT_EXTERNAL_LABEL.to_string(), "team-a".to_string())])
        );
        assert_eq!(shipped.meta.id, block_id);
    }

    #[tokio::test]
    async fn should_not_upload_the_same_block_twice() {
        // given
        let tmp = tempfile::tempdir().unwrap();
        let db = Tsdb::open(tmp.path().join("t"), TsdbOptions::default())
            .await
            .unwrap();
        seal_one_block(&db).await;
        let (shipper, _bucket) = self::shipper(&tmp.path().join("t"));
        assert_eq!(shipper.sync().await.uploaded, 1);

        // when
        let second = shipper.sync().await;

        // then
        assert!(second.error.is_none());
        assert_eq!(second.uploaded, 0);
    }

    #[tokio::test]
    async fn should_report_zero_uploads_for_empty_directory() {
        // given
        let tmp = tempfile::tempdir().unwrap();
        let (shipper, _bucket) = self::shipper(tmp.path());

        // when
        let result = shipper.sync().await;

        // then
        assert!(result.error.is_none());
        assert_eq!(result.uploaded, 0);
    }

    #[tokio::test]
    async fn should_stop_when_quit_fires() {
        // given
        let tmp = tempfile::tempdir().unwrap();
        let (shipper, _bucket) = self::shipper(tmp.path());
        let quit = CancellationToken::new();

        // when
        let handle = tokio::spawn(shipper.run(Duration::from_secs(3600), quit.clone()));
        quit.cancel();

        // then - the task exits promptly
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("shipper did not stop on quit")
            .unwrap();
    }
}
