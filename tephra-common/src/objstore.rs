//! Object storage configuration and construction.
//!
//! Services receive an [`ObjectStoreConfig`] and turn it into an
//! `Arc<dyn ObjectStore>` with [`create_object_store`]. The in-memory
//! backend exists for tests, the local backend for single-node deployments,
//! and the AWS backend for production.

use std::sync::Arc;

use object_store::ObjectStore;
use serde::{Deserialize, Serialize};

/// Which object store backend to use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    /// Keep objects in process memory. Test-only: contents vanish on exit.
    #[default]
    InMemory,
    /// A directory on the local filesystem.
    Local(LocalConfig),
    /// An S3 bucket.
    Aws(AwsConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Directory under which objects are stored. Created if absent.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub bucket: String,
}

/// Creates an object store from the provided configuration.
///
/// # Errors
///
/// Returns an error string if the backend cannot be constructed, e.g. the
/// local directory cannot be created or the S3 builder rejects its inputs.
pub fn create_object_store(config: &ObjectStoreConfig) -> Result<Arc<dyn ObjectStore>, String> {
    match config {
        ObjectStoreConfig::InMemory => Ok(Arc::new(object_store::memory::InMemory::new())),
        ObjectStoreConfig::Local(local) => {
            std::fs::create_dir_all(&local.path).map_err(|e| {
                format!("failed to create storage directory '{}': {}", local.path, e)
            })?;
            let store = object_store::local::LocalFileSystem::new_with_prefix(&local.path)
                .map_err(|e| format!("failed to create local filesystem store: {}", e))?;
            Ok(Arc::new(store))
        }
        ObjectStoreConfig::Aws(aws) => {
            let store = object_store::aws::AmazonS3Builder::new()
                .with_region(&aws.region)
                .with_bucket_name(&aws.bucket)
                .build()
                .map_err(|e| format!("failed to create AWS S3 store: {}", e))?;
            Ok(Arc::new(store))
        }
    }
}
