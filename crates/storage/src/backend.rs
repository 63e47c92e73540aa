use std::path::PathBuf;
use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use tracing::info;

use callrun_core::config::WebhookStoreConfig;

use crate::error::StorageError;

/// Object store behind the webhook drop zone.
pub enum WebhookBackend {
    Local(LocalBackend),
    S3(S3Backend),
    Memory(Arc<InMemory>),
}

impl WebhookBackend {
    /// Select S3 when a bucket is configured, otherwise a local directory.
    pub fn from_config(cfg: &WebhookStoreConfig) -> Result<Self, StorageError> {
        if cfg.is_remote() {
            Ok(WebhookBackend::S3(S3Backend::new(cfg)?))
        } else {
            std::fs::create_dir_all(&cfg.local_dir)?;
            Ok(WebhookBackend::Local(LocalBackend::new(&cfg.local_dir)?))
        }
    }

    pub fn in_memory() -> Self {
        WebhookBackend::Memory(Arc::new(InMemory::new()))
    }

    pub fn store_arc(&self) -> Arc<dyn ObjectStore> {
        match self {
            WebhookBackend::Local(b) => b.store.clone(),
            WebhookBackend::S3(b) => b.store.clone(),
            WebhookBackend::Memory(m) => m.clone(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, WebhookBackend::S3(_))
    }
}

/// Local filesystem backend.
pub struct LocalBackend {
    pub store: Arc<dyn ObjectStore>,
    pub root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: &std::path::Path) -> Result<Self, StorageError> {
        let canonical = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let store = LocalFileSystem::new_with_prefix(&canonical)
            .map_err(|e| StorageError::Other(format!("local filesystem error: {e}")))?;
        info!("Webhook store: local backend at {}", canonical.display());
        Ok(Self {
            store: Arc::new(store),
            root: canonical,
        })
    }
}

/// S3 backend.
pub struct S3Backend {
    pub store: Arc<dyn ObjectStore>,
    pub bucket: String,
}

impl S3Backend {
    pub fn new(cfg: &WebhookStoreConfig) -> Result<Self, StorageError> {
        let bucket = cfg
            .bucket
            .as_deref()
            .ok_or_else(|| StorageError::NotConfigured("WEBHOOK_BUCKET not set".into()))?;

        let mut builder = AmazonS3Builder::new().with_region(&cfg.region);

        if let Some(ref key) = cfg.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(ref secret) = cfg.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }

        match cfg.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) => {
                // object_store requires absolute URLs
                let endpoint_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                    endpoint.to_string()
                } else {
                    format!("https://{}", endpoint)
                };
                builder = builder
                    .with_bucket_name(bucket)
                    .with_endpoint(&endpoint_url)
                    .with_allow_http(endpoint_url.starts_with("http://"));
            }
            None => {
                builder = builder.with_url(format!("s3://{}", bucket));
            }
        }

        let store = builder.build()?;
        info!("Webhook store: S3 backend s3://{} (region: {})", bucket, cfg.region);

        Ok(Self {
            store: Arc::new(store),
            bucket: bucket.to_string(),
        })
    }
}
