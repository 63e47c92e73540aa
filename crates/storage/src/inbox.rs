use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{GetOptions, ObjectStore, PutPayload};
use tracing::{info, warn};

use crate::backend::WebhookBackend;
use crate::error::StorageError;

/// A pending outcome batch that has been moved out of the drop zone.
#[derive(Debug, Clone)]
pub struct PendingBatch {
    pub bytes: Bytes,
    /// Key the batch was archived under.
    pub archived_to: String,
}

/// Webhook drop zone: one pending object that the webhook receiver appends to,
/// drained by [`OutcomeInbox::take_pending`].
#[derive(Clone)]
pub struct OutcomeInbox {
    store: Arc<dyn ObjectStore>,
    pending_path: String,
}

impl OutcomeInbox {
    pub fn new(backend: &WebhookBackend, pending_path: impl Into<String>) -> Self {
        Self::with_store(backend.store_arc(), pending_path)
    }

    pub fn with_store(store: Arc<dyn ObjectStore>, pending_path: impl Into<String>) -> Self {
        Self {
            store,
            pending_path: pending_path.into(),
        }
    }

    pub fn pending_path(&self) -> &str {
        &self.pending_path
    }

    /// Replace the pending object. The webhook receiver's side of the contract;
    /// used here for seeding and tests.
    pub async fn put_pending(&self, body: impl Into<Bytes>) -> Result<(), StorageError> {
        let path = ObjectPath::from(self.pending_path.as_str());
        self.store.put(&path, PutPayload::from(body.into())).await?;
        Ok(())
    }

    /// Move the pending batch to `processed/<name>_<stamp>` and return its bytes.
    ///
    /// Sequence: head, download guarded by the head's e-tag, copy to the
    /// processed key, re-check the e-tag, delete the original. If the object
    /// changed in between, the copy is discarded, the live object is left in
    /// place and [`StorageError::Conflict`] is returned so the next cycle
    /// retries with the newer content. Returns `None` when nothing is pending.
    pub async fn take_pending(&self, stamp: &str) -> Result<Option<PendingBatch>, StorageError> {
        let live = ObjectPath::from(self.pending_path.as_str());

        let meta = match self.store.head(&live).await {
            Ok(meta) => meta,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let opts = GetOptions {
            if_match: meta.e_tag.clone(),
            ..Default::default()
        };
        let bytes = match self.store.get_opts(&live, opts).await {
            Ok(result) => result.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(object_store::Error::Precondition { .. }) => {
                return Err(StorageError::Conflict(self.pending_path.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let archived_to = processed_path(&self.pending_path, stamp);
        let archive = ObjectPath::from(archived_to.as_str());
        self.store.copy(&live, &archive).await?;

        let current = self.store.head(&live).await?;
        if current.e_tag != meta.e_tag {
            warn!(
                path = %self.pending_path,
                "Pending batch changed during rotation, leaving it for the next cycle"
            );
            if let Err(e) = self.store.delete(&archive).await {
                warn!(archive = %archived_to, error = %e, "Failed to discard stale archive copy");
            }
            return Err(StorageError::Conflict(self.pending_path.clone()));
        }

        self.store.delete(&live).await?;
        info!(
            path = %self.pending_path,
            archived_to = %archived_to,
            bytes = bytes.len(),
            "Rotated pending outcome batch"
        );
        Ok(Some(PendingBatch { bytes, archived_to }))
    }
}

/// `raw/inbound.csv` + stamp → `raw/processed/inbound.csv_<stamp>`.
pub fn processed_path(path: &str, stamp: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, name)) => format!("{dir}/processed/{name}_{stamp}"),
        None => format!("processed/{path}_{stamp}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processed_path_keeps_directory() {
        assert_eq!(
            processed_path("raw_leads/inbound_webhook.csv", "2024-01-10T08-00-00"),
            "raw_leads/processed/inbound_webhook.csv_2024-01-10T08-00-00"
        );
        assert_eq!(processed_path("x.csv", "t"), "processed/x.csv_t");
    }

    #[tokio::test]
    async fn take_moves_object() {
        let backend = WebhookBackend::in_memory();
        let inbox = OutcomeInbox::new(&backend, "raw_leads/inbound_webhook.csv");
        inbox.put_pending("phone,date\n2145550182,2024-01-10\n").await.unwrap();

        let batch = inbox.take_pending("T1").await.unwrap().unwrap();
        assert!(batch.bytes.starts_with(b"phone,date"));
        assert_eq!(batch.archived_to, "raw_leads/processed/inbound_webhook.csv_T1");

        let store = backend.store_arc();
        let archived = store
            .get(&ObjectPath::from(batch.archived_to.as_str()))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(archived, batch.bytes);

        // Second take sees nothing.
        assert!(inbox.take_pending("T2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nothing_pending() {
        let backend = WebhookBackend::in_memory();
        let inbox = OutcomeInbox::new(&backend, "raw_leads/inbound_webhook.csv");
        assert!(inbox.take_pending("T").await.unwrap().is_none());
    }
}
