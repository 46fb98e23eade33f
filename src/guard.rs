use std::sync::Arc;
use tracing::warn;

use crate::error::{TransferError, TransferResult};
use crate::providers::ObjectStore;
use crate::state::ObjectMeta;

/// Refuses to let a transfer build on bytes from an object that has since been overwritten.
#[derive(Clone)]
pub struct ObjectIdentityGuard {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
}

impl ObjectIdentityGuard {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Compares entity tags only; size follows from the tag.
    pub fn verify(current: &ObjectMeta, recorded: &ObjectMeta) -> TransferResult<()> {
        if current.etag != recorded.etag {
            return Err(TransferError::ObjectInconsistent {
                expected: recorded.etag.clone(),
                actual: current.etag.clone(),
            });
        }
        Ok(())
    }

    /// Fetches fresh metadata and checks it against `recorded`.
    pub async fn ensure_unchanged(&self, recorded: &ObjectMeta) -> TransferResult<()> {
        let current = self.store.get_object_meta(&self.bucket, &self.key).await?;
        let result = Self::verify(&current, recorded);
        if result.is_err() {
            warn!(
                bucket = %self.bucket,
                key = %self.key,
                recorded = %recorded.etag,
                current = %current.etag,
                "remote object changed"
            );
        }
        result
    }
}
