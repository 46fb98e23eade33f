use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{ByteStream, ObjectStore};
use crate::error::{TransferError, TransferResult};
use crate::hashing::hash_bytes;
use crate::state::{ByteRange, ObjectMeta};

const CHUNK_SIZE: usize = 16 * 1024;

struct StoredObject {
    data: Bytes,
    etag: String,
}

/// In-process object store. Every `put` mints a new etag, so overwriting an
/// object looks exactly like a remote mutation to a running transaction.
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    requests: Mutex<Vec<ByteRange>>,
    generation: AtomicUsize,
    /// Ranged reads left before reads start failing; `usize::MAX` disables.
    reads_before_failure: AtomicUsize,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            generation: AtomicUsize::new(0),
            reads_before_failure: AtomicUsize::new(usize::MAX),
        }
    }

    /// Stores `data` and returns its new etag.
    pub fn put(&self, bucket: &str, key: &str, data: impl Into<Bytes>) -> String {
        let data = data.into();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let etag = format!("\"{}-{}\"", &hash_bytes(&data)[..16], generation);
        lock(&self.objects).insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                etag: etag.clone(),
            },
        );
        etag
    }

    /// Lets `successes` more ranged reads through, then fails every read after that.
    pub fn fail_after(&self, successes: usize) {
        self.reads_before_failure.store(successes, Ordering::SeqCst);
    }

    pub fn clear_failures(&self) {
        self.reads_before_failure.store(usize::MAX, Ordering::SeqCst);
    }

    /// Every range requested so far, in request order.
    pub fn requested_ranges(&self) -> Vec<ByteRange> {
        lock(&self.requests).clone()
    }

    fn take_read_permit(&self) -> bool {
        self.reads_before_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }

    fn lookup<T>(&self, bucket: &str, key: &str, f: impl FnOnce(&StoredObject) -> T) -> TransferResult<T> {
        lock(&self.objects)
            .get(&(bucket.to_string(), key.to_string()))
            .map(f)
            .ok_or_else(|| TransferError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get_object_meta(&self, bucket: &str, key: &str) -> TransferResult<ObjectMeta> {
        self.lookup(bucket, key, |object| ObjectMeta {
            etag: object.etag.clone(),
            size: object.data.len() as u64,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str, range: ByteRange) -> TransferResult<ByteStream> {
        let data = self.lookup(bucket, key, |object| object.data.clone())?;
        lock(&self.requests).push(range);

        if !self.take_read_permit() {
            return Err(TransferError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "injected transport failure",
            )));
        }

        let start = (range.start as usize).min(data.len());
        let end = (range.end as usize).min(data.len());
        let slice = data.slice(start..end.max(start));
        let chunks: Vec<io::Result<Bytes>> = (0..slice.len())
            .step_by(CHUNK_SIZE)
            .map(|offset| Ok(slice.slice(offset..(offset + CHUNK_SIZE).min(slice.len()))))
            .collect();

        Ok(Box::pin(stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn read_all(store: &MemoryObjectStore, range: ByteRange) -> TransferResult<Vec<u8>> {
        let body = store.get_object("b", "k", range).await?;
        let chunks: Vec<Bytes> = body.try_collect().await?;
        Ok(chunks.concat())
    }

    #[tokio::test]
    async fn test_meta_and_ranged_read() {
        let store = MemoryObjectStore::new();
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let etag = store.put("b", "k", data.clone());

        let meta = store.get_object_meta("b", "k").await.unwrap();
        assert_eq!(meta.etag, etag);
        assert_eq!(meta.size, 50_000);

        let bytes = read_all(&store, ByteRange::new(100, 40_000)).await.unwrap();
        assert_eq!(bytes, &data[100..40_000]);
        assert_eq!(store.requested_ranges(), vec![ByteRange::new(100, 40_000)]);
    }

    #[tokio::test]
    async fn test_put_changes_etag_even_for_same_content() {
        let store = MemoryObjectStore::new();
        let first = store.put("b", "k", &b"same"[..]);
        let second = store.put("b", "k", &b"same"[..]);
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_missing_object() {
        let store = MemoryObjectStore::new();
        assert!(matches!(
            store.get_object_meta("b", "nope").await,
            Err(TransferError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_fail_after() {
        let store = MemoryObjectStore::new();
        store.put("b", "k", &b"0123456789"[..]);
        store.fail_after(1);

        assert!(read_all(&store, ByteRange::new(0, 5)).await.is_ok());
        assert!(matches!(
            read_all(&store, ByteRange::new(5, 10)).await,
            Err(TransferError::Io(_))
        ));

        store.clear_failures();
        assert_eq!(read_all(&store, ByteRange::new(5, 10)).await.unwrap(), b"56789");
    }
}
