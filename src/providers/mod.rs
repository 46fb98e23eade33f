pub mod http;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::io;
use std::pin::Pin;

use crate::error::TransferResult;
use crate::state::{ByteRange, ObjectMeta};

pub use http::HttpObjectStore;
pub use memory::MemoryObjectStore;

/// Body of a ranged read.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Remote object storage, reduced to the two calls a download needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object_meta(&self, bucket: &str, key: &str) -> TransferResult<ObjectMeta>;

    /// Streams the bytes of `range` of the object.
    async fn get_object(&self, bucket: &str, key: &str, range: ByteRange) -> TransferResult<ByteStream>;
}
