use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use reqwest::{header, Client, StatusCode};
use std::io;
use std::time::Duration;
use url::Url;

use super::{ByteStream, ObjectStore};
use crate::error::{TransferError, TransferResult};
use crate::state::{ByteRange, ObjectMeta};

/// Object store reached over plain HTTP: `HEAD` for metadata, ranged `GET` for parts.
///
/// Objects live at `<endpoint>/<bucket>/<key>`, or `<endpoint>/<key>` when the
/// bucket is empty. A query on the endpoint (a pre-signed URL's signature, an
/// access token) is sent with every request.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    endpoint: Url,
    query: Option<String>,
}

impl HttpObjectStore {
    pub fn new(endpoint: Url) -> TransferResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("cpdl/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: Client, mut endpoint: Url) -> Self {
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        let query = endpoint.query().map(str::to_string);
        endpoint.set_query(None);
        endpoint.set_fragment(None);
        Self {
            client,
            endpoint,
            query,
        }
    }

    pub fn object_url(&self, bucket: &str, key: &str) -> TransferResult<Url> {
        let key = key.trim_start_matches('/');
        let relative = if bucket.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", bucket, key)
        };
        let mut url = self
            .endpoint
            .join(&relative)
            .map_err(|e| TransferError::InvalidConfig(format!("bad object path {}: {}", relative, e)))?;
        url.set_query(self.query.as_deref());
        Ok(url)
    }
}

fn check_status(url: &Url, status: StatusCode, bucket: &str, key: &str) -> TransferResult<()> {
    if status == StatusCode::NOT_FOUND {
        return Err(TransferError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
    }
    if !status.is_success() {
        return Err(TransferError::RemoteStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get_object_meta(&self, bucket: &str, key: &str) -> TransferResult<ObjectMeta> {
        let url = self.object_url(bucket, key)?;
        let response = self.client.head(url.clone()).send().await?;
        check_status(&url, response.status(), bucket, key)?;

        let headers = response.headers();
        let etag = headers
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| TransferError::MissingHeader {
                url: url.to_string(),
                header: "ETag",
            })?
            .to_string();
        // Read the header itself; a HEAD response has no body to size.
        let size = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| TransferError::MissingHeader {
                url: url.to_string(),
                header: "Content-Length",
            })?;

        Ok(ObjectMeta { etag, size })
    }

    async fn get_object(&self, bucket: &str, key: &str, range: ByteRange) -> TransferResult<ByteStream> {
        if range.is_empty() {
            return Ok(Box::pin(stream::empty::<io::Result<Bytes>>()));
        }

        let url = self.object_url(bucket, key)?;
        let response = self
            .client
            .get(url.clone())
            .header(header::RANGE, format!("bytes={}-{}", range.start, range.end - 1))
            .send()
            .await?;

        let status = response.status();
        check_status(&url, status, bucket, key)?;
        // A plain 200 carries the whole object, which only lines up with a range starting at 0.
        if status != StatusCode::PARTIAL_CONTENT && range.start != 0 {
            return Err(TransferError::RemoteStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e)));
        Ok(Box::pin(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(endpoint: &str) -> HttpObjectStore {
        HttpObjectStore::with_client(Client::new(), Url::parse(endpoint).unwrap())
    }

    #[test]
    fn test_object_url_with_bucket() {
        let url = store("http://localhost:9000").object_url("models", "llama/weights.bin").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/models/llama/weights.bin");
    }

    #[test]
    fn test_object_url_without_bucket() {
        let url = store("https://cdn.example.com/mirror").object_url("", "/a/b.tar").unwrap();
        assert_eq!(url.as_str(), "https://cdn.example.com/mirror/a/b.tar");
    }

    #[test]
    fn test_object_url_keeps_endpoint_query() {
        let url = store("https://bucket.s3.example.com/?X-Amz-Signature=abc&X-Amz-Expires=60")
            .object_url("", "w.bin")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://bucket.s3.example.com/w.bin?X-Amz-Signature=abc&X-Amz-Expires=60"
        );
    }

    #[tokio::test]
    async fn test_empty_range_makes_no_request() {
        // Port 9 is discard; any real request would fail to connect.
        let store = store("http://127.0.0.1:9");
        let mut body = store
            .get_object("b", "k", ByteRange::new(0, 0))
            .await
            .unwrap();
        assert!(body.next().await.is_none());
    }
}
