use futures::StreamExt;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{TransferError, TransferResult};
use crate::hashing::calculate_hash;
use crate::providers::ObjectStore;
use crate::state::Part;
use crate::utils::part_file_path;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Fetches single parts into `<destination>.part.<n>` files.
///
/// A part is all or nothing: every attempt truncates the part file and
/// rewrites the whole range, so a file left behind by an interrupted attempt
/// is simply overwritten on retry.
pub struct PartDownloader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    destination: PathBuf,
    rate_limiter: Option<Arc<Limiter>>,
    burst: u32,
    cancel: CancellationToken,
}

impl PartDownloader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            key: key.into(),
            destination: destination.into(),
            rate_limiter: None,
            burst: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// Caps throughput at `bytes_per_sec`, shared across every part this downloader fetches.
    pub fn with_rate_limit(mut self, bytes_per_sec: Option<NonZeroU32>) -> Self {
        self.rate_limiter = bytes_per_sec.map(|limit| Arc::new(RateLimiter::direct(Quota::per_second(limit))));
        self.burst = bytes_per_sec.map(NonZeroU32::get).unwrap_or(0);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn part_path(&self, number: u32) -> PathBuf {
        part_file_path(&self.destination, number)
    }

    /// Downloads `part.range` into its part file and returns the file's checksum.
    ///
    /// Does not touch `part` itself; recording the result is the caller's job.
    pub async fn download_part(&self, part: &Part) -> TransferResult<String> {
        let path = self.part_path(part.number);

        let received = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            received = self.fetch_into(part, &path) => received?,
        };

        if received != part.range.len() {
            return Err(TransferError::RangeLengthMismatch {
                number: part.number,
                expected: part.range.len(),
                received,
            });
        }

        let checksum = calculate_hash(&path).await?;
        debug!(part = part.number, bytes = received, "part downloaded");
        Ok(checksum)
    }

    async fn fetch_into(&self, part: &Part, path: &Path) -> TransferResult<u64> {
        let file = File::create(path).await.map_err(TransferError::write(path))?;
        let mut writer = BufWriter::new(file);
        let mut received: u64 = 0;

        if !part.range.is_empty() {
            let mut stream = self.store.get_object(&self.bucket, &self.key, part.range).await?;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                self.throttle(chunk.len()).await;
                writer
                    .write_all(&chunk)
                    .await
                    .map_err(TransferError::write(path))?;
                received += chunk.len() as u64;
            }
        }

        writer.flush().await.map_err(TransferError::write(path))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(TransferError::write(path))?;
        Ok(received)
    }

    async fn throttle(&self, len: usize) {
        let Some(limiter) = &self.rate_limiter else {
            return;
        };
        // Never ask for more than the bucket holds at once.
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(self.burst as usize);
            if let Some(cells) = NonZeroU32::new(n as u32) {
                if limiter.until_n_ready(cells).await.is_err() {
                    return;
                }
            }
            remaining -= n;
        }
    }
}
