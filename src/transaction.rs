//! Download transaction lifecycle.
//!
//! ```text
//! Fresh ─▶ Initiated ─▶ Planned ─▶ InProgress ─▶ AllDone ─▶ Committed
//!   ▲          (checkpoint written at every arrow)                │
//!   └──────────────── next run() after a commit ─────────────────┘
//! ```
//!
//! `run()` rebuilds from the checkpoint when one exists, otherwise initiates
//! from fresh object metadata. Every failure leaves the last saved checkpoint
//! in place, so calling `run()` again resumes without re-fetching finished parts.

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::committer::Committer;
use crate::config::{InvalidCheckpointPolicy, TransferConfig};
use crate::downloader::PartDownloader;
use crate::error::{TransferError, TransferResult};
use crate::guard::ObjectIdentityGuard;
use crate::planner::plan_parts;
use crate::providers::ObjectStore;
use crate::state::{Part, Phase, TransactionState};

/// A resumable transfer. Downloads implement it here; uploads would be a separate type.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Drives the transfer to completion, resuming from any existing checkpoint.
    async fn run(&mut self) -> TransferResult<()>;

    /// Persists current progress after confirming the remote object is unchanged.
    async fn checkpoint(&self) -> TransferResult<()>;
}

/// Snapshot handed to progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_done: u64,
    pub total_bytes: u64,
    pub parts_done: usize,
    pub total_parts: usize,
}

impl TransferProgress {
    fn of(state: &TransactionState) -> Self {
        Self {
            bytes_done: state.bytes_done(),
            total_bytes: state.object_meta.size,
            parts_done: state.parts_done(),
            total_parts: state.parts.len(),
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

pub struct DownloadTransaction {
    config: TransferConfig,
    store: Arc<dyn ObjectStore>,
    checkpoints: CheckpointStore,
    guard: ObjectIdentityGuard,
    /// Held across mark-done, identity check and save so checkpoint writes never interleave.
    state: Mutex<Option<TransactionState>>,
    phase: Phase,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl DownloadTransaction {
    pub fn new(config: TransferConfig, store: Arc<dyn ObjectStore>) -> TransferResult<Self> {
        config.validate()?;
        Ok(Self {
            checkpoints: CheckpointStore::new(&config.checkpoint_path),
            guard: ObjectIdentityGuard::new(store.clone(), &config.bucket, &config.key),
            config,
            store,
            state: Mutex::new(None),
            phase: Phase::Fresh,
            cancel: CancellationToken::new(),
            progress: None,
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Copy of the in-memory state, if the transaction has been initiated or rebuilt.
    pub async fn state(&self) -> Option<TransactionState> {
        self.state.lock().await.clone()
    }

    /// Loads the checkpoint if there is one, otherwise starts fresh.
    pub async fn rebuild(&mut self) -> TransferResult<()> {
        if !self.checkpoints.exists().await? {
            return self.initiate().await;
        }

        match self.load_checkpoint().await {
            Ok(state) => {
                if state.destination != self.config.destination {
                    warn!(
                        recorded = %state.destination.display(),
                        configured = %self.config.destination.display(),
                        "checkpoint belongs to another destination; resuming into the recorded one"
                    );
                }
                info!(
                    id = %state.id,
                    parts_done = state.parts_done(),
                    parts = state.parts.len(),
                    "resuming from checkpoint"
                );
                self.phase = state.phase();
                self.report(&state);
                *self.state.lock().await = Some(state);
                Ok(())
            }
            Err(e) if self.config.on_invalid_checkpoint == InvalidCheckpointPolicy::Restart
                && (e.is_checkpoint_invalid() || matches!(e, TransferError::ObjectInconsistent { .. })) =>
            {
                warn!(
                    path = %self.checkpoints.path().display(),
                    error = %e,
                    "discarding checkpoint and starting over"
                );
                self.checkpoints.remove().await?;
                self.initiate().await
            }
            Err(e) => Err(e),
        }
    }

    async fn load_checkpoint(&self) -> TransferResult<TransactionState> {
        let state = self.checkpoints.load().await?;
        self.guard.ensure_unchanged(&state.object_meta).await?;
        Ok(state)
    }

    async fn initiate(&mut self) -> TransferResult<()> {
        let object_meta = self
            .store
            .get_object_meta(&self.config.bucket, &self.config.key)
            .await?;
        let state = TransactionState::new(
            Uuid::new_v4().to_string(),
            &self.config.destination,
            object_meta,
        );
        info!(
            id = %state.id,
            bucket = %self.config.bucket,
            key = %self.config.key,
            etag = %state.object_meta.etag,
            size = state.object_meta.size,
            "download initiated"
        );

        self.persist(&state).await?;
        *self.state.get_mut() = Some(state);
        self.phase = Phase::Initiated;
        Ok(())
    }

    async fn plan(&mut self) -> TransferResult<()> {
        let mut slot = self.state.lock().await;
        let state = slot.as_mut().ok_or(TransferError::NotInitiated)?;
        if state.is_planned() {
            return Ok(());
        }

        state.parts = plan_parts(state.object_meta.size, self.config.part_size);
        self.persist(state).await?;
        info!(parts = state.parts.len(), part_size = self.config.part_size, "parts planned");
        self.report(state);
        drop(slot);
        self.phase = Phase::Planned;
        Ok(())
    }

    /// Downloads every undone part, `concurrency` at a time, in ascending number order.
    async fn download_all(&mut self) -> TransferResult<()> {
        let (undone, destination) = {
            let slot = self.state.lock().await;
            let state = slot.as_ref().ok_or(TransferError::NotInitiated)?;
            (state.undone_parts(), state.destination.clone())
        };

        if !undone.is_empty() {
            self.phase = Phase::InProgress;
            let downloader = PartDownloader::new(
                self.store.clone(),
                &self.config.bucket,
                &self.config.key,
                destination,
            )
            .with_rate_limit(self.config.rate_limit)
            .with_cancellation(self.cancel.clone());

            let this = &*self;
            stream::iter(undone)
                .map(|part| this.download_part(&downloader, part))
                .buffer_unordered(self.config.concurrency)
                .try_collect::<Vec<()>>()
                .await?;
        }

        self.phase = Phase::AllDone;
        Ok(())
    }

    /// Fetches one part, then records it under the state lock: identity check,
    /// mark done, save. The lock is what serializes checkpoint writes between workers.
    pub async fn download_part(&self, downloader: &PartDownloader, part: Part) -> TransferResult<()> {
        let checksum = downloader.download_part(&part).await?;

        let mut slot = self.state.lock().await;
        let state = slot.as_mut().ok_or(TransferError::NotInitiated)?;
        self.guard.ensure_unchanged(&state.object_meta).await?;
        state.mark_done(part.number, checksum);
        self.checkpoints.save(state).await?;

        debug!(part = part.number, parts_done = state.parts_done(), "part recorded");
        self.report(state);
        Ok(())
    }

    async fn commit(&mut self) -> TransferResult<()> {
        let mut slot = self.state.lock().await;
        let state = slot.as_ref().ok_or(TransferError::NotInitiated)?;
        Committer::commit(state, &self.checkpoints).await?;
        *slot = None;
        drop(slot);
        self.phase = Phase::Committed;
        Ok(())
    }

    async fn persist(&self, state: &TransactionState) -> TransferResult<()> {
        self.guard.ensure_unchanged(&state.object_meta).await?;
        self.checkpoints.save(state).await
    }

    fn report(&self, state: &TransactionState) {
        if let Some(callback) = &self.progress {
            callback(TransferProgress::of(state));
        }
    }
}

#[async_trait]
impl Transaction for DownloadTransaction {
    async fn run(&mut self) -> TransferResult<()> {
        self.phase = Phase::Fresh;
        *self.state.get_mut() = None;

        self.rebuild().await?;
        self.plan().await?;
        self.download_all().await?;
        self.commit().await
    }

    async fn checkpoint(&self) -> TransferResult<()> {
        let slot = self.state.lock().await;
        match slot.as_ref() {
            Some(state) => self.persist(state).await,
            None => Ok(()),
        }
    }
}
