//! Transfer configuration.

use std::num::NonZeroU32;
use std::path::PathBuf;

use crate::error::{TransferError, TransferResult};
use crate::planner::DEFAULT_PART_SIZE;
use crate::utils::sibling_temp_path;

/// What to do when an existing checkpoint cannot be trusted at rebuild time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvalidCheckpointPolicy {
    /// Return the validation error and leave the checkpoint alone.
    #[default]
    Abort,
    /// Delete the checkpoint and start over from a fresh initiate.
    Restart,
}

/// Configuration for one download transaction.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub bucket: String,
    pub key: String,

    /// Final reassembled file.
    pub destination: PathBuf,

    /// Recovery record. Defaults to `<destination>.cpt`.
    pub checkpoint_path: PathBuf,

    pub part_size: u64,

    /// Parts downloaded at the same time. 1 downloads strictly in order.
    pub concurrency: usize,

    /// Bandwidth cap in bytes per second.
    pub rate_limit: Option<NonZeroU32>,

    pub on_invalid_checkpoint: InvalidCheckpointPolicy,
}

impl TransferConfig {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        let destination = destination.into();
        Self {
            bucket: bucket.into(),
            key: key.into(),
            checkpoint_path: sibling_temp_path(&destination, "cpt"),
            destination,
            part_size: DEFAULT_PART_SIZE,
            concurrency: 1,
            rate_limit: None,
            on_invalid_checkpoint: InvalidCheckpointPolicy::default(),
        }
    }

    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = path.into();
        self
    }

    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_rate_limit(mut self, bytes_per_sec: Option<NonZeroU32>) -> Self {
        self.rate_limit = bytes_per_sec;
        self
    }

    pub fn with_invalid_checkpoint_policy(mut self, policy: InvalidCheckpointPolicy) -> Self {
        self.on_invalid_checkpoint = policy;
        self
    }

    pub fn validate(&self) -> TransferResult<()> {
        if self.part_size == 0 {
            return Err(TransferError::InvalidConfig("part size must be positive".to_string()));
        }
        if self.concurrency == 0 {
            return Err(TransferError::InvalidConfig("concurrency must be at least 1".to_string()));
        }
        if self.key.is_empty() {
            return Err(TransferError::InvalidConfig("object key is empty".to_string()));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(TransferError::InvalidConfig("destination path is empty".to_string()));
        }
        if self.checkpoint_path == self.destination {
            return Err(TransferError::InvalidConfig(
                "checkpoint path must differ from the destination".to_string(),
            ));
        }
        Ok(())
    }
}
