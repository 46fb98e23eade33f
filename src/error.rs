use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type TransferResult<T> = Result<T, TransferError>;

/// Everything a transfer can fail with. Callers match on the variant rather
/// than on message text.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The checkpoint record does not match its embedded checksum, or cannot be parsed at all.
    #[error("checkpoint {} failed its integrity check: {reason}", path.display())]
    TokenInconsistent { path: PathBuf, reason: String },

    /// A part marked done has no file on disk.
    #[error("part {number} is marked done but {} is missing", path.display())]
    PartMissing { number: u32, path: PathBuf },

    /// A part marked done has a file whose content no longer matches.
    #[error("part {number} at {} changed on disk: expected {expected}, got {actual}", path.display())]
    FileInconsistent {
        number: u32,
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The remote object's entity tag moved since the transaction was initiated.
    #[error("remote object changed: recorded etag {expected}, current etag {actual}")]
    ObjectInconsistent { expected: String, actual: String },

    #[error("checkpoint version {0} is not supported")]
    UnsupportedVersion(u32),

    #[error("cannot commit while parts {0:?} are not done")]
    PartsIncomplete(Vec<u32>),

    #[error("part {number} received {received} bytes, expected {expected}")]
    RangeLengthMismatch {
        number: u32,
        expected: u64,
        received: u64,
    },

    #[error("object {bucket}/{key} not found")]
    ObjectNotFound { bucket: String, key: String },

    #[error("{url} answered with HTTP {status}")]
    RemoteStatus { url: String, status: u16 },

    #[error("response from {url} has no usable {header} header")]
    MissingHeader { url: String, header: &'static str },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("transaction has not been initiated")]
    NotInitiated,

    #[error("transfer cancelled")]
    Cancelled,

    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    #[error("failed to encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransferError {
    /// True when the checkpoint itself cannot be trusted and resuming from it is unsafe.
    pub fn is_checkpoint_invalid(&self) -> bool {
        matches!(
            self,
            Self::TokenInconsistent { .. }
                | Self::PartMissing { .. }
                | Self::FileInconsistent { .. }
                | Self::UnsupportedVersion(_)
        )
    }

    pub(crate) fn read(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::ReadFailed { path, source }
    }

    pub(crate) fn write(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::WriteFailed { path, source }
    }
}
