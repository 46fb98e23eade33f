//! Resumable, checkpointed download of large remote objects.
//!
//! An object is fetched as fixed-size byte ranges ("parts"), each written to
//! its own `<destination>.part.<n>` file. After every part the transaction
//! state is saved to a checksummed checkpoint, so an interrupted download
//! resumes where it stopped. On resume the checkpoint, the finished part files
//! and the remote object's entity tag are all re-verified before any new
//! progress is recorded. Once every part is done they are concatenated into
//! the destination and the bookkeeping is removed.
//!
//! ```ignore
//! use std::sync::Arc;
//! use cpdl::{DownloadTransaction, HttpObjectStore, Transaction, TransferConfig};
//!
//! let store = Arc::new(HttpObjectStore::new("http://localhost:9000".parse()?)?);
//! let config = TransferConfig::new("models", "llama/weights.bin", "weights.bin")
//!     .with_concurrency(4);
//! DownloadTransaction::new(config, store)?.run().await?;
//! ```

pub mod checkpoint;
pub mod committer;
pub mod config;
pub mod downloader;
pub mod error;
pub mod guard;
pub mod hashing;
pub mod planner;
pub mod providers;
pub mod state;
pub mod transaction;
pub mod utils;

pub use checkpoint::CheckpointStore;
pub use config::{InvalidCheckpointPolicy, TransferConfig};
pub use error::{TransferError, TransferResult};
pub use providers::{HttpObjectStore, MemoryObjectStore, ObjectStore};
pub use state::{ByteRange, ObjectMeta, Part, Phase, TransactionState};
pub use transaction::{DownloadTransaction, ProgressCallback, Transaction, TransferProgress};
