//! Tamper-evident persistence of transaction state.
//!
//! The record is compact JSON carrying a SHA-256 over the canonical encoding
//! of every other field. Loading recomputes that checksum and then re-hashes
//! each part file the record claims is done, so edits to either the record or
//! the downloaded data are caught before a resume builds on them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{TransferError, TransferResult};
use crate::hashing::{calculate_hash, hash_bytes};
use crate::state::{ObjectMeta, Part, TransactionState, CHECKPOINT_VERSION};
use crate::utils::{part_file_path, sibling_temp_path};

/// The checksummed portion of the record, in canonical field order.
#[derive(Serialize)]
struct RecordBody<'a> {
    version: u32,
    id: &'a str,
    file: &'a Path,
    object_meta: &'a ObjectMeta,
    parts: &'a [Part],
}

impl RecordBody<'_> {
    fn checksum(&self) -> TransferResult<String> {
        Ok(hash_bytes(&serde_json::to_vec(self)?))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckpointRecord {
    version: u32,
    id: String,
    file: PathBuf,
    object_meta: ObjectMeta,
    parts: Vec<Part>,
    checksum: String,
}

impl CheckpointRecord {
    fn body(&self) -> RecordBody<'_> {
        RecordBody {
            version: self.version,
            id: &self.id,
            file: &self.file,
            object_meta: &self.object_meta,
            parts: &self.parts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Only a definite "not found" counts as absent; any other metadata error is returned.
    pub async fn exists(&self) -> TransferResult<bool> {
        fs::try_exists(&self.path)
            .await
            .map_err(TransferError::read(&self.path))
    }

    /// Replaces the record on disk. Written to a sibling file and renamed into
    /// place, so a crash leaves either the old record or the new one.
    pub async fn save(&self, state: &TransactionState) -> TransferResult<()> {
        let body = RecordBody {
            version: CHECKPOINT_VERSION,
            id: &state.id,
            file: &state.destination,
            object_meta: &state.object_meta,
            parts: &state.parts,
        };
        let record = CheckpointRecord {
            version: CHECKPOINT_VERSION,
            id: state.id.clone(),
            file: state.destination.clone(),
            object_meta: state.object_meta.clone(),
            parts: state.parts.clone(),
            checksum: body.checksum()?,
        };
        let content = serde_json::to_vec(&record)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(TransferError::write(parent))?;
        }

        let tmp = sibling_temp_path(&self.path, "tmp");
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(TransferError::write(&tmp))?;
        file.write_all(&content)
            .await
            .map_err(TransferError::write(&tmp))?;
        file.sync_all().await.map_err(TransferError::write(&tmp))?;
        drop(file);

        fs::rename(&tmp, &self.path)
            .await
            .map_err(TransferError::write(&self.path))?;

        debug!(
            path = %self.path.display(),
            parts_done = state.parts_done(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Reads the record back and validates it against itself and the part files on disk.
    pub async fn load(&self) -> TransferResult<TransactionState> {
        let content = fs::read(&self.path)
            .await
            .map_err(TransferError::read(&self.path))?;

        let record: CheckpointRecord =
            serde_json::from_slice(&content).map_err(|e| self.inconsistent(e.to_string()))?;

        if record.body().checksum()? != record.checksum {
            return Err(self.inconsistent("checksum mismatch".to_string()));
        }
        if record.version != CHECKPOINT_VERSION {
            return Err(TransferError::UnsupportedVersion(record.version));
        }

        for part in record.parts.iter().filter(|p| p.done) {
            let expected = part
                .checksum
                .as_deref()
                .ok_or_else(|| self.inconsistent(format!("part {} is done without a checksum", part.number)))?;

            let part_path = part_file_path(&record.file, part.number);
            if !fs::try_exists(&part_path)
                .await
                .map_err(TransferError::read(&part_path))?
            {
                return Err(TransferError::PartMissing {
                    number: part.number,
                    path: part_path,
                });
            }

            let actual = calculate_hash(&part_path).await?;
            if actual != expected {
                return Err(TransferError::FileInconsistent {
                    number: part.number,
                    path: part_path,
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        Ok(TransactionState {
            id: record.id,
            destination: record.file,
            object_meta: record.object_meta,
            parts: record.parts,
        })
    }

    pub async fn remove(&self) -> TransferResult<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransferError::WriteFailed {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    fn inconsistent(&self, reason: String) -> TransferError {
        TransferError::TokenInconsistent {
            path: self.path.clone(),
            reason,
        }
    }
}
