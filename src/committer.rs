use std::io::ErrorKind;
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::{TransferError, TransferResult};
use crate::state::{Part, TransactionState};
use crate::utils::{part_file_path, sibling_temp_path};

/// Reassembles finished parts into the destination file and removes the
/// transaction's bookkeeping.
pub struct Committer;

impl Committer {
    /// Concatenates every part file, in part-number order, into the destination.
    ///
    /// The output is built at `<destination>.tmp`, synced and renamed into
    /// place before anything is deleted. Until that rename the checkpoint and
    /// part files are untouched, so an interrupted commit can simply be run again.
    pub async fn commit(state: &TransactionState, checkpoints: &CheckpointStore) -> TransferResult<()> {
        let pending: Vec<u32> = state.undone_parts().iter().map(|p| p.number).collect();
        if !state.is_planned() || !pending.is_empty() {
            return Err(TransferError::PartsIncomplete(pending));
        }

        let mut parts: Vec<&Part> = state.parts.iter().collect();
        parts.sort_by_key(|p| p.number);

        let destination = &state.destination;
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(TransferError::write(parent))?;
        }

        let tmp = sibling_temp_path(destination, "tmp");
        if let Err(e) = Self::concatenate(&parts, destination, &tmp).await {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(path = %tmp.display(), error = %cleanup, "could not remove partial output");
                }
            }
            return Err(e);
        }
        fs::rename(&tmp, destination)
            .await
            .map_err(TransferError::write(destination))?;

        checkpoints.remove().await?;
        for part in &parts {
            let path = part_file_path(destination, part.number);
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(TransferError::WriteFailed { path, source: e }),
            }
        }

        info!(
            destination = %destination.display(),
            parts = parts.len(),
            bytes = state.object_meta.size,
            "download committed"
        );
        Ok(())
    }

    async fn concatenate(parts: &[&Part], destination: &Path, tmp: &Path) -> TransferResult<()> {
        let file = File::create(tmp).await.map_err(TransferError::write(tmp))?;
        let mut writer = BufWriter::new(file);

        for part in parts {
            let path = part_file_path(destination, part.number);
            let mut reader = File::open(&path).await.map_err(|e| match e.kind() {
                ErrorKind::NotFound => TransferError::PartMissing {
                    number: part.number,
                    path: path.clone(),
                },
                _ => TransferError::ReadFailed {
                    path: path.clone(),
                    source: e,
                },
            })?;

            let copied = tokio::io::copy(&mut reader, &mut writer)
                .await
                .map_err(TransferError::write(tmp))?;
            if copied != part.range.len() {
                return Err(TransferError::FileInconsistent {
                    number: part.number,
                    path,
                    expected: format!("{} bytes", part.range.len()),
                    actual: format!("{} bytes", copied),
                });
            }
            debug!(part = part.number, bytes = copied, "part appended");
        }

        writer.flush().await.map_err(TransferError::write(tmp))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(TransferError::write(tmp))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::hash_bytes;
    use crate::state::{ByteRange, ObjectMeta};
    use tempfile::TempDir;

    async fn done_state(temp: &TempDir, chunks: &[&[u8]]) -> TransactionState {
        let destination = temp.path().join("out.bin");
        let mut state = TransactionState::new(
            "tx",
            &destination,
            ObjectMeta {
                etag: "\"e\"".to_string(),
                size: chunks.iter().map(|c| c.len() as u64).sum(),
            },
        );
        let mut offset = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            let number = i as u32 + 1;
            let end = offset + chunk.len() as u64;
            let mut part = Part::new(number, ByteRange::new(offset, end));
            fs::write(part_file_path(&destination, number), chunk)
                .await
                .unwrap();
            part.done = true;
            part.checksum = Some(hash_bytes(chunk));
            state.parts.push(part);
            offset = end;
        }
        state
    }

    #[tokio::test]
    async fn test_commit_concatenates_in_number_order_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let mut state = done_state(&temp, &[b"alpha-", b"beta-", b"gamma"]).await;
        state.parts.reverse();
        let checkpoints = CheckpointStore::new(temp.path().join("out.bin.cpt"));
        checkpoints.save(&state).await.unwrap();

        Committer::commit(&state, &checkpoints).await.unwrap();

        assert_eq!(
            fs::read(&state.destination).await.unwrap(),
            b"alpha-beta-gamma"
        );
        assert!(!checkpoints.exists().await.unwrap());
        for n in 1..=3 {
            assert!(!part_file_path(&state.destination, n).exists());
        }
        assert!(!sibling_temp_path(&state.destination, "tmp").exists());
    }

    #[tokio::test]
    async fn test_commit_replaces_existing_destination() {
        let temp = TempDir::new().unwrap();
        let state = done_state(&temp, &[b"new"]).await;
        fs::write(&state.destination, b"old content that is longer")
            .await
            .unwrap();
        let checkpoints = CheckpointStore::new(temp.path().join("out.bin.cpt"));

        Committer::commit(&state, &checkpoints).await.unwrap();
        assert_eq!(fs::read(&state.destination).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_commit_refuses_undone_parts() {
        let temp = TempDir::new().unwrap();
        let mut state = done_state(&temp, &[b"aa", b"bb", b"cc"]).await;
        state.parts[1].done = false;
        state.parts[1].checksum = None;
        let checkpoints = CheckpointStore::new(temp.path().join("out.bin.cpt"));

        match Committer::commit(&state, &checkpoints).await {
            Err(TransferError::PartsIncomplete(pending)) => assert_eq!(pending, vec![2]),
            other => panic!("expected PartsIncomplete, got {:?}", other),
        }
        assert!(!state.destination.exists());
    }

    #[tokio::test]
    async fn test_truncated_part_keeps_checkpoint() {
        let temp = TempDir::new().unwrap();
        let state = done_state(&temp, &[b"aaaa", b"bbbb"]).await;
        let checkpoints = CheckpointStore::new(temp.path().join("out.bin.cpt"));
        checkpoints.save(&state).await.unwrap();
        fs::write(part_file_path(&state.destination, 2), b"bb")
            .await
            .unwrap();

        let result = Committer::commit(&state, &checkpoints).await;

        assert!(matches!(
            result,
            Err(TransferError::FileInconsistent { number: 2, .. })
        ));
        assert!(checkpoints.exists().await.unwrap());
        assert!(part_file_path(&state.destination, 1).exists());
        assert!(!state.destination.exists());
        assert!(!sibling_temp_path(&state.destination, "tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_part_leaves_no_partial_output() {
        let temp = TempDir::new().unwrap();
        let state = done_state(&temp, &[b"aaaa", b"bbbb", b"cccc"]).await;
        let checkpoints = CheckpointStore::new(temp.path().join("out.bin.cpt"));
        fs::remove_file(part_file_path(&state.destination, 3))
            .await
            .unwrap();

        let result = Committer::commit(&state, &checkpoints).await;

        assert!(matches!(result, Err(TransferError::PartMissing { number: 3, .. })));
        assert!(!sibling_temp_path(&state.destination, "tmp").exists());
        assert!(!state.destination.exists());
    }

    #[tokio::test]
    async fn test_commit_empty_object() {
        let temp = TempDir::new().unwrap();
        let state = done_state(&temp, &[b""]).await;
        let checkpoints = CheckpointStore::new(temp.path().join("out.bin.cpt"));

        Committer::commit(&state, &checkpoints).await.unwrap();
        assert_eq!(fs::metadata(&state.destination).await.unwrap().len(), 0);
    }
}
