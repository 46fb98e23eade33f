use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::{TransferError, TransferResult};

const BUFFER_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-256 of a file's content.
pub async fn calculate_hash(filepath: &Path) -> TransferResult<String> {
    let mut file = File::open(filepath)
        .await
        .map_err(TransferError::read(filepath))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let n = file
            .read(&mut buffer)
            .await
            .map_err(TransferError::read(filepath))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
