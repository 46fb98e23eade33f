use anyhow::{Context, Result};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use cpdl::utils::{default_filename, sibling_temp_path};
use cpdl::{
    CheckpointStore, DownloadTransaction, HttpObjectStore, Transaction, TransferConfig, TransferError,
    TransferProgress,
};

use crate::cli::OnInvalid;

/// Splits a full object URL into the store endpoint and the object key.
/// The query stays on the endpoint so signed URLs keep working.
fn split_url(url: &str) -> Result<(Url, String)> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
    let key = parsed.path().trim_start_matches('/').to_string();
    if key.is_empty() {
        anyhow::bail!("URL has no object path: {}", url);
    }
    let mut endpoint = parsed;
    endpoint.set_path("/");
    endpoint.set_fragment(None);
    Ok((endpoint, key))
}

pub fn resolve_destination(url: &str, output: Option<PathBuf>) -> PathBuf {
    output.unwrap_or_else(|| PathBuf::from(default_filename(url)))
}

pub fn resolve_checkpoint(destination: &Path, checkpoint: Option<PathBuf>) -> PathBuf {
    checkpoint.unwrap_or_else(|| sibling_temp_path(destination, "cpt"))
}

#[allow(clippy::too_many_arguments)]
pub async fn run_download(
    url: String,
    output: Option<PathBuf>,
    checkpoint: Option<PathBuf>,
    part_size: u64,
    concurrency: usize,
    rate_limit: Option<u32>,
    on_invalid: OnInvalid,
) -> Result<()> {
    let (endpoint, key) = split_url(&url)?;
    let destination = resolve_destination(&url, output);
    let checkpoint_path = resolve_checkpoint(&destination, checkpoint);

    let config = TransferConfig::new("", key, &destination)
        .with_checkpoint_path(checkpoint_path)
        .with_part_size(part_size)
        .with_concurrency(concurrency)
        .with_rate_limit(rate_limit.and_then(NonZeroU32::new))
        .with_invalid_checkpoint_policy(on_invalid.into());

    let store = Arc::new(HttpObjectStore::new(endpoint)?);

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {bytes_per_sec:>12} {eta:>4} {msg}")
            .context("Invalid progress template")?
            .progress_chars("=>-"),
    );
    let pb_cb = pb.clone();
    let on_progress = Arc::new(move |p: TransferProgress| {
        pb_cb.set_length(p.total_bytes);
        pb_cb.set_position(p.bytes_done);
        pb_cb.set_message(format!("parts {}/{}", p.parts_done, p.total_parts));
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut transaction = DownloadTransaction::new(config, store)?
        .with_progress(on_progress)
        .with_cancellation(cancel);

    match transaction.run().await {
        Ok(()) => {
            pb.finish_with_message(format!("Completed   {}", destination.display()));
            Ok(())
        }
        Err(e) => {
            pb.abandon();
            if e.is_checkpoint_invalid() {
                eprintln!(
                    "Checkpoint {} cannot be trusted. Re-run with --on-invalid-checkpoint restart to discard it.",
                    transaction.config().checkpoint_path.display()
                );
            } else if matches!(e, TransferError::Cancelled) {
                eprintln!("Interrupted; run the same command again to resume.");
            }
            Err(e).with_context(|| format!("Failed to download {}", url))
        }
    }
}

pub async fn show_status(checkpoint: PathBuf) -> Result<()> {
    let store = CheckpointStore::new(&checkpoint);
    if !store.exists().await? {
        println!("No checkpoint at {}", checkpoint.display());
        return Ok(());
    }

    let state = store
        .load()
        .await
        .with_context(|| format!("Checkpoint {} is not usable", checkpoint.display()))?;

    println!("Transaction: {}", state.id);
    println!("Destination: {}", state.destination.display());
    println!(
        "Object:      etag {} | {}",
        state.object_meta.etag,
        HumanBytes(state.object_meta.size)
    );
    println!(
        "Progress:    {}/{} parts | {} / {}",
        state.parts_done(),
        state.parts.len(),
        HumanBytes(state.bytes_done()),
        HumanBytes(state.object_meta.size)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_url() {
        let (endpoint, key) = split_url("https://files.example.com/models/w.bin").unwrap();
        assert_eq!(endpoint.as_str(), "https://files.example.com/");
        assert_eq!(key, "models/w.bin");
    }

    #[test]
    fn test_signed_url_query_reaches_request() {
        let (endpoint, key) = split_url("https://bucket.s3.example.com/w.bin?X-Amz-Signature=abc").unwrap();
        let url = HttpObjectStore::new(endpoint).unwrap().object_url("", &key).unwrap();
        assert_eq!(url.as_str(), "https://bucket.s3.example.com/w.bin?X-Amz-Signature=abc");
    }

    #[test]
    fn test_split_url_requires_path() {
        assert!(split_url("https://files.example.com/").is_err());
    }

    #[test]
    fn test_default_paths() {
        let destination = resolve_destination("https://x.test/a/b.tar", None);
        assert_eq!(destination, PathBuf::from("b.tar"));
        assert_eq!(resolve_checkpoint(&destination, None), PathBuf::from("b.tar.cpt"));
    }
}
