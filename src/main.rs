mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::OnInvalid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the object to download
    #[arg(index = 1)]
    url: String,

    /// Destination file (defaults to the file name in the URL)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Checkpoint file (defaults to <output>.cpt)
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Size of each part in bytes
    #[arg(short = 's', long, default_value_t = cpdl::planner::DEFAULT_PART_SIZE)]
    part_size: u64,

    /// Number of parts fetched at the same time
    #[arg(short = 'c', long, default_value_t = 1)]
    concurrency: usize,

    /// Global rate limit in bytes per second (e.g., 1048576 for 1MB/s)
    #[arg(short = 'r', long)]
    rate_limit: Option<u32>,

    /// What to do when the checkpoint fails validation
    #[arg(long = "on-invalid-checkpoint", value_enum, default_value = "abort")]
    on_invalid_checkpoint: OnInvalid,

    /// Print the state recorded in the checkpoint and exit
    #[arg(long)]
    status: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("CPDL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        if args.status {
            let destination = commands::resolve_destination(&args.url, args.output);
            let checkpoint = commands::resolve_checkpoint(&destination, args.checkpoint);
            return commands::show_status(checkpoint).await;
        }

        commands::run_download(
            args.url,
            args.output,
            args.checkpoint,
            args.part_size,
            args.concurrency,
            args.rate_limit,
            args.on_invalid_checkpoint,
        )
        .await
    })
}
