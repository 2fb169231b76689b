//! Tool-call server over stdio.
//!
//! Reads one JSON-RPC request per line from stdin and writes one response
//! per line to stdout. Logs go to stderr; stdout carries protocol only.

use any2md::tools::{handle_rpc, RpcRequest, RpcResponse};
use any2md::{ConversionService, ServiceConfig};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Serve document conversion tools over stdin/stdout.
#[derive(Parser, Debug)]
#[command(name = "any2md-mcp", version, about)]
struct Args {
    /// Documents converted at once.
    #[arg(long, env = "ANY2MD_MAX_CONCURRENT", default_value_t = 5)]
    max_concurrent: usize,

    /// Seconds a request may wait for a conversion slot.
    #[arg(long, env = "ANY2MD_ADMISSION_TIMEOUT", default_value_t = 300)]
    admission_timeout: u64,

    /// Deadline in seconds for each parse, sampling or layout step.
    #[arg(long, env = "ANY2MD_STAGE_TIMEOUT", default_value_t = 300)]
    stage_timeout: u64,

    /// Where extracted images are stored.
    #[arg(long, env = "ANY2MD_IMAGE_DIR", default_value = "./temp_images")]
    image_dir: PathBuf,

    /// Base URL under which images are linked.
    #[arg(long, env = "ANY2MD_PUBLIC_BASE_URL", default_value = "http://localhost:3000/static")]
    public_base_url: String,

    /// Largest accepted input in MB.
    #[arg(long, env = "ANY2MD_MAX_FILE_SIZE_MB", default_value_t = 100)]
    max_file_size_mb: u64,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "ANY2MD_PDFIUM_DIR")]
    pdfium_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(format!("any2md={level}")).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("any2md=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let mut builder = ServiceConfig::builder()
        .max_concurrent_jobs(args.max_concurrent)
        .admission_timeout(Duration::from_secs(args.admission_timeout))
        .stage_timeout(Duration::from_secs(args.stage_timeout))
        .image_dir(args.image_dir)
        .public_base_url(args.public_base_url)
        .max_file_size(args.max_file_size_mb * 1024 * 1024);
    if let Some(dir) = args.pdfium_dir {
        builder = builder.pdfium_library_dir(dir);
    }
    let service = ConversionService::new(builder.build().context("Invalid configuration")?);
    info!("any2md tool server {} starting on stdio", env!("CARGO_PKG_VERSION"));

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => handle_rpc(&service, request).await,
            Err(e) => {
                debug!("Unparseable request: {}", e);
                Some(RpcResponse::parse_error(e))
            }
        };
        let Some(response) = response else {
            continue;
        };

        let mut out = serde_json::to_vec(&response).context("Failed to serialize response")?;
        out.push(b'\n');
        stdout.write_all(&out).await.context("Failed to write stdout")?;
        stdout.flush().await.context("Failed to flush stdout")?;
    }

    info!("stdin closed, shutting down");
    Ok(())
}
