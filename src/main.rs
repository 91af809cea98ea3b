use clap::{Parser, Subcommand};
use image_derivatives::config::{self, PipelineConfig, StoreKind};
use image_derivatives::event;
use image_derivatives::imaging::{
    ImageBackend, Quality, RenditionConfig, RustBackend, create_renditions,
};
use image_derivatives::pipeline::Pipeline;
use image_derivatives::report::{self, BatchReport};
use image_derivatives::store::{LocalStore, ObjectFetcher, ObjectWriter, S3Store};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "image-derivatives")]
#[command(about = "Generate resized WebP renditions for newly uploaded images")]
#[command(long_about = "\
Generate resized WebP renditions for newly uploaded images

Each object-created notification names an image in the input bucket. The
image is decoded once and written to the destination bucket as:

  <key-without-ext>-200.webp     resized, aspect ratio preserved
  <key-without-ext>-400.webp
  ...                            one per configured width
  <key>                          the original, re-encoded in its own format

Every object is gzip-compressed and stored with Content-Encoding: gzip.

The destination bucket comes from TARGET_BUCKET or target_bucket in the
config file. Logging is controlled by RUST_LOG (default: info).

Run 'image-derivatives gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Path to config.toml (stock defaults when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Handle one notification batch
    Handle {
        /// Event payload file; `-` or omitted reads stdin
        #[arg(long)]
        event: Option<PathBuf>,
        /// Print the batch report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Render one local image into a directory, uncompressed
    Derive {
        /// Source image
        input: PathBuf,
        /// Directory to write renditions into
        #[arg(long, default_value = "derivatives")]
        out_dir: PathBuf,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

/// How long exit waits for encoding jobs abandoned at the hard limit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();
    let cli = Cli::parse();
    init_tracing();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(cli, started));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn run(cli: Cli, started: Instant) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Handle { event, json } => {
            let config = config::load_config(cli.config.as_deref())?;
            let payload = read_event(event.as_deref()).await?;
            let batch = event::parse_batch(&payload)?;

            let report = match config.store.kind {
                StoreKind::S3 => {
                    let store = Arc::new(S3Store::from_env().await);
                    handle(&config, store.clone(), store, batch, started).await?
                }
                StoreKind::Local => {
                    let store = Arc::new(LocalStore::new(&config.store.local_root));
                    handle(&config, store.clone(), store, batch, started).await?
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report::print_batch_report(&report);
            }
        }
        Command::Derive { input, out_dir } => {
            let config = config::load_config(cli.config.as_deref())?;
            derive(&config, &input, &out_dir).await?;
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Install the global subscriber. Logs go to stderr so stdout stays
/// parseable with `--json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .init();
}

async fn read_event(path: Option<&Path>) -> std::io::Result<Vec<u8>> {
    match path {
        Some(p) if p != Path::new("-") => tokio::fs::read(p).await,
        _ => {
            let mut buf = Vec::new();
            tokio::io::stdin().read_to_end(&mut buf).await?;
            Ok(buf)
        }
    }
}

async fn handle(
    config: &PipelineConfig,
    fetcher: Arc<dyn ObjectFetcher>,
    writer: Arc<dyn ObjectWriter>,
    batch: event::Batch,
    started: Instant,
) -> Result<BatchReport, Box<dyn std::error::Error>> {
    let pipeline = Pipeline::new(config, RustBackend::new(), fetcher, writer)?;
    let report = pipeline.handle_batch_from(batch, started).await;
    info!(
        records = report.records.len(),
        rejected = report.rejected.len(),
        complete = report.is_complete(),
        elapsed_ms = report.elapsed_ms,
        "Batch finished"
    );
    Ok(report)
}

/// Render a local file with the configured ladder and write the raw
/// renditions under `out_dir`.
async fn derive(
    config: &PipelineConfig,
    input: &Path,
    out_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = tokio::fs::read(input).await?;
    let key = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| format!("{} has no file name", input.display()))?;
    let rendition_config = RenditionConfig {
        widths: config.derivatives.widths.clone(),
        quality: Quality::new(config.derivatives.quality),
        max_pixels: config.derivatives.max_pixels,
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config::effective_threads(&config.processing))
        .build()?;

    let job_key = key.clone();
    let results = tokio::task::spawn_blocking(move || {
        let backend = RustBackend::new();
        backend.decode(&bytes).map(|decoded| {
            pool.install(|| create_renditions(&backend, &decoded, &job_key, &rendition_config))
        })
    })
    .await??;

    for rendition in results.iter().flatten() {
        let path = out_dir.join(&rendition.key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &rendition.bytes).await?;
    }
    report::print_renditions(&key, &results);

    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        return Err(format!("{failed} rendition(s) failed").into());
    }
    Ok(())
}
